//! Bounded job execution.
//!
//! The engine's default executor drains its queue to exhaustion, which
//! turns an infinite promise chain in guest code into a host hang. This
//! executor enforces a per-call microtask budget instead: when the budget
//! is exceeded, remaining jobs are dropped, an `exhausted` flag is raised,
//! and the session converts it into a caught resource-exhaustion failure.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::pin;
use std::rc::Rc;
use std::task::{Poll, Waker};

use boa_engine::job::{Job, JobExecutor, NativeAsyncJob, PromiseJob};
use boa_engine::{Context, JsNativeError, JsResult};
use boa_gc::{empty_trace, Finalize, Trace};

/// How many polls an async job (module-load future) gets before the
/// executor gives up on it. Loads from the virtual filesystem complete on
/// the first poll; anything still pending after this is wedged.
const MAX_ASYNC_POLLS: usize = 1_024;

/// A FIFO promise-job executor with a per-call budget.
pub struct BoundedJobExecutor {
    promise_jobs: RefCell<VecDeque<PromiseJob>>,
    async_jobs: RefCell<VecDeque<NativeAsyncJob>>,
    budget: Cell<usize>,
    spent: Cell<usize>,
    exhausted: Cell<bool>,
}

impl Finalize for BoundedJobExecutor {}

// The queued jobs hold GC values, but the executor itself lives outside
// the engine heap for its whole life; rooting through the queue handles
// keeps them alive.
unsafe impl Trace for BoundedJobExecutor {
    empty_trace!();
}

impl BoundedJobExecutor {
    pub fn new(budget: usize) -> Rc<Self> {
        Rc::new(Self {
            promise_jobs: RefCell::new(VecDeque::new()),
            async_jobs: RefCell::new(VecDeque::new()),
            budget: Cell::new(budget),
            spent: Cell::new(0),
            exhausted: Cell::new(false),
        })
    }

    /// Reset the budget at the start of a call.
    pub fn reset(&self, budget: usize) {
        self.budget.set(budget);
        self.spent.set(0);
        self.exhausted.set(false);
        self.promise_jobs.borrow_mut().clear();
        self.async_jobs.borrow_mut().clear();
    }

    /// Whether the last drain hit the microtask budget.
    pub fn exhausted(&self) -> bool {
        self.exhausted.get()
    }

    /// Jobs executed since the last reset.
    pub fn jobs_run(&self) -> usize {
        self.spent.get()
    }

    fn has_pending(&self) -> bool {
        !self.promise_jobs.borrow().is_empty() || !self.async_jobs.borrow().is_empty()
    }

    /// Drive one async job to completion with a no-op waker. Module-load
    /// futures resolve synchronously; a persistently pending future is an
    /// engine-integration bug surfaced as an error rather than a hang.
    fn drive_async_job(job: NativeAsyncJob, context: &RefCell<&mut Context>) -> JsResult<()> {
        let mut future = pin!(job.call(context));
        let waker = Waker::noop();
        let mut cx = std::task::Context::from_waker(waker);
        for _ in 0..MAX_ASYNC_POLLS {
            match future.as_mut().poll(&mut cx) {
                Poll::Ready(result) => {
                    result?;
                    return Ok(());
                }
                Poll::Pending => {}
            }
        }
        Err(JsNativeError::typ()
            .with_message("async job did not complete synchronously")
            .into())
    }
}

impl JobExecutor for BoundedJobExecutor {
    fn enqueue_job(self: Rc<Self>, job: Job, _context: &mut Context) {
        match job {
            Job::PromiseJob(job) => self.promise_jobs.borrow_mut().push_back(job),
            Job::AsyncJob(job) => self.async_jobs.borrow_mut().push_back(job),
            _ => {
                log::debug!("dropping unsupported job variant");
            }
        }
    }

    fn run_jobs(self: Rc<Self>, context: &mut Context) -> JsResult<()> {
        while self.has_pending() {
            // Async jobs first: module loads must finish before the
            // promise reactions that depend on them.
            loop {
                let job = self.async_jobs.borrow_mut().pop_front();
                let Some(job) = job else { break };
                let context = RefCell::new(&mut *context);
                Self::drive_async_job(job, &context)?;
            }

            loop {
                let job = self.promise_jobs.borrow_mut().pop_front();
                let Some(job) = job else { break };

                if self.spent.get() >= self.budget.get() {
                    self.exhausted.set(true);
                    self.promise_jobs.borrow_mut().clear();
                    self.async_jobs.borrow_mut().clear();
                    return Ok(());
                }
                self.spent.set(self.spent.get() + 1);
                job.call(context)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_bookkeeping() {
        let executor = BoundedJobExecutor::new(10);
        assert!(!executor.exhausted());
        assert_eq!(executor.jobs_run(), 0);
        executor.reset(5);
        assert_eq!(executor.jobs_run(), 0);
        assert!(!executor.exhausted());
    }
}
