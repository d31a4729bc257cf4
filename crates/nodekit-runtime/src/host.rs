//! Shared host-side state for one VM context.
//!
//! Everything the host-native bridge functions need to reach (the virtual
//! filesystem, the active call's log stream, the timer queue, the module
//! registry) lives in [`HostState`] behind a [`HostHandle`]. The handle is
//! the capture type passed to every native function closure; interior
//! mutability keeps borrows short so natives can re-enter the engine.

use std::cell::{Ref, RefCell, RefMut};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use boa_gc::{Finalize, Trace};
use rustc_hash::FxHashMap;

use nodekit_vfs::MemFs;

use crate::loader::ModuleRegistry;

/// Configuration for one runtime instance.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Working directory inside the virtual filesystem.
    pub cwd: String,

    /// Environment variables surfaced through `process.env`.
    pub env: Vec<(String, String)>,

    /// Microtask budget per `execute` call. Exceeding it aborts the call
    /// with a resource-exhaustion failure instead of hanging the host.
    pub max_microtasks: usize,

    /// Timer-callback budget per `execute` call.
    pub max_timer_ticks: usize,

    /// Engine recursion limit (deep module graphs need headroom).
    pub recursion_limit: usize,

    /// Engine loop-iteration limit; a runaway `while (true)` trips this
    /// and surfaces as a guest failure.
    pub loop_iteration_limit: u64,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            cwd: "/".to_string(),
            env: Vec::new(),
            max_microtasks: 100_000,
            max_timer_ticks: 10_000,
            recursion_limit: 16_384,
            loop_iteration_limit: 100_000_000,
        }
    }
}

/// State scoped to one in-flight `execute` call.
pub struct CallState {
    pub logs: Vec<String>,
    pub on_log: Option<Box<dyn FnMut(&str) + Send>>,
    pub argv: Vec<String>,
}

/// Host state shared between the session, the bridge natives, and the
/// module loader. One instance per VM context.
pub struct HostState {
    pub fs: MemFs,
    pub options: RuntimeOptions,
    pub call: Option<CallState>,
    pub timers: TimerQueue,
    pub modules: ModuleRegistry,
    /// Wall-clock epoch milliseconds captured at context creation.
    pub epoch_ms: f64,
    /// Virtual milliseconds elapsed since creation; advanced by the drain
    /// loop when it fires timers, never by real sleeping.
    pub clock_ms: u64,
    /// Set when guest code called `process.exit(code)`.
    pub exit_code: Option<i32>,
}

impl HostState {
    pub fn new(fs: MemFs, options: RuntimeOptions) -> Self {
        let epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64() * 1000.0)
            .unwrap_or(0.0);
        Self {
            fs,
            options,
            call: None,
            timers: TimerQueue::new(),
            modules: ModuleRegistry::new(),
            epoch_ms,
            clock_ms: 0,
            exit_code: None,
        }
    }

    /// Current time as observed by the guest (`Date.now()`).
    pub fn now_ms(&self) -> f64 {
        self.epoch_ms + self.clock_ms as f64
    }

    /// Record a console line: append to the call's log and forward to the
    /// streaming callback. Lines produced outside a call (which should not
    /// happen) go to host diagnostics instead.
    pub fn push_log(state: &Rc<RefCell<HostState>>, line: String) {
        // Take the callback out while invoking it so the guest-visible
        // state is not borrowed during an arbitrary host callback.
        let callback = {
            let mut st = state.borrow_mut();
            match st.call.as_mut() {
                Some(call) => {
                    call.logs.push(line.clone());
                    call.on_log.take()
                }
                None => {
                    log::debug!("console write outside an active call: {}", line);
                    return;
                }
            }
        };
        let mut callback = callback;
        if let Some(cb) = callback.as_mut() {
            cb(&line);
        }
        let mut st = state.borrow_mut();
        if let Some(call) = st.call.as_mut() {
            call.on_log = callback;
        }
    }
}

/// The capture handle passed to native-function closures.
///
/// The inner state is host-owned and not part of the engine's object
/// graph, so tracing is skipped.
#[derive(Clone, Trace, Finalize)]
pub struct HostHandle {
    #[unsafe_ignore_trace]
    inner: Rc<RefCell<HostState>>,
}

impl HostHandle {
    pub fn new(state: HostState) -> Self {
        Self {
            inner: Rc::new(RefCell::new(state)),
        }
    }

    pub fn state(&self) -> Ref<'_, HostState> {
        self.inner.borrow()
    }

    pub fn state_mut(&self) -> RefMut<'_, HostState> {
        self.inner.borrow_mut()
    }

    pub fn raw(&self) -> &Rc<RefCell<HostState>> {
        &self.inner
    }
}

/// A fired timer popped from the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiredTimer {
    pub id: u64,
    pub due_ms: u64,
    /// Interval period if this timer reschedules itself.
    pub interval: Option<u64>,
}

/// Host-side deadline queue for guest timers.
///
/// Callbacks stay on the guest side (rooted in a bootstrap-scoped map);
/// the host tracks only `(deadline, id)` pairs ordered by deadline then
/// creation. Cancelled entries are dropped lazily when popped.
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<(u64, u64)>>,
    live: FxHashMap<u64, Option<u64>>,
    next_id: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            live: FxHashMap::default(),
            next_id: 1,
        }
    }

    /// Schedule a timer `delay_ms` past `now_ms`; returns its id.
    pub fn schedule(&mut self, now_ms: u64, delay_ms: u64, interval: Option<u64>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.live.insert(id, interval);
        self.heap.push(Reverse((now_ms.saturating_add(delay_ms), id)));
        id
    }

    /// Cancel a timer. Unknown ids are ignored, matching `clearTimeout`.
    pub fn cancel(&mut self, id: u64) {
        self.live.remove(&id);
    }

    /// Pop the earliest live timer. One-shot timers leave the live set
    /// here; intervals stay live until [`TimerQueue::cancel`].
    pub fn pop_next(&mut self) -> Option<FiredTimer> {
        while let Some(Reverse((due_ms, id))) = self.heap.pop() {
            match self.live.get(&id).copied() {
                Some(interval @ Some(_)) => return Some(FiredTimer { id, due_ms, interval }),
                Some(None) => {
                    self.live.remove(&id);
                    return Some(FiredTimer { id, due_ms, interval: None });
                }
                None => continue, // cancelled
            }
        }
        None
    }

    /// Re-queue an interval timer for its next period, unless it was
    /// cancelled while its callback ran.
    pub fn reschedule(&mut self, timer: &FiredTimer, now_ms: u64) {
        if let Some(period) = timer.interval {
            if self.live.contains_key(&timer.id) {
                self.heap
                    .push(Reverse((now_ms.saturating_add(period.max(1)), timer.id)));
            }
        }
    }

    /// Drop every pending timer (start of a call, disposal).
    pub fn clear(&mut self) {
        self.heap.clear();
        self.live.clear();
    }
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_order() {
        let mut q = TimerQueue::new();
        let slow = q.schedule(0, 50, None);
        let fast = q.schedule(0, 10, None);
        assert_eq!(q.pop_next().unwrap().id, fast);
        assert_eq!(q.pop_next().unwrap().id, slow);
        assert!(q.pop_next().is_none());
    }

    #[test]
    fn test_same_deadline_fires_in_creation_order() {
        let mut q = TimerQueue::new();
        let first = q.schedule(0, 5, None);
        let second = q.schedule(0, 5, None);
        assert_eq!(q.pop_next().unwrap().id, first);
        assert_eq!(q.pop_next().unwrap().id, second);
    }

    #[test]
    fn test_cancelled_timer_is_skipped() {
        let mut q = TimerQueue::new();
        let id = q.schedule(0, 10, None);
        q.cancel(id);
        assert!(q.pop_next().is_none());
    }

    #[test]
    fn test_interval_reschedules_until_cancelled() {
        let mut q = TimerQueue::new();
        let id = q.schedule(0, 10, Some(10));
        let fired = q.pop_next().unwrap();
        assert_eq!(fired.id, id);
        q.reschedule(&fired, fired.due_ms);
        let again = q.pop_next().unwrap();
        assert_eq!(again.id, id);
        assert_eq!(again.due_ms, 20);
        q.cancel(id);
        q.reschedule(&again, again.due_ms);
        assert!(q.pop_next().is_none());
    }
}
