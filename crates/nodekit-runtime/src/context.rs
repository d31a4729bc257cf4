//! VM context lifecycle.
//!
//! One engine context per runtime instance, created with the module
//! loader, the bounded job executor, and the host bridge already wired,
//! then bootstrapped with the global surface. Disposal is idempotent:
//! teardown can be reached from success, guest-fatal, and host-error
//! paths, and every registered resource is released exactly once
//! regardless of which path got there first.

use std::rc::Rc;

use boa_engine::context::ContextBuilder;
use boa_engine::{js_string, Context, JsObject, JsResult, JsValue, Source};

use nodekit_vfs::MemFs;

use crate::bridge;
use crate::builtins::BOOTSTRAP;
use crate::error::RuntimeError;
use crate::host::{CallState, HostHandle, HostState, RuntimeOptions};
use crate::jobs::BoundedJobExecutor;
use crate::loader::VfsModuleLoader;

/// Audit bookkeeping for exactly-once resource release.
///
/// Ownership (RAII) does the actual releasing; the registry records what
/// was wired during creation and proves at disposal that nothing is
/// released twice or left behind.
pub struct HandleRegistry {
    entries: Vec<HandleEntry>,
}

struct HandleEntry {
    name: &'static str,
    released: bool,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register a resource acquired during context creation.
    pub fn register(&mut self, name: &'static str) {
        self.entries.push(HandleEntry {
            name,
            released: false,
        });
    }

    /// Mark every live handle released; returns how many this call
    /// released. A second call releases nothing.
    pub fn release_all(&mut self) -> usize {
        let mut released = 0;
        for entry in &mut self.entries {
            if !entry.released {
                entry.released = true;
                released += 1;
            }
        }
        released
    }

    /// Handles registered and not yet released.
    pub fn live(&self) -> usize {
        self.entries.iter().filter(|e| !e.released).count()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|e| e.name)
    }
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// One interpreter context plus its injected globals and module cache.
pub struct VmContext {
    context: Option<Context>,
    host: HostHandle,
    executor: Rc<BoundedJobExecutor>,
    host_obj: Option<JsObject>,
    handles: HandleRegistry,
}

impl VmContext {
    /// Build a ready context: module loader, bounded executor, runtime
    /// limits, `__host` natives, bootstrap globals.
    pub fn create(options: RuntimeOptions, fs: MemFs) -> Result<Self, RuntimeError> {
        let host = HostHandle::new(HostState::new(fs, options.clone()));
        let executor = BoundedJobExecutor::new(options.max_microtasks);
        let loader = Rc::new(VfsModuleLoader::new(host.clone()));

        let mut context = ContextBuilder::default()
            .module_loader(loader)
            .job_executor(executor.clone())
            .build()
            .map_err(|err| RuntimeError::Engine(err.to_string()))?;

        context
            .runtime_limits_mut()
            .set_recursion_limit(options.recursion_limit);
        context
            .runtime_limits_mut()
            .set_loop_iteration_limit(options.loop_iteration_limit);

        let mut handles = HandleRegistry::new();
        handles.register("job-executor");
        handles.register("module-loader");

        let host_obj = bridge::install(&host, &mut context)
            .map_err(|err| RuntimeError::Engine(err.to_string()))?;
        handles.register("host-bridge");

        context
            .eval(Source::from_bytes(BOOTSTRAP.as_bytes()))
            .map_err(|err| RuntimeError::Engine(err.to_string()))?;
        handles.register("bootstrap-globals");
        handles.register("timer-queue");
        handles.register("module-cache");

        Ok(Self {
            context: Some(context),
            host,
            executor,
            host_obj: Some(host_obj),
            handles,
        })
    }

    pub fn host(&self) -> &HostHandle {
        &self.host
    }

    pub fn executor(&self) -> &BoundedJobExecutor {
        &self.executor
    }

    pub fn is_disposed(&self) -> bool {
        self.context.is_none()
    }

    /// The live engine context, or `Disposed` after teardown.
    pub fn engine(&mut self) -> Result<&mut Context, RuntimeError> {
        self.context.as_mut().ok_or(RuntimeError::Disposed)
    }

    /// Begin servicing one `execute` call: fresh log stream, fresh timer
    /// queue, fresh job budget.
    pub fn begin_call(
        &mut self,
        argv: Vec<String>,
        on_log: Option<Box<dyn FnMut(&str) + Send>>,
    ) -> Result<(), RuntimeError> {
        if self.context.is_none() {
            return Err(RuntimeError::Disposed);
        }
        let budget = {
            let mut state = self.host.state_mut();
            if state.call.is_some() {
                return Err(RuntimeError::Reentered);
            }
            state.timers.clear();
            state.exit_code = None;
            state.call = Some(CallState {
                logs: Vec::new(),
                on_log,
                argv,
            });
            state.options.max_microtasks
        };
        self.executor.reset(budget);
        Ok(())
    }

    /// Finish the call and take its collected logs and exit code.
    pub fn end_call(&mut self) -> (Vec<String>, Option<i32>) {
        let mut state = self.host.state_mut();
        let logs = state.call.take().map(|call| call.logs).unwrap_or_default();
        let exit = state.exit_code.take();
        (logs, exit)
    }

    /// Invoke the guest-side timer dispatcher for a due timer id.
    pub fn fire_timer(&mut self, id: u64) -> JsResult<JsValue> {
        let host_obj = match &self.host_obj {
            Some(obj) => obj.clone(),
            None => return Ok(JsValue::undefined()),
        };
        let context = match self.context.as_mut() {
            Some(ctx) => ctx,
            None => return Ok(JsValue::undefined()),
        };
        let fire = host_obj.get(js_string!("__fireTimer"), context)?;
        let Some(fire) = fire.as_object() else {
            return Ok(JsValue::undefined());
        };
        fire.call(
            &JsValue::undefined(),
            &[JsValue::from(id as f64)],
            context,
        )
    }

    /// Release everything exactly once. Safe to call repeatedly and
    /// after guest-fatal errors; later `execute` calls see `Disposed`.
    pub fn dispose(&mut self) {
        if self.context.is_none() {
            return;
        }
        {
            let mut state = self.host.state_mut();
            state.modules.clear();
            state.timers.clear();
            state.call = None;
        }
        self.host_obj = None;
        self.context = None;
        let released = self.handles.release_all();
        log::debug!(
            "vm context disposed, released {} handles: {}",
            released,
            self.handles.names().collect::<Vec<_>>().join(", ")
        );
        debug_assert_eq!(self.handles.live(), 0);
    }
}

impl Drop for VmContext {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_registry_releases_once() {
        let mut handles = HandleRegistry::new();
        handles.register("a");
        handles.register("b");
        assert_eq!(handles.live(), 2);
        assert_eq!(handles.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(handles.release_all(), 2);
        assert_eq!(handles.release_all(), 0);
        assert_eq!(handles.live(), 0);
        // The audit trail survives release; only liveness changes.
        assert_eq!(handles.names().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_create_and_dispose_idempotent() {
        let fs = MemFs::new();
        let mut vm = VmContext::create(RuntimeOptions::default(), fs).unwrap();
        assert!(!vm.is_disposed());
        vm.dispose();
        assert!(vm.is_disposed());
        vm.dispose(); // second call is a no-op
        assert!(vm.is_disposed());
        assert!(matches!(vm.engine(), Err(RuntimeError::Disposed)));
    }

    #[test]
    fn test_begin_call_guards_reentry() {
        let fs = MemFs::new();
        let mut vm = VmContext::create(RuntimeOptions::default(), fs).unwrap();
        vm.begin_call(vec!["node".to_string()], None).unwrap();
        assert!(matches!(
            vm.begin_call(vec!["node".to_string()], None),
            Err(RuntimeError::Reentered)
        ));
        let (logs, exit) = vm.end_call();
        assert!(logs.is_empty());
        assert!(exit.is_none());
    }
}
