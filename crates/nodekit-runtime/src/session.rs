//! Execution sessions (direct mode).
//!
//! `Runtime::execute` wraps the submitted code as a synthetic entry
//! module, evaluates it, then drains pending asynchronous work to a fixed
//! point: run the engine's job queue, fire the earliest due virtual
//! timer, repeat. Both halves are budgeted, so guest code that never
//! settles produces a caught resource-exhaustion failure instead of
//! hanging the host. Guest faults never escape as Rust errors; only
//! infrastructure misuse does.

use boa_engine::builtins::promise::PromiseState;
use boa_engine::{js_string, JsError, JsString, JsValue};

use nodekit_vfs::{path as vpath, MemFs};

use crate::bridge::EXIT_MARKER;
use crate::context::VmContext;
use crate::error::{GuestErrorKind, RuntimeError};
use crate::host::RuntimeOptions;
use crate::loader;
use crate::marshal;
use crate::resolver::{classify_source, ModuleKind};
use crate::result::{ErrorPayload, ExecuteOptions, ExecutionResult, StructuredError};

/// Outcome of the guest-visible part of a call.
type CallOutcome = Result<Option<serde_json::Value>, ErrorPayload>;

/// How a thrown engine error should be treated by the session.
enum GuestFault {
    /// `process.exit` unwound the stack; not a failure by itself.
    Exit,
    Payload(ErrorPayload),
}

/// A direct-mode runtime: one VM context, reused across `execute` calls,
/// so the module cache persists until the instance is reset or disposed.
pub struct Runtime {
    vm: VmContext,
    options: RuntimeOptions,
    fs: MemFs,
}

impl Runtime {
    pub fn new(options: RuntimeOptions, fs: MemFs) -> Result<Self, RuntimeError> {
        let vm = VmContext::create(options.clone(), fs.clone())?;
        Ok(Self { vm, options, fs })
    }

    /// The shared virtual filesystem handle (the seam host collaborators
    /// use to populate files before executing).
    pub fn fs(&self) -> MemFs {
        self.fs.clone()
    }

    /// Tear down and rebuild the VM context, dropping the module cache.
    pub fn reset(&mut self) -> Result<(), RuntimeError> {
        self.vm.dispose();
        self.vm = VmContext::create(self.options.clone(), self.fs.clone())?;
        Ok(())
    }

    /// Dispose the context; subsequent calls return `Disposed`.
    pub fn dispose(&mut self) {
        self.vm.dispose();
    }

    /// Execute one guest program. Never returns `Err` for guest-code
    /// faults; those come back as `ExecutionResult { ok: false }`.
    pub fn execute(
        &mut self,
        code: &str,
        options: ExecuteOptions,
    ) -> Result<ExecutionResult, RuntimeError> {
        let filename = options
            .filename
            .unwrap_or_else(|| "main.js".to_string());
        let entry_path = vpath::join(&self.options.cwd, &filename);

        let mut argv = vec!["node".to_string(), entry_path.clone()];
        argv.extend(options.argv);

        self.vm.begin_call(argv, options.on_log)?;
        let outcome = self.run_call(code, &entry_path);
        let (logs, exit) = self.vm.end_call();
        let outcome = outcome?;

        if let Some(code) = exit {
            if code == 0 {
                return Ok(ExecutionResult::success(None, logs));
            }
            let mut error = StructuredError::new(
                "ProcessExit",
                format!("process exited with code {}", code),
            );
            error
                .properties
                .insert("code".to_string(), serde_json::json!(code));
            return Ok(ExecutionResult::failure(
                ErrorPayload::Structured(error),
                logs,
            ));
        }

        Ok(match outcome {
            Ok(data) => ExecutionResult::success(data, logs),
            Err(error) => ExecutionResult::failure(error, logs),
        })
    }

    /// Evaluate the synthetic entry module and drain to a fixed point.
    fn run_call(&mut self, code: &str, entry_path: &str) -> Result<CallOutcome, RuntimeError> {
        // Entry kind follows the same classification as any module, but
        // defaults to ES when neither system's syntax appears.
        match classify_source(code, ModuleKind::Es) {
            ModuleKind::CommonJs => self.run_entry_cjs(code, entry_path),
            _ => self.run_entry_es(code, entry_path),
        }
    }

    fn run_entry_cjs(&mut self, code: &str, entry_path: &str) -> Result<CallOutcome, RuntimeError> {
        let host = self.vm.host().clone();
        let evaluated = {
            let context = self.vm.engine()?;
            loader::evaluate_entry_cjs(&host, context, code, entry_path)
        };

        let exports = match evaluated {
            Ok(exports) => exports,
            Err(err) => {
                return Ok(match self.classify_fault(&err)? {
                    GuestFault::Exit => Ok(None),
                    GuestFault::Payload(payload) => Err(payload),
                })
            }
        };

        if let Err(payload) = self.drain()? {
            return Ok(Err(payload));
        }
        self.marshal_data(&exports)
    }

    fn run_entry_es(&mut self, code: &str, entry_path: &str) -> Result<CallOutcome, RuntimeError> {
        let parsed = {
            let context = self.vm.engine()?;
            loader::parse_entry_es(context, code, entry_path)
        };
        let module = match parsed {
            Ok(module) => module,
            Err(err) => {
                return Ok(match self.classify_fault(&err)? {
                    GuestFault::Exit => Ok(None),
                    GuestFault::Payload(payload) => Err(payload),
                })
            }
        };

        let promise = {
            let context = self.vm.engine()?;
            module.load_link_evaluate(context)
        };

        if let Err(payload) = self.drain()? {
            return Ok(Err(payload));
        }

        match promise.state() {
            PromiseState::Fulfilled(_) => {
                let default = {
                    let context = self.vm.engine()?;
                    let namespace = module.namespace(context);
                    namespace.get(js_string!("default"), context)
                };
                match default {
                    Ok(value) => self.marshal_data(&value),
                    Err(err) => Ok(match self.classify_fault(&err)? {
                        GuestFault::Exit => Ok(None),
                        GuestFault::Payload(payload) => Err(payload),
                    }),
                }
            }
            PromiseState::Rejected(value) => {
                let fault = self.classify_fault_value(&value)?;
                Ok(match fault {
                    GuestFault::Exit => Ok(None),
                    GuestFault::Payload(payload) => Err(payload),
                })
            }
            PromiseState::Pending => {
                if self.vm.executor().exhausted() {
                    return Ok(Err(resource_exhausted("microtask budget exceeded")));
                }
                Ok(Err(ErrorPayload::Structured(StructuredError::new(
                    GuestErrorKind::Evaluation.name(),
                    "top-level await did not settle before the job queue drained",
                ))))
            }
        }
    }

    /// Run jobs and fire due timers until neither remains, or a budget
    /// trips, or the guest exits.
    fn drain(&mut self) -> Result<Result<(), ErrorPayload>, RuntimeError> {
        let max_ticks = self.options.max_timer_ticks;
        let mut ticks = 0usize;

        loop {
            let jobs = {
                let context = self.vm.engine()?;
                context.run_jobs()
            };
            if let Err(err) = jobs {
                return Ok(match self.classify_fault(&err)? {
                    GuestFault::Exit => Ok(()),
                    GuestFault::Payload(payload) => Err(payload),
                });
            }
            if self.vm.executor().exhausted() {
                return Ok(Err(resource_exhausted("microtask budget exceeded")));
            }
            if self.vm.host().state().exit_code.is_some() {
                return Ok(Ok(()));
            }

            let timer = self.vm.host().state_mut().timers.pop_next();
            let Some(timer) = timer else {
                return Ok(Ok(()));
            };

            ticks += 1;
            if ticks > max_ticks {
                return Ok(Err(resource_exhausted("timer budget exceeded")));
            }

            // The virtual clock jumps to the deadline; no host sleeping.
            {
                let mut state = self.vm.host().state_mut();
                state.clock_ms = state.clock_ms.max(timer.due_ms);
            }

            if let Err(err) = self.vm.fire_timer(timer.id) {
                return Ok(match self.classify_fault(&err)? {
                    GuestFault::Exit => Ok(()),
                    GuestFault::Payload(payload) => Err(payload),
                });
            }

            let mut state = self.vm.host().state_mut();
            let now = state.clock_ms;
            state.timers.reschedule(&timer, now);
        }
    }

    fn marshal_data(&mut self, value: &JsValue) -> Result<CallOutcome, RuntimeError> {
        if value.is_undefined() {
            return Ok(Ok(None));
        }
        let context = self.vm.engine()?;
        Ok(match marshal::value_to_json(value, context) {
            Ok(data) => Ok(Some(data)),
            Err(err) => Err(ErrorPayload::Structured(StructuredError::new(
                GuestErrorKind::Serialization.name(),
                err.to_string(),
            ))),
        })
    }

    fn classify_fault(&mut self, err: &JsError) -> Result<GuestFault, RuntimeError> {
        let opaque = {
            let context = self.vm.engine()?;
            err.to_opaque(context)
        };
        self.classify_fault_value(&opaque)
    }

    fn classify_fault_value(&mut self, value: &JsValue) -> Result<GuestFault, RuntimeError> {
        let context = self.vm.engine()?;
        if let Some(obj) = value.as_object() {
            if let Ok(marker) = obj.get(JsString::from(EXIT_MARKER), context) {
                if !marker.is_undefined() {
                    return Ok(GuestFault::Exit);
                }
            }
        }
        Ok(GuestFault::Payload(marshal::error_value_to_payload(
            value, context,
        )))
    }
}

fn resource_exhausted(message: &str) -> ErrorPayload {
    ErrorPayload::Structured(StructuredError::new(
        GuestErrorKind::ResourceExhausted.name(),
        message,
    ))
}
