//! Runtime error types.
//!
//! Only host infrastructure faults cross the `execute` boundary as Rust
//! errors. Everything that originates in guest code is folded into an
//! [`crate::ExecutionResult`] with `ok: false`, so host call sites never
//! need exception scaffolding around guest faults.

/// Host-side infrastructure errors.
///
/// These indicate misuse of the runtime by the host (or loss of the worker
/// in isolated mode), never a fault in the guest program.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The VM context was disposed and no longer accepts calls.
    #[error("vm context has been disposed")]
    Disposed,

    /// `execute` was re-entered while another call was in flight on the
    /// same runtime instance.
    #[error("execute() re-entered while a call is in flight")]
    Reentered,

    /// The isolated-mode worker thread is gone (channel closed or panicked).
    #[error("isolated worker is gone: {0}")]
    WorkerGone(String),

    /// The embedded engine failed while building the context.
    #[error("engine setup error: {0}")]
    Engine(String),
}

/// Classification of a guest-visible failure, carried inside the
/// structured error payload as its `name` when no better name exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestErrorKind {
    /// A specifier did not resolve to any module.
    ModuleNotFound,
    /// The guest program (or a module it loaded) threw during evaluation.
    Evaluation,
    /// A host-native function invoked by guest code failed.
    HostBridge,
    /// The produced value could not be converted to a transferable form.
    Serialization,
    /// A drain-loop budget (microtasks or timer ticks) was exceeded.
    ResourceExhausted,
}

impl GuestErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            GuestErrorKind::ModuleNotFound => "ModuleNotFoundError",
            GuestErrorKind::Evaluation => "EvaluationError",
            GuestErrorKind::HostBridge => "HostBridgeError",
            GuestErrorKind::Serialization => "SerializationError",
            GuestErrorKind::ResourceExhausted => "ResourceExhaustedError",
        }
    }
}
