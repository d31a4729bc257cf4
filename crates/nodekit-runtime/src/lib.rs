//! Nodekit execution core.
//!
//! Runs untrusted JavaScript programs inside an embedded interpreter with
//! a Node-compatible surface (virtual filesystem, `require`/`import`
//! across CommonJS and ES modules, process/buffer/crypto/timers) without
//! touching the real operating system.
//!
//! The public entry point is [`Sandbox`]: one VM context per instance,
//! `execute(code, options)` per program. Guest faults always come back as
//! an [`ExecutionResult`] with `ok: false`; only host infrastructure
//! misuse surfaces as [`RuntimeError`].
//!
//! # Example
//!
//! ```rust,ignore
//! use nodekit_runtime::{ExecuteOptions, ExecutionMode, Sandbox};
//! use nodekit_vfs::MemFs;
//!
//! let fs = MemFs::new();
//! fs.write_file("/greet.js", "module.exports = (n) => `hi ${n}`;").unwrap();
//!
//! let mut sandbox = Sandbox::new(ExecutionMode::Direct, Default::default(), fs).unwrap();
//! let result = sandbox
//!     .execute("const greet = require('/greet.js'); export default greet('nodekit');",
//!              ExecuteOptions::default())
//!     .unwrap();
//! assert!(result.ok);
//! ```

mod bridge;
mod builtins;
mod context;
mod error;
mod host;
mod jobs;
mod loader;
mod marshal;
mod resolver;
mod result;
mod session;
mod worker;

pub use builtins::{resolve_builtin, Builtin, BUILTINS};
pub use context::{HandleRegistry, VmContext};
pub use error::{GuestErrorKind, RuntimeError};
pub use host::RuntimeOptions;
pub use loader::{ModuleRegistry, ModuleState};
pub use marshal::{SerializeError, MAX_DEPTH};
pub use resolver::{resolve, ModuleKind, Resolved, ResolveError};
pub use result::{ErrorPayload, ExecuteOptions, ExecutionResult, StructuredError};
pub use session::Runtime;
pub use worker::{WorkerHandle, WorkerRequest, WorkerResponse};

use nodekit_vfs::MemFs;

/// Where the execution core runs relative to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// VM context and module loader run inline with the host thread.
    Direct,
    /// The same components run on a dedicated worker thread behind the
    /// message protocol; log flush granularity is the only observable
    /// difference.
    Isolated,
}

enum SandboxInner {
    Direct(Runtime),
    Isolated(WorkerHandle),
}

/// A runtime instance with a mode-transparent `execute` contract: the
/// same request yields an equivalent result in either mode.
pub struct Sandbox {
    fs: MemFs,
    inner: SandboxInner,
}

impl Sandbox {
    /// Create a sandbox over the given virtual filesystem.
    pub fn new(
        mode: ExecutionMode,
        options: RuntimeOptions,
        fs: MemFs,
    ) -> Result<Self, RuntimeError> {
        let inner = match mode {
            ExecutionMode::Direct => SandboxInner::Direct(Runtime::new(options, fs.clone())?),
            ExecutionMode::Isolated => {
                SandboxInner::Isolated(WorkerHandle::spawn(options, fs.clone())?)
            }
        };
        Ok(Self { fs, inner })
    }

    /// The shared virtual filesystem: the seam host collaborators use to
    /// populate files before calling [`Sandbox::execute`].
    pub fn fs(&self) -> MemFs {
        self.fs.clone()
    }

    /// Execute one guest program. Calls on one instance are serialized;
    /// guest faults come back inside the result, never as `Err`.
    pub fn execute(
        &mut self,
        code: &str,
        options: ExecuteOptions,
    ) -> Result<ExecutionResult, RuntimeError> {
        match &mut self.inner {
            SandboxInner::Direct(runtime) => runtime.execute(code, options),
            SandboxInner::Isolated(worker) => worker.execute(code, options),
        }
    }

    /// Rebuild the VM context, dropping the module cache.
    pub fn reset(&mut self) -> Result<(), RuntimeError> {
        match &mut self.inner {
            SandboxInner::Direct(runtime) => runtime.reset(),
            SandboxInner::Isolated(worker) => worker.reset(),
        }
    }
}
