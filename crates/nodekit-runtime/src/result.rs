//! Execution request and result types.
//!
//! An [`ExecutionResult`] is the transferable outcome of one `execute`
//! call: it is plain data (`serde`-serializable) so it can cross the
//! worker boundary in isolated mode unchanged.

use serde::{Deserialize, Serialize};

/// Per-call options for `execute`.
#[derive(Default)]
pub struct ExecuteOptions {
    /// Virtual filename for the synthetic entry module (default `main.js`).
    /// Resolved against the runtime's working directory; relative requires
    /// from the entry resolve against that directory.
    pub filename: Option<String>,

    /// Arguments surfaced as `process.argv` beyond the implicit
    /// `["node", <entry>]` prefix.
    pub argv: Vec<String>,

    /// Streaming log callback, invoked once per console line in call order
    /// while the call is still running. The full sequence is also returned
    /// in [`ExecutionResult::logs`].
    pub on_log: Option<Box<dyn FnMut(&str) + Send>>,
}

impl std::fmt::Debug for ExecuteOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecuteOptions")
            .field("filename", &self.filename)
            .field("argv", &self.argv)
            .field("on_log", &self.on_log.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

/// The outcome of one `execute` call.
///
/// `ok == true` implies `error` is `None`; `ok == false` implies `data` is
/// `None`. `logs` is always present, including partial logs collected
/// before a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub ok: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,

    pub logs: Vec<String>,
}

impl ExecutionResult {
    pub fn success(data: Option<serde_json::Value>, logs: Vec<String>) -> Self {
        Self {
            ok: true,
            data,
            error: None,
            logs,
        }
    }

    pub fn failure(error: ErrorPayload, logs: Vec<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error),
            logs,
        }
    }
}

/// A guest failure in transferable form: either plain text (for non-object
/// throws) or a structured error that host UIs can render field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorPayload {
    Text(String),
    Structured(StructuredError),
}

impl ErrorPayload {
    /// The human-readable message regardless of form.
    pub fn message(&self) -> &str {
        match self {
            ErrorPayload::Text(s) => s,
            ErrorPayload::Structured(e) => &e.message,
        }
    }
}

impl std::fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorPayload::Text(s) => write!(f, "{}", s),
            ErrorPayload::Structured(e) => write!(f, "{}: {}", e.name, e.message),
        }
    }
}

/// A thrown guest error preserved in structured form, not merely
/// stringified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredError {
    /// Error class name (`TypeError`, `Error`, ...) or a runtime-assigned
    /// classification for non-throw failures.
    pub name: String,

    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,

    /// Enumerable own properties of the thrown object beyond
    /// name/message/stack, marshaled best-effort.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl StructuredError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            properties: serde_json::Map::new(),
        }
    }
}
