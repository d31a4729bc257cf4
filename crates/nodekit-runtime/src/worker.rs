//! Isolated execution mode.
//!
//! The same components as direct mode, hosted on a dedicated worker
//! thread that owns the VM context; the host talks to it only through a
//! request/streaming-log/result message protocol. Every message is plain
//! serializable data; the marshaler's output is the only thing that
//! crosses this boundary. Terminating the worker is the only cancellation
//! primitive and is treated as a crash.

use std::thread::JoinHandle;

use crossbeam::channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};

use nodekit_vfs::MemFs;

use crate::error::RuntimeError;
use crate::host::RuntimeOptions;
use crate::result::{ExecuteOptions, ExecutionResult};
use crate::session::Runtime;

/// Host-to-worker messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkerRequest {
    Execute {
        id: u64,
        code: String,
        filename: Option<String>,
        argv: Vec<String>,
    },
    Reset {
        id: u64,
    },
    Shutdown,
}

/// Worker-to-host messages. One `Execute` produces zero or more `Log`
/// messages followed by exactly one terminal `Result` (or `Fatal` for an
/// infrastructure fault inside the worker).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkerResponse {
    Log { id: u64, line: String },
    Result { id: u64, result: ExecutionResult },
    ResetDone { id: u64 },
    Fatal { id: u64, message: String },
}

/// Handle to a worker-hosted runtime. Dropping it shuts the worker down.
pub struct WorkerHandle {
    tx: Sender<WorkerRequest>,
    rx: Receiver<WorkerResponse>,
    next_id: u64,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawn the worker and wait for its runtime to come up.
    pub fn spawn(options: RuntimeOptions, fs: MemFs) -> Result<Self, RuntimeError> {
        let (req_tx, req_rx) = unbounded::<WorkerRequest>();
        let (resp_tx, resp_rx) = unbounded::<WorkerResponse>();
        let (init_tx, init_rx) = unbounded::<Result<(), String>>();

        let thread = std::thread::Builder::new()
            .name("nodekit-worker".to_string())
            .spawn(move || worker_main(options, fs, req_rx, resp_tx, init_tx))
            .map_err(|err| RuntimeError::WorkerGone(err.to_string()))?;

        match init_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                tx: req_tx,
                rx: resp_rx,
                next_id: 1,
                thread: Some(thread),
            }),
            Ok(Err(message)) => Err(RuntimeError::Engine(message)),
            Err(_) => Err(RuntimeError::WorkerGone(
                "worker exited before initialization".to_string(),
            )),
        }
    }

    /// Execute on the worker; blocks until the terminal result arrives,
    /// forwarding streamed log lines to `options.on_log` as they come in.
    pub fn execute(
        &mut self,
        code: &str,
        options: ExecuteOptions,
    ) -> Result<ExecutionResult, RuntimeError> {
        let id = self.next_id;
        self.next_id += 1;

        let mut on_log = options.on_log;
        self.tx
            .send(WorkerRequest::Execute {
                id,
                code: code.to_string(),
                filename: options.filename,
                argv: options.argv,
            })
            .map_err(|_| RuntimeError::WorkerGone("request channel closed".to_string()))?;

        loop {
            let response = self
                .rx
                .recv()
                .map_err(|_| RuntimeError::WorkerGone("response channel closed".to_string()))?;
            match response {
                WorkerResponse::Log { id: msg_id, line } if msg_id == id => {
                    if let Some(cb) = on_log.as_mut() {
                        cb(&line);
                    }
                }
                WorkerResponse::Result { id: msg_id, result } if msg_id == id => {
                    return Ok(result);
                }
                WorkerResponse::Fatal { id: msg_id, message } if msg_id == id => {
                    return Err(RuntimeError::Engine(message));
                }
                // Stale messages from an abandoned call are dropped.
                _ => {}
            }
        }
    }

    /// Reset the worker's runtime (drops its module cache).
    pub fn reset(&mut self) -> Result<(), RuntimeError> {
        let id = self.next_id;
        self.next_id += 1;
        self.tx
            .send(WorkerRequest::Reset { id })
            .map_err(|_| RuntimeError::WorkerGone("request channel closed".to_string()))?;
        loop {
            let response = self
                .rx
                .recv()
                .map_err(|_| RuntimeError::WorkerGone("response channel closed".to_string()))?;
            match response {
                WorkerResponse::ResetDone { id: msg_id } if msg_id == id => return Ok(()),
                WorkerResponse::Fatal { id: msg_id, message } if msg_id == id => {
                    return Err(RuntimeError::Engine(message));
                }
                _ => {}
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        let _ = self.tx.send(WorkerRequest::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Worker thread body: owns the runtime, processes requests strictly in
/// order (the channel is the call-serialization queue in this mode).
fn worker_main(
    options: RuntimeOptions,
    fs: MemFs,
    requests: Receiver<WorkerRequest>,
    responses: Sender<WorkerResponse>,
    init: Sender<Result<(), String>>,
) {
    let mut runtime = match Runtime::new(options, fs) {
        Ok(runtime) => {
            let _ = init.send(Ok(()));
            runtime
        }
        Err(err) => {
            let _ = init.send(Err(err.to_string()));
            return;
        }
    };

    for request in requests {
        match request {
            WorkerRequest::Execute {
                id,
                code,
                filename,
                argv,
            } => {
                let log_tx = responses.clone();
                let exec_options = ExecuteOptions {
                    filename,
                    argv,
                    on_log: Some(Box::new(move |line: &str| {
                        let _ = log_tx.send(WorkerResponse::Log {
                            id,
                            line: line.to_string(),
                        });
                    })),
                };
                let message = match runtime.execute(&code, exec_options) {
                    Ok(result) => WorkerResponse::Result { id, result },
                    Err(err) => WorkerResponse::Fatal {
                        id,
                        message: err.to_string(),
                    },
                };
                if responses.send(message).is_err() {
                    break;
                }
            }
            WorkerRequest::Reset { id } => {
                let message = match runtime.reset() {
                    Ok(()) => WorkerResponse::ResetDone { id },
                    Err(err) => WorkerResponse::Fatal {
                        id,
                        message: err.to_string(),
                    },
                };
                if responses.send(message).is_err() {
                    break;
                }
            }
            WorkerRequest::Shutdown => break,
        }
    }
    runtime.dispose();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_messages_are_transferable() {
        let request = WorkerRequest::Execute {
            id: 7,
            code: "console.log(1)".to_string(),
            filename: None,
            argv: vec!["--flag".to_string()],
        };
        let encoded = serde_json::to_string(&request).unwrap();
        let decoded: WorkerRequest = serde_json::from_str(&encoded).unwrap();
        match decoded {
            WorkerRequest::Execute { id, code, .. } => {
                assert_eq!(id, 7);
                assert_eq!(code, "console.log(1)");
            }
            other => panic!("unexpected decode: {:?}", other),
        }

        let response = WorkerResponse::Log {
            id: 7,
            line: "hello".to_string(),
        };
        let encoded = serde_json::to_string(&response).unwrap();
        let decoded: WorkerResponse = serde_json::from_str(&encoded).unwrap();
        match decoded {
            WorkerResponse::Log { id, line } => {
                assert_eq!(id, 7);
                assert_eq!(line, "hello");
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }
}
