//! Execution supervision
//!
//! Owns the build -> launch -> wait sequence for a single request, enforces
//! the wall-clock timeout, classifies the outcome, and tears the sandbox
//! down on every path. All failures become outcomes; nothing escapes as an
//! unhandled error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::RunnerConfig;
use crate::error::RunnerError;
use crate::languages::LanguageRegistry;
use crate::protocol::{ExecutionOutcome, ExecutionRequest, StatusCode};
use crate::sandbox::{IsolationLauncher, SandboxBuilder, SandboxContext};

/// Message for a zero-exit run whose stdout held no parseable JSON
const NO_RESULT_MESSAGE: &str = "no result was obtained";

/// Per-stream cap on captured guest output. Anything beyond this is drained
/// and discarded so the guest never blocks on a full pipe.
const MAX_CAPTURE_BYTES: u64 = 1024 * 1024;

/// Seam between the dispatcher and the actual execution engine
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, request: &ExecutionRequest) -> ExecutionOutcome;
}

/// Classified terminal state, before duration is attached
struct Classified {
    status: StatusCode,
    payload: Option<Value>,
    message: String,
}

pub struct Supervisor {
    config: Arc<RunnerConfig>,
    registry: Arc<LanguageRegistry>,
    builder: SandboxBuilder,
    launcher: IsolationLauncher,
}

impl Supervisor {
    pub fn new(config: Arc<RunnerConfig>, registry: Arc<LanguageRegistry>) -> Self {
        Self {
            builder: SandboxBuilder::new(config.clone(), registry.clone()),
            launcher: IsolationLauncher::new(config.clone()),
            config,
            registry,
        }
    }

    /// Run one request through its full lifecycle. The sandbox root is
    /// deleted exactly once on every path out of this function.
    pub async fn run(&self, request: &ExecutionRequest) -> ExecutionOutcome {
        let started = Instant::now();

        let result = match self.builder.build(request).await {
            Ok(context) => {
                let result = self.supervise(&context, request).await;
                // Unconditional: success, failure, and timeout all land here
                context.teardown();
                result
            }
            Err(e) => Err(e),
        };

        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(classified) => ExecutionOutcome {
                status: classified.status,
                payload: classified.payload,
                message: classified.message,
                duration_ms,
            },
            Err(e) => {
                warn!("Execution failed before completion: {}", e);
                ExecutionOutcome {
                    status: e.status_code(),
                    payload: None,
                    message: e.to_string(),
                    duration_ms,
                }
            }
        }
    }

    async fn supervise(
        &self,
        context: &SandboxContext,
        request: &ExecutionRequest,
    ) -> Result<Classified, RunnerError> {
        let spec = self.registry.get(&request.language)?;
        let limit_secs = request
            .timeout
            .unwrap_or(self.config.default_timeout_secs)
            .clamp(1, self.config.max_timeout_secs);

        let mut running = self.launcher.launch(context, request, spec).await?;
        let child = &mut running.child;
        let pid = child.id();

        // Drain both streams concurrently so a chatty guest cannot dead-lock
        // on a full pipe while we wait for exit
        let stdout_task = tokio::spawn(read_stream(child.stdout.take()));
        let stderr_task = tokio::spawn(read_stream(child.stderr.take()));

        let exit = match timeout(Duration::from_secs(limit_secs), child.wait()).await {
            Ok(status) => Some(status.map_err(RunnerError::Io)?),
            Err(_) => {
                // Timer fired: kill the entire process group so nothing the
                // guest forked outlives the sandbox, then reap
                kill_process_group(pid);
                let _ = child.wait().await;
                None
            }
        };

        let (stdout, stdout_truncated) = stdout_task.await.unwrap_or_default();
        let (stderr, stderr_truncated) = stderr_task.await.unwrap_or_default();

        let mut classified = match exit {
            Some(exit) => classify_exit(&exit, &stdout, &stderr, limit_secs),
            None => Classified {
                status: StatusCode::ExecuteTimeout,
                payload: None,
                message: timeout_message(limit_secs),
            },
        };
        if (stdout_truncated || stderr_truncated) && classified.status != StatusCode::Ok {
            classified.message.push_str(" (output truncated)");
        }
        Ok(classified)
    }
}

#[async_trait]
impl Executor for Supervisor {
    async fn execute(&self, request: &ExecutionRequest) -> ExecutionOutcome {
        self.run(request).await
    }
}

fn timeout_message(limit_secs: u64) -> String {
    format!("execution timed out after {} seconds", limit_secs)
}

/// Capture a guest stream up to [`MAX_CAPTURE_BYTES`], then keep draining so
/// the guest never stalls on a full pipe. Returns the captured text and
/// whether anything was dropped.
async fn read_stream<R>(reader: Option<R>) -> (String, bool)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut buf = Vec::new();
    let mut truncated = false;
    if let Some(reader) = reader {
        let mut capped = reader.take(MAX_CAPTURE_BYTES + 1);
        let _ = capped.read_to_end(&mut buf).await;
        if buf.len() as u64 > MAX_CAPTURE_BYTES {
            truncated = true;
            buf.truncate(MAX_CAPTURE_BYTES as usize);
        }
        let mut rest = capped.into_inner();
        let _ = tokio::io::copy(&mut rest, &mut tokio::io::sink()).await;
    }
    (String::from_utf8_lossy(&buf).into_owned(), truncated)
}

fn kill_process_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!("killpg({}) failed: {}", pid, e);
        }
    }
}

/// Map a reaped exit status onto the outcome taxonomy.
fn classify_exit(
    exit: &std::process::ExitStatus,
    stdout: &str,
    stderr: &str,
    limit_secs: u64,
) -> Classified {
    use std::os::unix::process::ExitStatusExt;

    if let Some(signal) = exit.signal() {
        // An external SIGKILL is indistinguishable from a timeout kill for
        // the caller; any other signal is an execution failure
        if signal == Signal::SIGKILL as i32 {
            return Classified {
                status: StatusCode::ExecuteTimeout,
                payload: None,
                message: timeout_message(limit_secs),
            };
        }
        return Classified {
            status: StatusCode::ExecuteFailed,
            payload: None,
            message: format!("process terminated by signal {}", signal),
        };
    }

    match exit.code() {
        Some(0) => match serde_json::from_str::<Value>(stdout.trim()) {
            Ok(value) => Classified {
                status: StatusCode::Ok,
                payload: Some(value),
                message: "success".to_string(),
            },
            Err(_) => Classified {
                status: StatusCode::ExecuteFailed,
                payload: None,
                message: NO_RESULT_MESSAGE.to_string(),
            },
        },
        Some(code) => {
            let status = StatusCode::from_exit_code(code).unwrap_or(StatusCode::ExecuteFailed);
            let mut message = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            if message.is_empty() {
                message = format!("process exited with code {}", code);
            }
            Classified {
                status,
                payload: None,
                message,
            }
        }
        None => Classified {
            status: StatusCode::ExecuteFailed,
            payload: None,
            message: "process exited abnormally".to_string(),
        },
    }
}
