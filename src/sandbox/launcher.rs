//! Isolated process launch
//!
//! Wraps the interpreter invocation in bubblewrap: private mount, PID, UTS,
//! IPC, and user namespaces, read-only binds of the host runtime directories
//! and the sandbox's own `code/` and `etc/`, an unprivileged uid/gid, and a
//! cleared environment restricted to the language's allow-list. The network
//! namespace is unshared unless the request opts in.

use std::process::Stdio;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::debug;

use crate::config::RunnerConfig;
use crate::error::RunnerError;
use crate::languages::LanguageSpec;
use crate::protocol::ExecutionRequest;

use super::builder::SandboxContext;

/// PATH visible inside the sandbox
const SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Host directories the interpreter needs, bound read-only. The try-variant
/// tolerates hosts without e.g. /opt or /lib64.
const RUNTIME_BINDS: &[&str] = &["/usr", "/opt", "/lib", "/lib64"];

/// Handle to a launched sandboxed process
pub struct RunningSandbox {
    pub child: Child,
}

pub struct IsolationLauncher {
    config: Arc<RunnerConfig>,
}

impl IsolationLauncher {
    pub fn new(config: Arc<RunnerConfig>) -> Self {
        Self { config }
    }

    /// Check that bubblewrap is present; the service refuses to start
    /// without it.
    pub async fn ensure_available(&self) -> anyhow::Result<()> {
        match Command::new(&self.config.bwrap_path)
            .arg("--version")
            .output()
            .await
        {
            Ok(output) if output.status.success() => Ok(()),
            _ => anyhow::bail!(
                "bubblewrap ({}) is required but was not found",
                self.config.bwrap_path.display()
            ),
        }
    }

    /// Build the bwrap argument list for a request. Split out from
    /// [`IsolationLauncher::launch`] so the invocation can be inspected
    /// without spawning anything.
    pub fn build_args(
        &self,
        context: &SandboxContext,
        request: &ExecutionRequest,
        spec: &LanguageSpec,
    ) -> Result<Vec<String>, RunnerError> {
        // Fails closed: no interpreter command, no process
        if spec.interpreter.is_empty() {
            return Err(RunnerError::UnsupportedLanguage(spec.name.clone()));
        }

        let mut args: Vec<String> = [
            "--unshare-user",
            "--unshare-pid",
            "--unshare-uts",
            "--unshare-ipc",
            "--die-with-parent",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        if !request.network_enabled {
            args.push("--unshare-net".to_string());
        }

        for dir in RUNTIME_BINDS {
            args.extend([
                "--ro-bind-try".to_string(),
                dir.to_string(),
                dir.to_string(),
            ]);
        }

        // The sandbox's own views of /code and /etc, plus a writable /tmp
        args.extend([
            "--ro-bind".to_string(),
            context.code_dir().display().to_string(),
            "/code".to_string(),
            "--ro-bind".to_string(),
            context.etc_dir().display().to_string(),
            "/etc".to_string(),
            "--bind".to_string(),
            context.tmp_dir().display().to_string(),
            "/tmp".to_string(),
            "--proc".to_string(),
            "/proc".to_string(),
            "--dev".to_string(),
            "/dev".to_string(),
        ]);

        args.extend([
            "--uid".to_string(),
            self.config.sandbox_uid.to_string(),
            "--gid".to_string(),
            self.config.sandbox_gid.to_string(),
            "--chdir".to_string(),
            "/code".to_string(),
        ]);

        args.push("--clearenv".to_string());
        args.extend([
            "--setenv".to_string(),
            "PATH".to_string(),
            SANDBOX_PATH.to_string(),
            "--setenv".to_string(),
            "HOME".to_string(),
            "/code".to_string(),
        ]);
        for entry in &spec.env {
            if let Some((key, value)) = entry.split_once('=') {
                args.extend([
                    "--setenv".to_string(),
                    key.to_string(),
                    value.to_string(),
                ]);
            }
        }

        args.push("--".to_string());
        args.extend(spec.interpreter.iter().cloned());
        args.push(context.code_entry.clone());

        Ok(args)
    }

    /// Spawn the isolated interpreter and stream the request args to its
    /// stdin. Stdin is the sole channel carrying caller data into the
    /// sandbox besides the rendered code file.
    pub async fn launch(
        &self,
        context: &SandboxContext,
        request: &ExecutionRequest,
        spec: &LanguageSpec,
    ) -> Result<RunningSandbox, RunnerError> {
        let args = self.build_args(context, request, spec)?;
        debug!("Launching bwrap with args: {:?}", args);

        let mut command = Command::new(&self.config.bwrap_path);
        command
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Own process group so the supervisor can kill everything the
            // guest spawned with a single signal
            .process_group(0)
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(RunnerError::Launch)?;

        let payload = serde_json::to_vec(&request.args)
            .map_err(|e| RunnerError::Internal(format!("failed to encode args: {}", e)))?;
        if let Some(mut stdin) = child.stdin.take() {
            // Written on its own task: a payload larger than the pipe buffer
            // to a guest that never reads stdin must not stall the launch
            // path. The writer unblocks with EPIPE when the guest exits or
            // is killed.
            tokio::spawn(async move {
                let _ = stdin.write_all(&payload).await;
                let _ = stdin.shutdown().await;
            });
        }

        Ok(RunningSandbox { child })
    }
}
