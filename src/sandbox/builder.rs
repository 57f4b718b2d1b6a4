//! Sandbox construction
//!
//! Builds a fresh directory tree per request (`code/`, `tmp/`, `etc/`),
//! writes a minimal identity for the unprivileged sandbox user, and renders
//! the user's code into the language template. Nothing outside the allocated
//! root is ever touched.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tokio::fs;
use tracing::{debug, warn};

use crate::config::RunnerConfig;
use crate::error::RunnerError;
use crate::languages::LanguageRegistry;
use crate::protocol::ExecutionRequest;

/// User name the sandboxed process resolves to
const SANDBOX_USER: &str = "sandbox";

/// Ephemeral filesystem root for a single request.
///
/// Single-owner and single-use: created by the builder, handed to the
/// launcher, destroyed exactly once by [`SandboxContext::teardown`].
#[derive(Debug)]
pub struct SandboxContext {
    root: TempDir,
    pub language: String,
    /// Path of the entry script as seen from inside the sandbox
    pub code_entry: String,
}

impl SandboxContext {
    pub fn root_path(&self) -> &Path {
        self.root.path()
    }

    pub fn code_dir(&self) -> PathBuf {
        self.root.path().join("code")
    }

    pub fn etc_dir(&self) -> PathBuf {
        self.root.path().join("etc")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.path().join("tmp")
    }

    /// Recursively delete the sandbox root. Consuming `self` makes a second
    /// teardown unrepresentable; `Drop` on the inner `TempDir` covers panic
    /// and early-return paths.
    pub fn teardown(self) {
        let path = self.root.path().to_path_buf();
        match self.root.close() {
            Ok(()) => debug!("Removed sandbox root {:?}", path),
            Err(e) => warn!("Failed to remove sandbox root {:?}: {}", path, e),
        }
    }
}

/// Builds sandbox roots from execution requests
pub struct SandboxBuilder {
    config: Arc<RunnerConfig>,
    registry: Arc<LanguageRegistry>,
}

impl SandboxBuilder {
    pub fn new(config: Arc<RunnerConfig>, registry: Arc<LanguageRegistry>) -> Self {
        Self { config, registry }
    }

    pub async fn build(&self, request: &ExecutionRequest) -> Result<SandboxContext, RunnerError> {
        let spec = self.registry.get(&request.language)?;
        let rendered = spec.render(&request.code)?;

        let root = tempfile::Builder::new()
            .prefix("sandbox-")
            .tempdir_in(&self.config.sandbox_root)
            .map_err(RunnerError::SandboxCreate)?;

        for sub in ["code", "tmp", "etc"] {
            fs::create_dir(root.path().join(sub))
                .await
                .map_err(RunnerError::SandboxCreate)?;
        }

        self.write_identity(root.path()).await?;

        // The whole of `etc/` is bound read-only before the guest starts, so
        // the resolver snapshot has to exist here already; a bind into an
        // already read-only /etc cannot create its mount point.
        if request.network_enabled {
            let resolv = fs::read_to_string("/etc/resolv.conf")
                .await
                .unwrap_or_default();
            fs::write(root.path().join("etc/resolv.conf"), resolv)
                .await
                .map_err(RunnerError::SandboxCreate)?;
        }

        let script = spec.script_name();
        fs::write(root.path().join("code").join(&script), rendered)
            .await
            .map_err(RunnerError::SandboxCreate)?;

        debug!(root = ?root.path(), language = %spec.name, "Built sandbox");

        Ok(SandboxContext {
            root,
            language: spec.name.clone(),
            code_entry: format!("/code/{}", script),
        })
    }

    /// Minimal `passwd`/`group` so the unprivileged uid resolves to a
    /// powerless, no-login identity inside the sandbox.
    async fn write_identity(&self, root: &Path) -> Result<(), RunnerError> {
        let passwd = format!(
            "{}:x:{}:{}:{}:/code:/usr/sbin/nologin\n",
            SANDBOX_USER, self.config.sandbox_uid, self.config.sandbox_gid, SANDBOX_USER
        );
        let group = format!("{}:x:{}:\n", SANDBOX_USER, self.config.sandbox_gid);

        fs::write(root.join("etc/passwd"), passwd)
            .await
            .map_err(RunnerError::SandboxCreate)?;
        fs::write(root.join("etc/group"), group)
            .await
            .map_err(RunnerError::SandboxCreate)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::testing::shipped_registry;
    use serde_json::json;

    fn request(language: &str, code: &str) -> ExecutionRequest {
        ExecutionRequest {
            language: language.to_string(),
            code: code.to_string(),
            args: vec![json!(1)],
            timeout: None,
            network_enabled: false,
        }
    }

    fn networked_request(language: &str, code: &str) -> ExecutionRequest {
        ExecutionRequest {
            network_enabled: true,
            ..request(language, code)
        }
    }

    fn builder_in(root: &Path) -> SandboxBuilder {
        let config = RunnerConfig {
            sandbox_root: root.to_path_buf(),
            ..RunnerConfig::default()
        };
        SandboxBuilder::new(Arc::new(config), Arc::new(shipped_registry()))
    }

    #[tokio::test]
    async fn build_lays_out_root() {
        let dir = tempfile::tempdir().unwrap();
        let builder = builder_in(dir.path());

        let context = builder.build(&request("python", "print(1+1)")).await.unwrap();

        assert!(context.code_dir().is_dir());
        assert!(context.tmp_dir().is_dir());
        assert!(context.etc_dir().is_dir());
        assert_eq!(context.code_entry, "/code/script.py");

        let script = std::fs::read_to_string(context.code_dir().join("script.py")).unwrap();
        assert!(script.contains("    print(1+1)"));

        let passwd = std::fs::read_to_string(context.etc_dir().join("passwd")).unwrap();
        assert!(passwd.starts_with("sandbox:x:65534:65534:"));
        assert!(passwd.contains("/usr/sbin/nologin"));
        let group = std::fs::read_to_string(context.etc_dir().join("group")).unwrap();
        assert_eq!(group, "sandbox:x:65534:\n");
    }

    #[tokio::test]
    async fn unsupported_language_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let builder = builder_in(dir.path());

        let err = builder.build(&request("cobol", "DISPLAY 1")).await.unwrap_err();
        assert!(matches!(err, RunnerError::UnsupportedLanguage(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn resolver_config_follows_network_flag() {
        let dir = tempfile::tempdir().unwrap();
        let builder = builder_in(dir.path());

        let isolated = builder.build(&request("python", "print(1)")).await.unwrap();
        assert!(!isolated.etc_dir().join("resolv.conf").exists());
        isolated.teardown();

        let networked = builder
            .build(&networked_request("python", "print(1)"))
            .await
            .unwrap();
        assert!(networked.etc_dir().join("resolv.conf").is_file());
        networked.teardown();
    }

    #[tokio::test]
    async fn identical_requests_get_independent_roots() {
        let dir = tempfile::tempdir().unwrap();
        let builder = builder_in(dir.path());

        let a = builder.build(&request("python", "print(1)")).await.unwrap();
        let b = builder.build(&request("python", "print(1)")).await.unwrap();
        assert_ne!(a.root_path(), b.root_path());

        // A file written under one root is invisible to the other
        std::fs::write(a.tmp_dir().join("leak.txt"), "secret").unwrap();
        assert!(!b.tmp_dir().join("leak.txt").exists());

        a.teardown();
        b.teardown();
    }

    #[tokio::test]
    async fn teardown_removes_root() {
        let dir = tempfile::tempdir().unwrap();
        let builder = builder_in(dir.path());

        let context = builder.build(&request("python", "print(1)")).await.unwrap();
        let root = context.root_path().to_path_buf();
        assert!(root.exists());

        context.teardown();
        assert!(!root.exists());
    }
}
