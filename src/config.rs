//! Runner configuration
//!
//! Built once at startup from environment variables and passed by reference
//! into every component. There is no mutable global.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Number of pool workers executing sandboxed requests
    pub worker_count: usize,
    /// Units of work that can wait for a free worker before the accepting
    /// path starts exerting back-pressure
    pub queue_capacity: usize,
    /// Wall-clock limit applied when a request does not carry one
    pub default_timeout_secs: u64,
    /// Upper bound a request timeout is clamped to
    pub max_timeout_secs: u64,
    /// Directory sandbox roots are allocated under
    pub sandbox_root: PathBuf,
    /// Path to the language registry TOML file
    pub languages_path: PathBuf,
    /// bubblewrap binary, resolved on PATH unless overridden
    pub bwrap_path: PathBuf,
    /// Unprivileged identity presented inside the sandbox
    pub sandbox_uid: u32,
    pub sandbox_gid: u32,
    /// Address the HTTP front end binds to
    pub listen_addr: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 64,
            default_timeout_secs: 10,
            max_timeout_secs: 600,
            sandbox_root: std::env::temp_dir(),
            languages_path: PathBuf::from("./files/languages.toml"),
            bwrap_path: PathBuf::from("bwrap"),
            sandbox_uid: 65534,
            sandbox_gid: 65534,
            listen_addr: "0.0.0.0:8194".to_string(),
        }
    }
}

impl RunnerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            worker_count: env_parse("RUNNER_WORKERS", defaults.worker_count),
            queue_capacity: env_parse("RUNNER_QUEUE_CAPACITY", defaults.queue_capacity),
            default_timeout_secs: env_parse(
                "RUNNER_DEFAULT_TIMEOUT_SECS",
                defaults.default_timeout_secs,
            ),
            // Floored to 1: request timeouts are clamped into
            // [1, max_timeout_secs], which needs a non-empty range
            max_timeout_secs: env_parse("RUNNER_MAX_TIMEOUT_SECS", defaults.max_timeout_secs)
                .max(1),
            sandbox_root: std::env::var("RUNNER_SANDBOX_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.sandbox_root),
            languages_path: std::env::var("LANGUAGES_CONFIG")
                .map(PathBuf::from)
                .unwrap_or(defaults.languages_path),
            bwrap_path: std::env::var("RUNNER_BWRAP_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.bwrap_path),
            sandbox_uid: env_parse("RUNNER_SANDBOX_UID", defaults.sandbox_uid),
            sandbox_gid: env_parse("RUNNER_SANDBOX_GID", defaults.sandbox_gid),
            listen_addr: std::env::var("RUNNER_LISTEN_ADDR").unwrap_or(defaults.listen_addr),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
