//! Sandbox lifecycle
//!
//! `builder` allocates the ephemeral per-request root and renders the user's
//! code into it; `launcher` starts the isolated interpreter process against
//! that root.

pub mod builder;
pub mod launcher;

pub use builder::{SandboxBuilder, SandboxContext};
pub use launcher::{IsolationLauncher, RunningSandbox};
