//! Error taxonomy for the execution service

use thiserror::Error;

use crate::protocol::StatusCode;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("no template registered for language: {0}")]
    TemplateNotFound(String),

    #[error("failed to create sandbox: {0}")]
    SandboxCreate(#[source] std::io::Error),

    #[error("failed to launch sandboxed process: {0}")]
    Launch(#[source] std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

impl RunnerError {
    /// Status code the error maps to in the response envelope. Validation
    /// failures (bad fields, unknown language, missing template) are the
    /// caller's fault; everything else is reported as a generic error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RunnerError::InvalidParams(_)
            | RunnerError::UnsupportedLanguage(_)
            | RunnerError::TemplateNotFound(_) => StatusCode::InvalidParams,
            _ => StatusCode::Error,
        }
    }
}
