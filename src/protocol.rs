//! Wire protocol - execution requests, outcomes, and response envelopes
//!
//! Every caller-visible value lives here. The service always answers with a
//! `ResponseEnvelope`, whatever happened inside the sandbox.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RunnerError;

/// Inbound execution request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Language identifier, resolved against the language registry
    pub language: String,
    /// Raw source text, required and non-empty
    pub code: String,
    /// Arguments passed to the guest program over stdin as a JSON array
    #[serde(default)]
    pub args: Vec<Value>,
    /// Wall-clock limit in seconds; the configured default applies if absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Whether the sandbox shares the host network namespace
    #[serde(default)]
    pub network_enabled: bool,
}

impl ExecutionRequest {
    /// Field-level validation, run on the accepting task before any sandbox
    /// resource is allocated.
    pub fn validate(&self) -> Result<(), RunnerError> {
        if self.code.trim().is_empty() {
            return Err(RunnerError::InvalidParams(
                "code must not be empty".to_string(),
            ));
        }
        if self.timeout == Some(0) {
            return Err(RunnerError::InvalidParams(
                "timeout must be a positive number of seconds".to_string(),
            ));
        }
        Ok(())
    }
}

/// Status codes returned in the `code` field of the response envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok = 1000,
    Error = 1001,
    InvalidParams = 5000,
    ExecuteFailed = 1_002_001,
    ExecuteTimeout = 1_002_002,
}

impl StatusCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map a guest exit code onto the taxonomy. Anything that does not match
    /// a declared code is reported as a generic execution failure by the
    /// caller of this function.
    pub fn from_exit_code(code: i32) -> Option<StatusCode> {
        match code {
            1000 => Some(StatusCode::Ok),
            1001 => Some(StatusCode::Error),
            5000 => Some(StatusCode::InvalidParams),
            1_002_001 => Some(StatusCode::ExecuteFailed),
            1_002_002 => Some(StatusCode::ExecuteTimeout),
            _ => None,
        }
    }
}

/// Terminal result of supervising one request
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub status: StatusCode,
    /// Parsed JSON written by the guest program on success
    pub payload: Option<Value>,
    /// Human-readable error text on failure
    pub message: String,
    /// Wall-clock elapsed time, build through teardown
    pub duration_ms: u64,
}

/// Outbound envelope: `{ code, message, data: { result, duration } }`
#[derive(Debug, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub code: i32,
    pub message: String,
    pub data: EnvelopeData,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnvelopeData {
    pub result: Value,
    pub duration: u64,
}

impl ResponseEnvelope {
    /// Immediate rejection on the accepting path
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::failure(StatusCode::InvalidParams, message)
    }

    pub fn failure(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code: status.code(),
            message: message.into(),
            data: EnvelopeData {
                result: Value::Null,
                duration: 0,
            },
        }
    }
}

impl From<ExecutionOutcome> for ResponseEnvelope {
    fn from(outcome: ExecutionOutcome) -> Self {
        Self {
            code: outcome.status.code(),
            message: outcome.message,
            data: EnvelopeData {
                result: outcome.payload.unwrap_or(Value::Null),
                duration: outcome.duration_ms,
            },
        }
    }
}
