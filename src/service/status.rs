//! Transport-level status codes

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::engine::EngineError;

/// gRPC-style status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Code {
    InvalidArgument,
    FailedPrecondition,
    NotFound,
    Aborted,
    DeadlineExceeded,
    Unavailable,
    Internal,
}

impl Code {
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::FailedPrecondition => "FAILED_PRECONDITION",
            Code::NotFound => "NOT_FOUND",
            Code::Aborted => "ABORTED",
            Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Code::Unavailable => "UNAVAILABLE",
            Code::Internal => "INTERNAL",
        }
    }

    /// Whether a client may reasonably retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(self, Code::Aborted | Code::Unavailable | Code::DeadlineExceeded)
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure returned to a remote caller
#[derive(Debug, Clone, Error, PartialEq, Serialize)]
#[error("{code}: {message}")]
pub struct Status {
    pub code: Code,
    pub message: String,
}

impl Status {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }
}

impl From<&EngineError> for Status {
    fn from(err: &EngineError) -> Self {
        let code = match err {
            EngineError::Validation(_) => Code::InvalidArgument,
            EngineError::InvalidState { .. }
            | EngineError::DependencyNotSatisfied { .. }
            | EngineError::Cycle { .. }
            | EngineError::ChainMismatch { .. } => Code::FailedPrecondition,
            EngineError::NotFound { .. } => Code::NotFound,
            EngineError::Integrity(_) => Code::Internal,
            EngineError::Conflict(_) => Code::Aborted,
            e if e.is_deadline_exceeded() => Code::DeadlineExceeded,
            EngineError::Storage { .. } => Code::Unavailable,
        };
        Status::new(code, err.to_string())
    }
}

impl From<EngineError> for Status {
    fn from(err: EngineError) -> Self {
        Status::from(&err)
    }
}
