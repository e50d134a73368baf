// src/error.rs
// Application error taxonomy for engine operations.

use thiserror::Error;

/// Engine operation error type
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Engine operation result type
pub type EngineResult<T> = Result<T, EngineError>;

/// Outcome of a task-state update. Updates that target a slot already in a
/// terminal state are not errors: they are logged and ignored so a lagging
/// worker cannot un-terminate a task the stop path has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    Ignored,
}
