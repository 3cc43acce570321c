//! Error types for the Lachesis assignment engine
//!
//! This module provides comprehensive error handling using thiserror for
//! structured error definitions and anyhow for error propagation.

use crate::types::{EmployeeId, TaskId};
use thiserror::Error;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Remote provider rejected the credentials
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Remote provider rate limit hit
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Task does not exist
    #[error("Unknown task: {0}")]
    UnknownTask(TaskId),

    /// Employee does not exist
    #[error("Unknown employee: {0}")]
    UnknownEmployee(EmployeeId),

    /// Manual assignment target exists but is not eligible
    #[error("Invalid manual target: {0}")]
    InvalidManualTarget(EmployeeId),

    /// No active employees to choose from
    #[error("No candidates available for assignment")]
    NoCandidates,

    /// Task already has an open assignment
    #[error("Task already assigned: {0}")]
    AlreadyAssigned(TaskId),

    /// Task already has a feedback row
    #[error("Task already completed: {0}")]
    AlreadyCompleted(TaskId),

    /// Completion requested for a task with no open assignment
    #[error("Task not assigned: {0}")]
    NotAssigned(TaskId),

    /// Invalid ID format
    #[error("Invalid id: {0}")]
    InvalidId(#[from] uuid::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A stored invariant does not hold; indicates a bug, not caller error
    #[error("Invariant violated: {0}")]
    InvariantViolated(String),

    /// Persistent internal failure after retries
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Input errors are the caller's fault and must not be retried.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            EngineError::UnknownTask(_)
                | EngineError::UnknownEmployee(_)
                | EngineError::InvalidManualTarget(_)
                | EngineError::NoCandidates
                | EngineError::AlreadyAssigned(_)
                | EngineError::AlreadyCompleted(_)
                | EngineError::NotAssigned(_)
        )
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Convert anyhow::Error to EngineError
impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Internal(err.to_string())
    }
}
