//! Error types for the state store adapter.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("key not found: {0}")]
    NotFound(String),
}

impl StateError {
    /// True when the failure comes from the store itself rather than the
    /// content of a record, so repeating the call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StateError::Open(_) | StateError::Transaction(_) | StateError::Read(_) | StateError::Write(_)
        )
    }
}
