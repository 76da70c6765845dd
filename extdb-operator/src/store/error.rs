//! Store error types.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Record not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Write refused by the current state of the record.
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
