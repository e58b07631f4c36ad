//! # Error Types Module
//!
//! Structured error handling for costing, planning and store operations.
//! Validation and shortfall errors are meant to be shown to the user as a
//! message; store errors carry the underlying `sqlx` failure.

use thiserror::Error;

/// Errors raised by the recipe costing library
#[derive(Error, Debug)]
pub enum CostingError {
    /// Input rejected before any computation or store call
    #[error("Validation error: {0}")]
    Validation(String),

    /// Recipe or stock lot not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Production blocked because stock does not cover the plan
    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    /// A stock lot changed between read and write
    #[error("Concurrent update conflict: {0}")]
    Conflict(String),

    /// Wrong shared access secret
    #[error("Access denied")]
    AccessDenied,

    /// Missing or malformed configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database errors
    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Stored JSON columns that fail to (de)serialize
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CostingError {
    /// Whether repeating the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            CostingError::Conflict(_) => true,
            CostingError::Store(err) => match err {
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
                // 40001 serialization_failure, 40P01 deadlock_detected
                sqlx::Error::Database(db) => {
                    matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
                }
                _ => false,
            },
            _ => false,
        }
    }
}

/// Convenience Result type using `CostingError`
pub type Result<T> = std::result::Result<T, CostingError>;
