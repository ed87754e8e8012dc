//! Core Error Types
//!
//! Defines the foundational error types used by the memory model. These error
//! types are dependency-free (only thiserror + std) to keep the core crate
//! lightweight.
//!
//! The application crate extends these with storage variants (Sqlite,
//! NotInitialized, TransactionFailure) that require heavier dependencies.

use thiserror::Error;

/// Core error type for the memory model.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Write rejected by the governance policy
    #[error("Governance denied: {0}")]
    GovernanceDenied(String),

    /// Malformed input (bad embedding length, unparsable node, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for core errors
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Create a governance-denied error
    pub fn governance_denied(msg: impl Into<String>) -> Self {
        Self::GovernanceDenied(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Convert CoreError to a string
impl From<CoreError> for String {
    fn from(err: CoreError) -> String {
        err.to_string()
    }
}
