//! Error Handling
//!
//! Unified error types for the memory store.
//! Uses thiserror for ergonomic error definitions.

use agent_memory_core::CoreError;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Write rejected by the governance policy
    #[error("Governance denied: {0}")]
    GovernanceDenied(String),

    /// Backend method called before `init()`
    #[error("Not initialized: {0}")]
    NotInitialized(String),

    /// Optional extension (full-text, vector) missing
    #[error("Extension unavailable: {0}")]
    ExtensionUnavailable(String),

    /// Transactional batch failed and was rolled back
    #[error("Transaction failed: {0}")]
    TransactionFailure(String),

    /// Database errors
    #[error("Database error: {0}")]
    Database(String),

    /// SQLite errors (auto-converted from rusqlite::Error)
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Validation errors (malformed input)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Create a governance-denied error
    pub fn governance_denied(msg: impl Into<String>) -> Self {
        Self::GovernanceDenied(msg.into())
    }

    /// Create a not-initialized error
    pub fn not_initialized(msg: impl Into<String>) -> Self {
        Self::NotInitialized(msg.into())
    }

    /// Create a transaction failure error
    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::TransactionFailure(msg.into())
    }

    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
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

    /// Whether the error came from the governance policy
    pub fn is_governance_denied(&self) -> bool {
        matches!(self, Self::GovernanceDenied(_))
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::GovernanceDenied(msg) => Self::GovernanceDenied(msg),
            CoreError::Validation(msg) => Self::Validation(msg),
            CoreError::NotFound(msg) => Self::NotFound(msg),
            CoreError::Serialization(e) => Self::Serialization(e),
            CoreError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl From<r2d2::Error> for AppError {
    fn from(err: r2d2::Error) -> Self {
        Self::Database(format!("Failed to get connection: {}", err))
    }
}

/// Convert AppError to a string for callers that surface plain messages
impl From<AppError> for String {
    fn from(err: AppError) -> String {
        err.to_string()
    }
}
