// crates/weft-server/src/error.rs
// Standardized error types for Weft

use thiserror::Error;

/// Main error type for the Weft library
#[derive(Error, Debug)]
pub enum WeftError {
    #[error("invalid spec: {0}")]
    Validation(String),

    #[error("resolution failed: {0}")]
    Resolution(String),

    #[error("version conflict on {0}")]
    Conflict(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid regex: {0}")]
    Regex(#[from] regex::Error),

    #[error("request cancelled")]
    Cancelled,

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown error: {0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using WeftError
pub type Result<T> = std::result::Result<T, WeftError>;

impl WeftError {
    /// Version-conflict errors are requeue signals, not failures.
    pub fn is_conflict(&self) -> bool {
        matches!(self, WeftError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, WeftError::NotFound(_))
    }
}

impl From<String> for WeftError {
    fn from(s: String) -> Self {
        WeftError::Other(s)
    }
}

impl From<tokio::task::JoinError> for WeftError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            WeftError::Cancelled
        } else {
            WeftError::Other(err.to_string())
        }
    }
}
