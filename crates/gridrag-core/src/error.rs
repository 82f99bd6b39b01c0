use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Transient backend error: {0}")]
    Transient(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: &'static str, after: Duration },

    #[error("Retrieval unavailable (semantic: {semantic}; keyword: {keyword})")]
    RetrievalUnavailable { semantic: String, keyword: String },

    #[error("{operation} failed after {attempts} attempts: {last}")]
    RetryExhausted { operation: String, attempts: u32, last: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Chunking failed: {0}")]
    Chunking(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Operation failed: {0}")]
    Operation(String),
}

impl Error {
    /// Configuration and caller errors. These are never degraded or retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_)
                | Self::MissingCredentials(_)
                | Self::DimensionMismatch { .. }
                | Self::InvalidFilter(_)
                | Self::InvalidRequest(_)
        )
    }

    /// Errors a caller may retry. `Backend` failures are deterministic: a
    /// query degrades around them but nothing retries them.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout { .. })
    }

    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
