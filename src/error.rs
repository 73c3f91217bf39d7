//! Federation error types
//!
//! Defines all errors that can occur while loading, mutating or using the
//! federation index.

use thiserror::Error;

/// Errors that can occur in the federation layer
#[derive(Error, Debug)]
pub enum FederationError {
    /// Routing history is inconsistent (duplicate ADD, missing REMOVE target)
    #[error("Consistency violation: {0}")]
    Consistency(String),

    /// Internal invariant broken (negative sweep counter, unordered eras)
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// Caller supplied an invalid query, tag set or data point
    #[error("Validation error: {0}")]
    Validation(String),

    /// Persistent store failed to serve a read or write
    #[error("Store error: {0}")]
    Store(String),

    /// A store write kept failing until the retry budget ran out
    #[error("Put for {metric} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        metric: String,
        attempts: u32,
        last_error: String,
    },

    /// Metric name has no assigned ID
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FederationError {
    /// Whether a store write failing with this error may be attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(self, FederationError::Store(_) | FederationError::Io(_))
    }
}

impl From<serde_json::Error> for FederationError {
    fn from(err: serde_json::Error) -> Self {
        FederationError::Serialization(err.to_string())
    }
}

/// Result type alias for federation operations
pub type FederationResult<T> = Result<T, FederationError>;
