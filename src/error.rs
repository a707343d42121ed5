//! Error types for cache coordination
//!
//! Configuration and key evaluation errors abort a call before any cache
//! interaction. Lock errors abort the call that was waiting. Computation
//! errors only surface on the read path; write paths log and suppress them.

use thiserror::Error;

/// Main error type for cache coordination
#[derive(Error, Debug)]
pub enum CacheError {
    /// Malformed TTL suffix or invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Key expression could not be evaluated against the call arguments
    #[error("Key evaluation error in '{expression}': {reason}")]
    KeyEvaluation { expression: String, reason: String },

    /// A waiter was abandoned by the lock service
    #[error("Lock acquisition interrupted: {lock}")]
    LockAcquisitionInterrupted { lock: String },

    /// The configured maximum wait elapsed before the lock was granted
    #[error("Lock '{lock}' not acquired after {waited_ms}ms")]
    LockTimeout { lock: String, waited_ms: u64 },

    /// The wrapped computation failed
    #[error("Computation failed: {0}")]
    Computation(anyhow::Error),

    /// Cache store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Value (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

impl CacheError {
    /// Build a key evaluation error
    pub fn key_evaluation(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        CacheError::KeyEvaluation {
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error came from the wrapped computation rather than coordination
    pub fn is_computation(&self) -> bool {
        matches!(self, CacheError::Computation(_))
    }
}

/// Result type alias for cache coordination
pub type Result<T> = std::result::Result<T, CacheError>;

impl From<String> for CacheError {
    fn from(s: String) -> Self {
        CacheError::Other(s)
    }
}

impl From<&str> for CacheError {
    fn from(s: &str) -> Self {
        CacheError::Other(s.to_string())
    }
}
