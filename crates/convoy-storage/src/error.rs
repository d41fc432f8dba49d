//! Storage error types.

use convoy_core::{CoreError, ErrorKind};
use thiserror::Error;

/// Errors that can occur in storage operations.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The requested entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity family (e.g. "ticket").
        entity: &'static str,
        /// The missing id, stringified.
        id: String,
    },

    /// A uniqueness or state invariant would be violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The backend is temporarily unreachable; retryable.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// The payload could not be encoded or decoded.
    #[error("storage serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    /// Shorthand for a not-found error.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether a retry may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        let kind = match &err {
            StorageError::NotFound { .. } => ErrorKind::NotFound,
            StorageError::Conflict(_) => ErrorKind::Conflict,
            StorageError::Unavailable(_) => ErrorKind::TransientBackend,
            StorageError::Serialization(_) => ErrorKind::Fatal,
        };
        Self::new(kind, err.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
