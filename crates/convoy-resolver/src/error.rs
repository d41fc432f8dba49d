//! Resolver error types.

use convoy_core::{CoreError, ErrorKind};
use thiserror::Error;

/// Errors that can occur while resolving a query.
#[derive(Debug, Error)]
pub enum ResolverError {
    /// The per-call deadline elapsed.
    #[error("AI call timed out after {timeout_secs}s")]
    Timeout {
        /// The deadline that elapsed.
        timeout_secs: u64,
    },

    /// The backend answered with an error or an unusable payload.
    #[error("AI backend error: {0}")]
    Backend(String),

    /// No primary backend is configured.
    #[error("no primary backend configured")]
    NoPrimary,

    /// HTTP transport failure.
    #[error("AI transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend does not support the requested capability.
    #[error("backend does not support {0}")]
    Unsupported(&'static str),

    /// Storage failure while ranking fallback documents.
    #[error(transparent)]
    Storage(#[from] convoy_storage::StorageError),
}

impl From<ResolverError> for CoreError {
    fn from(err: ResolverError) -> Self {
        Self::new(ErrorKind::TransientBackend, err.to_string())
    }
}

/// Result type for resolver operations.
pub type ResolverResult<T> = Result<T, ResolverError>;
