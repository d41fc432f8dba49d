//! The runtime-wide error taxonomy.
//!
//! Component crates define their own `thiserror` enums; at component
//! boundaries those are classified into a [`CoreError`] carrying one of
//! the kinds below, which is what decides retry, fallback, and
//! user-visible behaviour.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The kind of a runtime error, deciding how it propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Bad input, malformed credentials, unknown frame type. Surfaced,
    /// never retried.
    Validation,
    /// Unauthenticated or forbidden. The client must re-authenticate.
    Auth,
    /// Entity missing.
    NotFound,
    /// Uniqueness or state violation (e.g. a second live waiting record).
    Conflict,
    /// Operator at max-concurrent, queue full. The producer parks the
    /// work or surfaces "too busy".
    Capacity,
    /// AI or storage temporarily unavailable. The AI path falls back;
    /// the storage path retries with backoff before surfacing.
    TransientBackend,
    /// Programmer error or invariant violation. Ends the session; the
    /// system-wide loop keeps running.
    Fatal,
}

impl ErrorKind {
    /// Whether component-local recovery (retry, fallback, parking) is
    /// appropriate for this kind.
    #[must_use]
    pub fn is_recoverable(self) -> bool {
        matches!(self, Self::TransientBackend | Self::Capacity)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Auth => write!(f, "auth"),
            Self::NotFound => write!(f, "not-found"),
            Self::Conflict => write!(f, "conflict"),
            Self::Capacity => write!(f, "capacity"),
            Self::TransientBackend => write!(f, "transient-backend"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// A classified runtime error.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct CoreError {
    /// How this error propagates.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
}

impl CoreError {
    /// Build an error of the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// A validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// An auth error.
    #[must_use]
    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    /// A not-found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// A conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// A capacity error.
    #[must_use]
    pub fn capacity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Capacity, message)
    }

    /// A transient backend error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransientBackend, message)
    }

    /// A fatal error.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }
}

/// Result alias over [`CoreError`].
pub type CoreResult<T> = Result<T, CoreError>;
