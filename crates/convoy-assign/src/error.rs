//! Assignment error types.

use convoy_core::{CoreError, ErrorKind, PrincipalId};
use thiserror::Error;

/// Errors raised by the assignment engine and transfer machine.
#[derive(Debug, Error)]
pub enum AssignError {
    /// Target operator has no free slot.
    #[error("operator {0} is at capacity")]
    OperatorAtCapacity(PrincipalId),

    /// Operator is not in the online index.
    #[error("operator {0} is not online")]
    OperatorNotOnline(PrincipalId),

    /// `update_status` cannot take an operator offline; that path must
    /// release sessions first.
    #[error("use go_offline to leave, not a status update")]
    OfflineViaStatus,

    /// The session already has a live waiting record.
    #[error("session {0} is already waiting")]
    AlreadyWaiting(convoy_core::SessionId),

    /// Storage failure.
    #[error(transparent)]
    Storage(#[from] convoy_storage::StorageError),
}

impl From<AssignError> for CoreError {
    fn from(err: AssignError) -> Self {
        match &err {
            AssignError::OperatorAtCapacity(_) => Self::new(ErrorKind::Capacity, err.to_string()),
            AssignError::OperatorNotOnline(_) => Self::new(ErrorKind::NotFound, err.to_string()),
            AssignError::OfflineViaStatus => Self::new(ErrorKind::Validation, err.to_string()),
            AssignError::AlreadyWaiting(_) => Self::new(ErrorKind::Conflict, err.to_string()),
            AssignError::Storage(e) => e.clone().into(),
        }
    }
}

/// Result type for assignment operations.
pub type AssignResult<T> = Result<T, AssignError>;
