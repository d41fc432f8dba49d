//! Waiting-queue and transfer records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::id::{PrincipalId, SessionId};
use crate::ticket::Priority;

/// Status of a waiting-queue record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitingStatus {
    /// Still in the queue.
    Waiting,
    /// Matched to an operator.
    Assigned,
    /// Cancelled by session end or operator action.
    Cancelled,
    /// Aged out.
    Expired,
}

/// A session parked in the waiting queue.
///
/// Invariant: at most one record with status [`WaitingStatus::Waiting`]
/// exists per session; the queue's enqueue path enforces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitingRecord {
    /// The waiting session.
    pub session: SessionId,
    /// When the session was queued.
    pub queued_at: DateTime<Utc>,
    /// Priority the queue orders on.
    pub priority: Priority,
    /// Why the session is waiting (escalation reason).
    pub reason: String,
    /// Record status.
    pub status: WaitingStatus,
}

impl WaitingRecord {
    /// Create a live waiting record for `session`.
    #[must_use]
    pub fn waiting(session: SessionId, priority: Priority, reason: impl Into<String>) -> Self {
        Self {
            session,
            queued_at: Utc::now(),
            priority,
            reason: reason.into(),
            status: WaitingStatus::Waiting,
        }
    }
}

/// One side of a transfer: where a session came from or went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum TransferParty {
    /// The AI resolver.
    Ai,
    /// A human operator.
    Operator(PrincipalId),
    /// The waiting queue.
    Queue,
}

impl fmt::Display for TransferParty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ai => write!(f, "ai"),
            Self::Operator(id) => write!(f, "operator:{id}"),
            Self::Queue => write!(f, "queue"),
        }
    }
}

/// Append-only record of a handler change.
///
/// The from/to chain of a session's records reconstructs its full
/// handling history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    /// The transferred session.
    pub session: SessionId,
    /// Previous handler; `None` for the initial attach.
    pub from: Option<TransferParty>,
    /// New handler.
    pub to: TransferParty,
    /// Why the transfer happened.
    pub reason: String,
    /// When it happened.
    pub created_at: DateTime<Utc>,
}

impl TransferRecord {
    /// Record a transfer of `session` from `from` to `to`.
    #[must_use]
    pub fn new(
        session: SessionId,
        from: Option<TransferParty>,
        to: TransferParty,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            session,
            from,
            to,
            reason: reason.into(),
            created_at: Utc::now(),
        }
    }
}
