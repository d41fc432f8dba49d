//! Tickets: the durable record of an escalated conversation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::id::{PrincipalId, SessionId, TicketId};

/// Ticket priority, lowest to highest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Can wait.
    Low,
    /// Default.
    Normal,
    /// Jump the line.
    High,
    /// Drop everything.
    Urgent,
}

impl Priority {
    /// Numeric rank, higher is more urgent. Used as the primary key of
    /// the waiting queue ordering.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::High => 2,
            Self::Urgent => 3,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Urgent => write!(f, "urgent"),
        }
    }
}

/// Ticket lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TicketStatus {
    /// Created, nobody working it.
    Open,
    /// Assigned to an operator, not yet picked up.
    Assigned,
    /// Being worked.
    InProgress,
    /// Fixed; awaiting close.
    Resolved,
    /// Done.
    Closed,
}

impl TicketStatus {
    /// Whether this status counts as terminal for SLA purposes.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Closed)
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Assigned => write!(f, "assigned"),
            Self::InProgress => write!(f, "in-progress"),
            Self::Resolved => write!(f, "resolved"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Durable record of a support request.
///
/// Invariants the mutating engines uphold:
/// - a transition to `Resolved`/`Closed` sets `resolved_at`;
/// - assigning an operator adjusts that operator's load through the
///   assignment engine's slot accounting, never directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    /// Numeric id, assigned by storage.
    pub id: TicketId,
    /// Short summary.
    pub title: String,
    /// Long-form description.
    pub description: String,
    /// Lifecycle status.
    pub status: TicketStatus,
    /// Priority.
    pub priority: Priority,
    /// Free-form category tag.
    pub category: String,
    /// Owning customer.
    pub customer: PrincipalId,
    /// The session this ticket was escalated from, when it was born from
    /// a live conversation.
    pub session: Option<SessionId>,
    /// Assigned operator, if any.
    pub operator: Option<PrincipalId>,
    /// When the first operator reply landed; feeds the first-response
    /// SLA deadline.
    pub first_response_at: Option<DateTime<Utc>>,
    /// Tag set.
    pub tags: BTreeSet<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Set when the ticket transitions to resolved/closed.
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Ticket {
    /// Create a fresh open ticket. The id is a placeholder until storage
    /// assigns one.
    #[must_use]
    pub fn open(
        title: impl Into<String>,
        description: impl Into<String>,
        customer: PrincipalId,
        priority: Priority,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TicketId(0),
            title: title.into(),
            description: description.into(),
            status: TicketStatus::Open,
            priority,
            category: String::new(),
            customer,
            session: None,
            operator: None,
            first_response_at: None,
            tags: BTreeSet::new(),
            created_at: now,
            updated_at: now,
            resolved_at: None,
        }
    }

    /// Link the originating session.
    #[must_use]
    pub fn with_session(mut self, session: SessionId) -> Self {
        self.session = Some(session);
        self
    }

    /// Apply a status transition, maintaining `resolved_at`.
    pub fn set_status(&mut self, status: TicketStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
        if status.is_terminal() {
            self.resolved_at.get_or_insert(now);
        }
    }
}

/// A comment appended to a ticket by an operator or an automation rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketComment {
    /// Numeric id, assigned by storage.
    pub id: i64,
    /// The commented ticket.
    pub ticket: TicketId,
    /// Comment body.
    pub body: String,
    /// Author; `None` for automation.
    pub author: Option<PrincipalId>,
    /// When the comment was added.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ranks_ascend() {
        assert!(Priority::Urgent.rank() > Priority::High.rank());
        assert!(Priority::High.rank() > Priority::Normal.rank());
        assert!(Priority::Normal.rank() > Priority::Low.rank());
    }

    #[test]
    fn resolving_sets_resolved_at_once() {
        let mut ticket = Ticket::open("t", "d", PrincipalId(7), Priority::Normal);
        assert!(ticket.resolved_at.is_none());

        let first = Utc::now();
        ticket.set_status(TicketStatus::Resolved, first);
        assert_eq!(ticket.resolved_at, Some(first));

        // Closing later must not move the resolution timestamp.
        let later = first + chrono::Duration::seconds(60);
        ticket.set_status(TicketStatus::Closed, later);
        assert_eq!(ticket.resolved_at, Some(first));
        assert_eq!(ticket.updated_at, later);
    }
}
