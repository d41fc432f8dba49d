//! SLA configuration and violation records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::id::TicketId;
use crate::ticket::Priority;

/// Which SLA deadline was missed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SlaKind {
    /// No operator/AI response within the first-response window.
    FirstResponse,
    /// Ticket not resolved within the resolution window.
    Resolution,
}

impl fmt::Display for SlaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FirstResponse => write!(f, "first-response"),
            Self::Resolution => write!(f, "resolution"),
        }
    }
}

/// A deadline contract tied to ticket priority and customer tier.
///
/// Uniqueness: the `(priority, customer_tier)` pair is unique among
/// active configs; the store's upsert path enforces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaConfig {
    /// Numeric id, assigned by storage.
    pub id: i64,
    /// Human-readable name.
    pub name: String,
    /// Ticket priority this config applies to.
    pub priority: Priority,
    /// Customer tier this config applies to; `None` is the default for
    /// the priority. Tier-specific configs beat the default.
    pub customer_tier: Option<String>,
    /// First-response deadline, minutes.
    pub first_response_mins: u32,
    /// Resolution deadline, minutes.
    pub resolution_mins: u32,
    /// Escalation deadline, minutes.
    pub escalation_mins: u32,
    /// Count only business hours toward the deadlines.
    pub business_hours_only: bool,
    /// Whether this config participates in matching.
    pub active: bool,
}

/// A recorded deadline miss on a ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaViolation {
    /// Numeric id, assigned by storage.
    pub id: i64,
    /// The ticket that missed its deadline.
    pub ticket: TicketId,
    /// The config that defined the deadline.
    pub config_id: i64,
    /// Which deadline was missed.
    pub kind: SlaKind,
    /// The deadline that was missed.
    pub deadline_at: DateTime<Utc>,
    /// When the monitor detected the miss.
    pub violated_at: DateTime<Utc>,
    /// Set when the underlying condition was later satisfied.
    pub resolved: bool,
}
