//! Automation triggers: operator-defined condition→action rules, and the
//! platform events they react to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::id::{PrincipalId, SessionId, TicketId};
use crate::sla::SlaKind;
use crate::ticket::{Priority, TicketStatus};

/// Event tags a trigger can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventTag {
    /// A ticket was created.
    TicketCreated,
    /// A ticket was mutated.
    TicketUpdated,
    /// A customer message was accepted by the router.
    MessageReceived,
    /// The SLA monitor recorded a deadline miss.
    SlaViolated,
}

impl fmt::Display for EventTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TicketCreated => write!(f, "ticket-created"),
            Self::TicketUpdated => write!(f, "ticket-updated"),
            Self::MessageReceived => write!(f, "message-received"),
            Self::SlaViolated => write!(f, "sla-violated"),
        }
    }
}

/// A platform event as observed by the automation engine and dashboard
/// subscribers.
///
/// The `payload` is the JSON object condition fields resolve against
/// (`ticket.priority`, `message.sender`, `session.platform`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformEvent {
    /// What happened.
    pub tag: EventTag,
    /// Numeric id of the primary entity (ticket id, message id).
    pub target: i64,
    /// Session the event relates to, when there is one.
    pub session: Option<SessionId>,
    /// Dotted-path-addressable event payload.
    pub payload: Value,
    /// When the event was emitted.
    pub at: DateTime<Utc>,
}

impl PlatformEvent {
    /// Build an event with the current timestamp.
    #[must_use]
    pub fn new(tag: EventTag, target: i64, payload: Value) -> Self {
        Self {
            tag,
            target,
            session: None,
            payload,
            at: Utc::now(),
        }
    }

    /// Attach the related session.
    #[must_use]
    pub fn with_session(mut self, session: SessionId) -> Self {
        self.session = Some(session);
        self
    }
}

/// Comparison operator of a trigger condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CondOp {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Value is a member of the configured list.
    In,
    /// String or array containment.
    Contains,
    /// Numeric less-than.
    Lt,
    /// Numeric less-or-equal.
    Lte,
    /// Numeric greater-than.
    Gt,
    /// Numeric greater-or-equal.
    Gte,
    /// Regular-expression match on the string form.
    Regex,
    /// Field is present and non-null.
    Exists,
}

/// One predicate of a trigger. All of a trigger's conditions must hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Dotted path into the event payload.
    pub field: String,
    /// Comparison operator.
    pub op: CondOp,
    /// Right-hand operand; ignored for `exists`.
    #[serde(default)]
    pub value: Value,
}

/// A typed action a trigger executes when it matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerAction {
    /// Set the ticket priority.
    SetPriority {
        /// New priority.
        priority: Priority,
    },
    /// Set the ticket status.
    SetStatus {
        /// New status.
        status: TicketStatus,
    },
    /// Assign the ticket to an operator or to any operator with a role.
    Assign {
        /// Specific operator to assign.
        #[serde(default)]
        operator_id: Option<PrincipalId>,
        /// Role tag to pick an operator from, when no specific id is given.
        #[serde(default)]
        role: Option<String>,
    },
    /// Add a tag to the ticket.
    AddTag {
        /// Tag to add.
        tag: String,
    },
    /// Remove a tag from the ticket.
    RemoveTag {
        /// Tag to remove.
        tag: String,
    },
    /// Send a notification frame to a hub channel.
    Notify {
        /// Department or operator channel.
        channel: String,
        /// Message body.
        message: String,
    },
    /// Append a comment to the ticket.
    CreateComment {
        /// Comment body.
        body: String,
    },
    /// POST the event payload to a webhook, fire-and-forget with retries.
    FireWebhook {
        /// Target URL (http/https only).
        url: String,
    },
}

/// An operator-defined rule: on `event`, if all `conditions` hold, run
/// `actions` in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationTrigger {
    /// Numeric id, assigned by storage. Evaluation order is stable by id.
    pub id: i64,
    /// Human-readable name.
    pub name: String,
    /// Event this trigger reacts to.
    pub event: EventTag,
    /// Ordered condition list (AND).
    pub conditions: Vec<Condition>,
    /// Ordered action list.
    pub actions: Vec<TriggerAction>,
    /// Inactive triggers are skipped.
    pub active: bool,
}

/// Audit record of one trigger evaluation against one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationRun {
    /// Numeric id, assigned by storage.
    pub id: i64,
    /// The trigger that ran.
    pub trigger_id: i64,
    /// The target entity (ticket id or message id).
    pub target: i64,
    /// The event that caused the run.
    pub event: EventTag,
    /// Whether this was a dry run (no mutations).
    pub dry_run: bool,
    /// Number of conditions that matched.
    pub matches: u32,
    /// JSON descriptions of the actions that executed (or would have).
    pub executed_actions: Vec<Value>,
    /// Run start.
    pub started_at: DateTime<Utc>,
    /// Run end; `None` while in flight.
    pub finished_at: Option<DateTime<Utc>>,
    /// Error text of the action that stopped the run, if any.
    pub error: Option<String>,
}

/// Reference to the ticket id a trigger ran against, for events whose
/// target is not itself a ticket (message events carry `ticket.id` in
/// the payload when one exists).
#[must_use]
pub fn payload_ticket_id(payload: &Value) -> Option<TicketId> {
    payload
        .get("ticket")
        .and_then(|t| t.get("id"))
        .and_then(Value::as_i64)
        .map(TicketId)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_serialization_uses_snake_case_tags() {
        let action = TriggerAction::SetPriority {
            priority: Priority::Urgent,
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "set_priority", "priority": "urgent"})
        );

        let parsed: TriggerAction =
            serde_json::from_value(serde_json::json!({"type": "add_tag", "tag": "vip"})).unwrap();
        assert_eq!(parsed, TriggerAction::AddTag { tag: "vip".into() });
    }

    #[test]
    fn payload_ticket_id_reads_nested_path() {
        let payload = serde_json::json!({"ticket": {"id": 9, "priority": "high"}});
        assert_eq!(payload_ticket_id(&payload), Some(TicketId(9)));
        assert_eq!(payload_ticket_id(&serde_json::json!({})), None);
    }
}
