//! Sessions and the messages that flow through them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::id::{MessageId, PrincipalId, SessionId};

/// The channel a session arrived on.
///
/// Known platforms get a variant; anything else round-trips through
/// [`Platform::Other`] so channel adapters registered under custom tags
/// still resolve.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Platform {
    /// Browser widget.
    Web,
    /// Telegram bot bridge.
    Telegram,
    /// WeChat bridge.
    WeChat,
    /// Any other adapter-provided tag.
    Other(String),
}

impl Platform {
    /// Canonical lowercase tag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Web => "web",
            Self::Telegram => "telegram",
            Self::WeChat => "wechat",
            Self::Other(tag) => tag,
        }
    }
}

impl From<String> for Platform {
    fn from(value: String) -> Self {
        match value.as_str() {
            "web" => Self::Web,
            "telegram" => Self::Telegram,
            "wechat" => Self::WeChat,
            _ => Self::Other(value),
        }
    }
}

impl From<Platform> for String {
    fn from(value: Platform) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Conversation in progress (AI- or operator-handled).
    Active,
    /// Parked in the waiting queue for a human.
    Waiting,
    /// An operator has the session.
    Handled,
    /// Conversation over.
    Ended,
}

/// A conversation thread between one customer and zero-or-one operator.
///
/// The currently attached operator, if any, is held by the assignment
/// engine rather than stored here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque id.
    pub id: SessionId,
    /// Owning customer.
    pub customer: PrincipalId,
    /// Channel the session arrived on.
    pub platform: Platform,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// When the session started.
    pub started_at: DateTime<Utc>,
    /// Last inbound or outbound activity.
    pub last_activity_at: DateTime<Utc>,
}

impl Session {
    /// Start a new active session for `customer` on `platform`.
    #[must_use]
    pub fn start(customer: PrincipalId, platform: Platform) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            customer,
            platform,
            status: SessionStatus::Active,
            started_at: now,
            last_activity_at: now,
        }
    }
}

/// What kind of payload a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain UTF-8 text.
    Text,
    /// Reference to an image blob.
    Image,
    /// Reference to a file blob.
    File,
    /// Platform-generated notice.
    System,
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    /// The customer owning the session.
    Customer,
    /// The AI resolver.
    Ai,
    /// A human operator.
    Operator,
    /// The platform itself.
    System,
}

impl fmt::Display for SenderRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Customer => write!(f, "customer"),
            Self::Ai => write!(f, "ai"),
            Self::Operator => write!(f, "operator"),
            Self::System => write!(f, "system"),
        }
    }
}

/// One utterance in a session. Append-only; ordering is
/// `(created_at, id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Numeric id, assigned by storage.
    pub id: MessageId,
    /// Owning session.
    pub session: SessionId,
    /// Text content or blob reference.
    pub content: String,
    /// Payload kind.
    pub kind: MessageKind,
    /// Author role.
    pub sender: SenderRole,
    /// When the message was accepted.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// The per-session ordering key: created-at, then id.
    #[must_use]
    pub fn order_key(&self) -> (DateTime<Utc>, MessageId) {
        (self.created_at, self.id)
    }

    /// Compare two messages in session order.
    #[must_use]
    pub fn session_order(a: &Self, b: &Self) -> Ordering {
        a.order_key().cmp(&b.order_key())
    }
}
