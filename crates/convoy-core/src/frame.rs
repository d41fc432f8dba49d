//! The socket frame model.
//!
//! Every frame on the wire is a JSON object `{"type": ..., "data": ...}`.
//! [`RawFrame`] is the transport shape; [`Frame`] is the typed view of
//! the frame types the core recognises. Unknown types stay raw so the
//! router can offer them to channel adapters before counting and
//! dropping them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Where an AI answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerSource {
    /// The primary reasoning backend.
    Primary,
    /// The in-process keyword knowledge base.
    Fallback,
}

impl fmt::Display for AnswerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// A frame exactly as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFrame {
    /// The frame type tag.
    #[serde(rename = "type")]
    pub kind: String,
    /// The payload.
    #[serde(default)]
    pub data: Value,
}

impl RawFrame {
    /// Build a raw frame.
    #[must_use]
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }
}

/// The frame types the core recognises.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum Frame {
    /// Customer or operator text.
    TextMessage {
        /// Message body.
        content: String,
    },
    /// AI answer delivered to the session.
    AiResponse {
        /// Answer text.
        content: String,
        /// Confidence in `[0, 1]`.
        confidence: f64,
        /// Which backend produced it.
        source: AnswerSource,
    },
    /// The session is being handed to a human (or queued for one).
    HandoffNotification {
        /// Escalation reason.
        reason: String,
        /// Queue position, when parked.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<u32>,
    },
    /// WebRTC SDP offer, relayed opaquely.
    WebrtcOffer(Value),
    /// WebRTC SDP answer, relayed opaquely.
    WebrtcAnswer(Value),
    /// WebRTC ICE candidate, relayed opaquely.
    WebrtcCandidate(Value),
    /// Typing indicator.
    Typing {
        /// Who is typing.
        from: String,
    },
    /// Presence update, relayed opaquely.
    Presence(Value),
    /// Explicit request to change handler: customer asking for a human,
    /// or an operator redirecting the session to a colleague.
    TransferRequest {
        /// Target operator for operator-to-operator transfers.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<crate::id::PrincipalId>,
        /// Reason given by the requester.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Human-readable platform notice.
    System {
        /// Notice text.
        text: String,
    },
    /// Periodic metrics sample pushed to dashboards.
    MetricsTick(Value),
}

impl Frame {
    /// Build a `system` frame.
    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self::System { text: text.into() }
    }

    /// Build a `text-message` frame.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self::TextMessage {
            content: content.into(),
        }
    }

    /// The wire type tag of this frame.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TextMessage { .. } => "text-message",
            Self::AiResponse { .. } => "ai-response",
            Self::HandoffNotification { .. } => "handoff-notification",
            Self::WebrtcOffer(_) => "webrtc-offer",
            Self::WebrtcAnswer(_) => "webrtc-answer",
            Self::WebrtcCandidate(_) => "webrtc-candidate",
            Self::Typing { .. } => "typing",
            Self::Presence(_) => "presence",
            Self::TransferRequest { .. } => "transfer-request",
            Self::System { .. } => "system",
            Self::MetricsTick(_) => "metrics-tick",
        }
    }

    /// Whether this frame type is part of the WebRTC signalling relay.
    #[must_use]
    pub fn is_webrtc(&self) -> bool {
        matches!(
            self,
            Self::WebrtcOffer(_) | Self::WebrtcAnswer(_) | Self::WebrtcCandidate(_)
        )
    }
}

/// Frame decode failures.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The payload was not a `{type, data}` object.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// The type tag is not one the core recognises.
    #[error("unknown frame type: {0}")]
    UnknownType(String),
}

impl TryFrom<RawFrame> for Frame {
    type Error = FrameError;

    fn try_from(raw: RawFrame) -> Result<Self, Self::Error> {
        let kind = raw.kind.clone();
        let value = serde_json::json!({"type": raw.kind, "data": raw.data});
        serde_json::from_value(value).map_err(|e| {
            // Distinguish "we don't know this tag" from "known tag, bad data".
            if KNOWN_KINDS.contains(&kind.as_str()) {
                FrameError::Malformed(e.to_string())
            } else {
                FrameError::UnknownType(kind)
            }
        })
    }
}

impl From<Frame> for RawFrame {
    fn from(frame: Frame) -> Self {
        // Frames always serialize to {type, data}; fall back to a system
        // error frame in the (unreachable) failure case.
        match serde_json::to_value(&frame) {
            Ok(Value::Object(map)) => {
                let kind = map
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("system")
                    .to_string();
                let data = map.get("data").cloned().unwrap_or(Value::Null);
                Self { kind, data }
            }
            _ => Self::new("system", serde_json::json!({"text": "encode error"})),
        }
    }
}

/// Parse a wire payload into a raw frame.
///
/// # Errors
///
/// Returns [`FrameError::Malformed`] when the text is not a
/// `{type, data}` JSON object.
pub fn parse_raw(text: &str) -> Result<RawFrame, FrameError> {
    serde_json::from_str(text).map_err(|e| FrameError::Malformed(e.to_string()))
}

const KNOWN_KINDS: &[&str] = &[
    "text-message",
    "ai-response",
    "handoff-notification",
    "webrtc-offer",
    "webrtc-answer",
    "webrtc-candidate",
    "typing",
    "presence",
    "transfer-request",
    "system",
    "metrics-tick",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_message_round_trip() {
        let raw = parse_raw(r#"{"type":"text-message","data":{"content":"reset password"}}"#)
            .unwrap();
        let frame = Frame::try_from(raw).unwrap();
        assert_eq!(
            frame,
            Frame::TextMessage {
                content: "reset password".into()
            }
        );

        let back = RawFrame::from(frame);
        assert_eq!(back.kind, "text-message");
        assert_eq!(back.data, serde_json::json!({"content": "reset password"}));
    }

    #[test]
    fn unknown_type_is_distinguished_from_malformed() {
        let raw = RawFrame::new("carrier-pigeon", serde_json::json!({}));
        assert!(matches!(
            Frame::try_from(raw),
            Err(FrameError::UnknownType(kind)) if kind == "carrier-pigeon"
        ));

        let raw = RawFrame::new("text-message", serde_json::json!({"nope": 1}));
        assert!(matches!(Frame::try_from(raw), Err(FrameError::Malformed(_))));
    }

    #[test]
    fn handoff_position_is_optional_on_the_wire() {
        let frame = Frame::HandoffNotification {
            reason: "policy".into(),
            position: None,
        };
        let raw = RawFrame::from(frame);
        assert_eq!(raw.data, serde_json::json!({"reason": "policy"}));

        let with_pos: Frame = Frame::try_from(RawFrame::new(
            "handoff-notification",
            serde_json::json!({"reason": "no-operator", "position": 1}),
        ))
        .unwrap();
        assert_eq!(
            with_pos,
            Frame::HandoffNotification {
                reason: "no-operator".into(),
                position: Some(1)
            }
        );
    }

    #[test]
    fn ai_response_carries_source_tag() {
        let frame = Frame::AiResponse {
            content: "Use the reset link".into(),
            confidence: 0.92,
            source: AnswerSource::Primary,
        };
        let raw = RawFrame::from(frame);
        assert_eq!(raw.data["source"], "primary");
        assert_eq!(raw.data["confidence"], 0.92);
    }
}
