//! The pipeline itself.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::json;
use tracing::{debug, info, warn};

use convoy_assign::{AssignError, AssignmentEngine};
use convoy_core::prelude::*;
use convoy_events::EventBus;
use convoy_hub::{Hub, Inbound};
use convoy_hub::ClientTag;
use convoy_metrics::Metrics;
use convoy_resolver::Resolver;
use convoy_storage::{ConversationStore, RetryPolicy, TicketStore, with_retry};

use crate::adapter::AdapterRegistry;
use crate::escalation::{EscalationDecision, EscalationPolicy};

/// Maximum accepted message length, bytes.
const MAX_CONTENT_LEN: usize = 4096;

/// Everything the router talks to.
pub struct RouterDeps {
    /// AI resolver.
    pub resolver: Arc<Resolver>,
    /// Assignment engine.
    pub assign: Arc<AssignmentEngine>,
    /// Session/message store.
    pub conversations: Arc<dyn ConversationStore>,
    /// Ticket store.
    pub tickets: Arc<dyn TicketStore>,
    /// Connection hub.
    pub hub: Hub,
    /// Platform event bus.
    pub events: EventBus,
    /// Metrics handle.
    pub metrics: Metrics,
}

/// The inbound pipeline.
pub struct Router {
    policy: EscalationPolicy,
    adapters: AdapterRegistry,
    deps: RouterDeps,
    /// AI answers per session since the last human involvement.
    ai_answers: DashMap<SessionId, u32>,
    /// Sessions with live WebRTC signalling.
    rtc_sessions: DashMap<SessionId, ()>,
}

impl Router {
    /// Build a router.
    #[must_use]
    pub fn new(policy: EscalationPolicy, adapters: AdapterRegistry, deps: RouterDeps) -> Arc<Self> {
        Arc::new(Self {
            policy,
            adapters,
            deps,
            ai_answers: DashMap::new(),
            rtc_sessions: DashMap::new(),
        })
    }

    /// The adapter registry, for stats surfaces.
    #[must_use]
    pub fn adapters(&self) -> &AdapterRegistry {
        &self.adapters
    }

    /// Dispatch one inbound frame.
    pub async fn handle(&self, inbound: Inbound) {
        match inbound.tag {
            ClientTag::CustomerOf(session) => self.handle_customer(session, inbound.raw).await,
            ClientTag::Operator(operator) => self.handle_operator(operator, inbound.raw).await,
        }
    }

    /// Drop per-session state (session ended or customer gone).
    pub fn forget_session(&self, session: &SessionId) {
        self.ai_answers.remove(session);
        if self.rtc_sessions.remove(session).is_some() {
            self.deps.metrics.webrtc_peers.dec();
        }
    }

    // -----------------------------------------------------------------
    // Customer frames
    // -----------------------------------------------------------------

    async fn handle_customer(&self, session_id: SessionId, raw: RawFrame) {
        let Ok(session) = self.deps.conversations.session(&session_id).await else {
            warn!(%session_id, "Frame for unknown session");
            self.deps
                .hub
                .deliver_to_session(&session_id, Frame::system("unknown session"))
                .await;
            return;
        };
        let platform = session.platform.clone();

        let frame = match Frame::try_from(raw.clone()) {
            Ok(frame) => frame,
            Err(FrameError::UnknownType(kind)) => {
                self.handle_unknown(&session, &platform, raw, &kind).await;
                return;
            }
            Err(FrameError::Malformed(reason)) => {
                debug!(%session_id, reason, "Malformed frame rejected");
                self.deps
                    .hub
                    .deliver_to_session(&session_id, Frame::system("malformed frame"))
                    .await;
                return;
            }
        };

        match frame {
            Frame::TextMessage { content } => {
                self.customer_text(session, raw, content).await;
            }
            Frame::WebrtcOffer(_) | Frame::WebrtcAnswer(_) | Frame::WebrtcCandidate(_) => {
                if matches!(frame, Frame::WebrtcOffer(_))
                    && self
                        .rtc_sessions
                        .insert(session_id.clone(), ())
                        .is_none()
                {
                    self.deps.metrics.webrtc_peers.inc();
                }
                self.relay_to_operator(&session_id, frame).await;
            }
            Frame::Typing { .. } | Frame::Presence(_) => {
                self.relay_to_operator(&session_id, frame).await;
            }
            Frame::TransferRequest { reason, .. } => {
                let reason = reason.unwrap_or_else(|| "customer-request".to_string());
                self.escalate(&session_id, &reason).await;
            }
            other => {
                debug!(%session_id, kind = other.kind(), "Ignoring frame kind from customer");
            }
        }
    }

    /// Unknown frame types go to the channel adapter; whatever it still
    /// cannot make recognisable is counted and dropped.
    async fn handle_unknown(
        &self,
        session: &Session,
        platform: &Platform,
        raw: RawFrame,
        kind: &str,
    ) {
        if let Some(classification) = self.adapters.classify(platform, &raw) {
            if classification.force_escalate {
                self.escalate(&session.id, "policy").await;
                return;
            }
            let transformed = self.adapters.transform_in(platform, raw);
            if let Ok(frame) = Frame::try_from(transformed) {
                // The adapter normalized it into a known type.
                if let Frame::TextMessage { content } = frame {
                    let raw = RawFrame::new("text-message", json!({"content": content.clone()}));
                    self.customer_text(session.clone(), raw, content).await;
                }
                return;
            }
            self.adapters.count_error(platform);
        }
        debug!(session = %session.id, kind, "Unknown frame type dropped");
        self.deps
            .metrics
            .hub_unknown_frames
            .with_label_values(&[platform.as_str()])
            .inc();
    }

    /// The text pipeline: validate, persist, transform, answer or
    /// relay, escalate.
    async fn customer_text(&self, session: Session, raw: RawFrame, content: String) {
        let session_id = session.id.clone();

        // 1. Validate.
        if content.trim().is_empty() || content.len() > MAX_CONTENT_LEN {
            debug!(%session_id, len = content.len(), "Message failed validation");
            self.deps
                .hub
                .deliver_to_session(&session_id, Frame::system("message rejected"))
                .await;
            return;
        }

        // 2. Persist, best-effort: a storage outage must not block
        // delivery.
        let conversations = Arc::clone(&self.deps.conversations);
        let stored = with_retry(RetryPolicy::default(), || {
            let conversations = Arc::clone(&conversations);
            let session_id = session_id.clone();
            let content = content.clone();
            async move {
                conversations
                    .append_message(&session_id, content, MessageKind::Text, SenderRole::Customer)
                    .await
            }
        })
        .await;
        let persisted = stored.is_ok();
        if !persisted {
            warn!(%session_id, "Customer message not persisted, continuing");
        }

        // 3. Channel adapter transform.
        let platform = session.platform.clone();
        let transformed = self.adapters.transform_in(&platform, raw.clone());
        let adapter_force = self
            .adapters
            .classify(&platform, &raw)
            .is_some_and(|c| c.force_escalate);
        let query = transformed
            .data
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or(&content)
            .to_string();

        // Keep the session's activity clock fresh.
        self.touch_session(session.clone()).await;

        // Publish message-received for automation, with ticket context
        // when the session already has one.
        let ticket = self
            .deps
            .tickets
            .ticket_for_session(&session_id)
            .await
            .ok()
            .flatten();
        self.publish_message_event(&session, stored.as_ref().ok(), &content, persisted, ticket.as_ref());

        // 4/5. Operator-handled sessions relay; AI answers otherwise.
        if let Some(operator) = self.deps.assign.operator_for(&session_id) {
            let frame = Frame::text(content.clone());
            self.deps
                .hub
                .deliver_to_operator(operator, frame.clone())
                .await;
            // Co-viewing clients (other tabs) see the same message.
            self.deps.hub.deliver_to_session(&session_id, frame).await;
            return;
        }

        self.answer_with_ai(&session, &query, adapter_force, ticket).await;
    }

    async fn answer_with_ai(
        &self,
        session: &Session,
        query: &str,
        adapter_force: bool,
        ticket: Option<Ticket>,
    ) {
        let session_id = session.id.clone();
        let history = self
            .deps
            .conversations
            .recent_messages(&session_id, self.policy.history_window())
            .await
            .unwrap_or_default();

        let answer = match self.deps.resolver.query(query, &session_id, &history).await {
            Ok(answer) => answer,
            Err(err) => {
                warn!(%session_id, error = %err, "Resolver unavailable");
                self.deps
                    .hub
                    .deliver_to_session(
                        &session_id,
                        Frame::system("we're having trouble answering right now"),
                    )
                    .await;
                return;
            }
        };

        // Persist the AI reply, best-effort.
        let _ = self
            .deps
            .conversations
            .append_message(
                &session_id,
                answer.content.clone(),
                MessageKind::Text,
                SenderRole::Ai,
            )
            .await;

        let count = {
            let mut entry = self.ai_answers.entry(session_id.clone()).or_insert(0);
            *entry += 1;
            *entry
        };

        let frame = Frame::AiResponse {
            content: answer.content.clone(),
            confidence: answer.confidence,
            source: answer.source,
        };
        let raw = self
            .adapters
            .transform_out(&session.platform, RawFrame::from(frame));
        if let Ok(frame) = Frame::try_from(raw) {
            self.deps.hub.deliver_to_session(&session_id, frame).await;
        }

        // Escalation policy over the recent customer messages.
        let recent_customer: Vec<String> = history
            .iter()
            .filter(|m| m.sender == SenderRole::Customer)
            .map(|m| m.content.clone())
            .chain(std::iter::once(query.to_string()))
            .collect();

        match self
            .policy
            .decide(&answer, &recent_customer, adapter_force, count)
        {
            EscalationDecision::Stay => {}
            EscalationDecision::Escalate(reason) => {
                let priority = ticket.map_or(Priority::Normal, |t| t.priority);
                self.escalate_with_priority(&session_id, reason, priority).await;
            }
        }
    }

    // -----------------------------------------------------------------
    // Operator frames
    // -----------------------------------------------------------------

    async fn handle_operator(&self, operator: PrincipalId, raw: RawFrame) {
        // Operator frames carry the target session alongside the
        // payload; a console without one has nothing to route to.
        let Some(session_id) = session_hint(&raw) else {
            debug!(%operator, kind = %raw.kind, "Operator frame without session target");
            self.deps
                .metrics
                .hub_unknown_frames
                .with_label_values(&["operator"])
                .inc();
            return;
        };

        let frame = match Frame::try_from(raw) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(%operator, error = %err, "Undecodable operator frame");
                return;
            }
        };

        match frame {
            Frame::TextMessage { content } => {
                self.operator_text(operator, &session_id, content).await;
            }
            Frame::TransferRequest { target, reason } => {
                let reason = reason.unwrap_or_else(|| "operator-request".to_string());
                let result = match target {
                    Some(target) => self
                        .deps
                        .assign
                        .transfer_to_operator(&session_id, target, &reason)
                        .await
                        .map(|_| ()),
                    None => self
                        .deps
                        .assign
                        .transfer_to_human(&session_id, &reason, Priority::Normal, Default::default())
                        .await
                        .map(|_| ()),
                };
                if let Err(err) = result {
                    warn!(%operator, %session_id, error = %err, "Transfer request failed");
                    self.deps
                        .hub
                        .deliver_to_operator(operator, Frame::system(err.to_string()))
                        .await;
                }
            }
            Frame::Typing { from } => {
                self.deps
                    .hub
                    .deliver_to_session(&session_id, Frame::Typing { from })
                    .await;
            }
            frame if frame.is_webrtc() => {
                self.deps.hub.deliver_to_session(&session_id, frame).await;
            }
            other => {
                debug!(%operator, kind = other.kind(), "Ignoring frame kind from operator");
            }
        }
    }

    async fn operator_text(&self, operator: PrincipalId, session_id: &SessionId, content: String) {
        if content.trim().is_empty() || content.len() > MAX_CONTENT_LEN {
            self.deps
                .hub
                .deliver_to_operator(operator, Frame::system("message rejected"))
                .await;
            return;
        }

        let stored = self
            .deps
            .conversations
            .append_message(
                session_id,
                content.clone(),
                MessageKind::Text,
                SenderRole::Operator,
            )
            .await;

        // First operator reply stamps the first-response time.
        if let Ok(Some(mut ticket)) = self.deps.tickets.ticket_for_session(session_id).await {
            if ticket.first_response_at.is_none() {
                ticket.first_response_at = Some(Utc::now());
                ticket.updated_at = Utc::now();
                if let Err(err) = self.deps.tickets.update(ticket).await {
                    warn!(%session_id, error = %err, "Failed to stamp first response");
                }
            }
        }

        // A human is engaged; the AI answer streak is over.
        self.ai_answers.remove(session_id);

        if let Ok(session) = self.deps.conversations.session(session_id).await {
            let raw = self
                .adapters
                .transform_out(&session.platform, RawFrame::from(Frame::text(content.clone())));
            if let Ok(frame) = Frame::try_from(raw) {
                self.deps.hub.deliver_to_session(session_id, frame).await;
            }
            self.publish_message_event(&session, stored.as_ref().ok(), &content, stored.is_ok(), None);
        }
    }

    // -----------------------------------------------------------------
    // Shared helpers
    // -----------------------------------------------------------------

    async fn relay_to_operator(&self, session_id: &SessionId, frame: Frame) {
        if let Some(operator) = self.deps.assign.operator_for(session_id) {
            self.deps.hub.deliver_to_operator(operator, frame).await;
        }
    }

    async fn escalate(&self, session_id: &SessionId, reason: &str) {
        let priority = self
            .deps
            .tickets
            .ticket_for_session(session_id)
            .await
            .ok()
            .flatten()
            .map_or(Priority::Normal, |t| t.priority);
        self.escalate_with_priority(session_id, reason, priority).await;
    }

    async fn escalate_with_priority(&self, session_id: &SessionId, reason: &str, priority: Priority) {
        match self
            .deps
            .assign
            .transfer_to_human(session_id, reason, priority, Default::default())
            .await
        {
            Ok(outcome) => {
                self.ai_answers.remove(session_id);
                info!(%session_id, reason, ?outcome, "Session escalated");
            }
            Err(AssignError::AlreadyWaiting(_)) => {
                debug!(%session_id, "Escalation requested while already waiting");
            }
            Err(err) => {
                warn!(%session_id, error = %err, "Escalation failed");
            }
        }
    }

    async fn touch_session(&self, mut session: Session) {
        session.last_activity_at = Utc::now();
        if session.status == SessionStatus::Active || session.status == SessionStatus::Handled {
            let _ = self.deps.conversations.update_session(session).await;
        }
    }

    fn publish_message_event(
        &self,
        session: &Session,
        stored: Option<&Message>,
        content: &str,
        persisted: bool,
        ticket: Option<&Ticket>,
    ) {
        let payload = json!({
            "message": {
                "id": stored.map(|m| m.id.0),
                "content": content,
                "sender": stored.map_or("customer", |m| match m.sender {
                    SenderRole::Customer => "customer",
                    SenderRole::Ai => "ai",
                    SenderRole::Operator => "operator",
                    SenderRole::System => "system",
                }),
                "persisted": persisted,
            },
            "session": {
                "id": session.id,
                "platform": session.platform,
                "customer": session.customer,
            },
            "ticket": ticket,
        });
        let target = stored.map_or(0, |m| m.id.0);
        self.deps.events.publish(
            PlatformEvent::new(EventTag::MessageReceived, target, payload)
                .with_session(session.id.clone()),
        );
    }
}

/// Read the routing target out of an operator frame's payload.
fn session_hint(raw: &RawFrame) -> Option<SessionId> {
    raw.data
        .get("session")
        .and_then(|s| s.as_str())
        .and_then(|s| uuid::Uuid::parse_str(s).ok())
        .map(SessionId)
}

/// Background task: drain the hub's inbound channel through the router
/// until shutdown. Frames are handled in arrival order, which keeps
/// per-session ordering without extra locks.
pub async fn run_router_loop(
    router: Arc<Router>,
    mut inbound: tokio::sync::mpsc::Receiver<Inbound>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    info!("Router loop started");
    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => {
                info!("Router loop received shutdown signal");
                break;
            }
            frame = inbound.recv() => {
                match frame {
                    Some(frame) => router.handle(frame).await,
                    None => {
                        info!("Inbound channel closed, router loop exiting");
                        break;
                    }
                }
            }
        }
    }
}
