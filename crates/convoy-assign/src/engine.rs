//! The assignment engine and transfer state machine.
//!
//! Every transition of one session happens under that session's async
//! mutex, taken for the duration of the transition only. The online
//! index has its own lock; engine methods never hold both across an
//! await into storage.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, Notify, broadcast};
use tracing::{debug, info, warn};

use convoy_config::AssignmentConfig;
use convoy_core::prelude::*;
use convoy_events::EventBus;
use convoy_hub::Hub;
use convoy_storage::{
    ConversationStore, DirectoryStore, QueueStore, RetryPolicy, StorageError, TicketStore,
    with_retry,
};

use crate::error::{AssignError, AssignResult};
use crate::index::{OnlineIndex, OperatorSnapshot};
use crate::queue::{WaitingEntry, WaitingQueue};

/// What a transfer-to-human attempt produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// An operator took the session immediately.
    Assigned {
        /// The new handler.
        operator: PrincipalId,
        /// The ticket created or updated for the escalation.
        ticket: TicketId,
    },
    /// No eligible operator; the session is parked.
    Queued {
        /// 1-based queue position.
        position: usize,
    },
}

enum DrainStep {
    Assigned,
    NoOperator,
    Skipped,
}

/// The engine. Shared as `Arc<AssignmentEngine>` between the router,
/// the gateway surface, and the drain loop.
pub struct AssignmentEngine {
    config: AssignmentConfig,
    index: OnlineIndex,
    queue: WaitingQueue,
    directory: Arc<dyn DirectoryStore>,
    conversations: Arc<dyn ConversationStore>,
    tickets: Arc<dyn TicketStore>,
    queue_store: Arc<dyn QueueStore>,
    hub: Hub,
    events: EventBus,
    session_locks: DashMap<SessionId, Arc<Mutex<()>>>,
    handlers: DashMap<SessionId, PrincipalId>,
    drain_notify: Arc<Notify>,
}

impl AssignmentEngine {
    /// Build the engine. Call [`AssignmentEngine::rebuild_index`]
    /// before serving.
    #[must_use]
    pub fn new(
        config: AssignmentConfig,
        directory: Arc<dyn DirectoryStore>,
        conversations: Arc<dyn ConversationStore>,
        tickets: Arc<dyn TicketStore>,
        queue_store: Arc<dyn QueueStore>,
        hub: Hub,
        events: EventBus,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            index: OnlineIndex::new(),
            queue: WaitingQueue::new(),
            directory,
            conversations,
            tickets,
            queue_store,
            hub,
            events,
            session_locks: DashMap::new(),
            handlers: DashMap::new(),
            drain_notify: Arc::new(Notify::new()),
        })
    }

    /// Rebuild the online index from persistent operator state.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn rebuild_index(&self) -> AssignResult<()> {
        let operators = self.directory.operators().await?;
        let mut count = 0;
        for profile in operators {
            if profile.availability != Availability::Offline {
                self.index.insert(profile);
                count += 1;
            }
        }
        info!(operators = count, "Online index rebuilt from storage");
        Ok(())
    }

    // -----------------------------------------------------------------
    // Operator lifecycle
    // -----------------------------------------------------------------

    /// Bring an operator online with a fresh profile from storage.
    ///
    /// # Errors
    ///
    /// Propagates storage failures (unknown operator included).
    pub async fn go_online(&self, id: PrincipalId) -> AssignResult<()> {
        let mut profile = self.directory.operator_profile(id).await?;
        profile.availability = Availability::Online;
        self.index.insert(profile.clone());
        self.persist_operator(id).await;
        info!(operator = %id, "Operator online");
        self.drain_notify.notify_one();
        Ok(())
    }

    /// Take an operator offline; their active sessions go back to the
    /// waiting queue with reason `operator-offline`.
    ///
    /// # Errors
    ///
    /// Propagates storage failures from the requeue path.
    pub async fn go_offline(&self, id: PrincipalId) -> AssignResult<()> {
        let removed = self.index.remove(id);

        // Collect this operator's sessions before touching them.
        let sessions: Vec<SessionId> = self
            .handlers
            .iter()
            .filter(|entry| *entry.value() == id)
            .map(|entry| entry.key().clone())
            .collect();

        for session in sessions {
            if let Err(err) = self.requeue_from_operator(&session, id).await {
                warn!(%session, operator = %id, error = %err, "Failed to requeue session");
            }
        }

        if let Some(snapshot) = removed {
            let mut profile = snapshot.profile;
            profile.availability = Availability::Offline;
            profile.current_load = 0;
            if let Err(err) = self.directory.upsert_operator(profile).await {
                warn!(operator = %id, error = %err, "Failed to persist offline state");
            }
        }
        info!(operator = %id, "Operator offline");
        Ok(())
    }

    /// Change availability between online, busy, and away.
    ///
    /// # Errors
    ///
    /// [`AssignError::OfflineViaStatus`] for offline;
    /// [`AssignError::OperatorNotOnline`] when not in the index.
    pub async fn update_status(
        &self,
        id: PrincipalId,
        availability: Availability,
    ) -> AssignResult<()> {
        self.index.set_availability(id, availability)?;
        self.persist_operator(id).await;
        if availability == Availability::Online {
            self.drain_notify.notify_one();
        }
        Ok(())
    }

    /// Release one of an operator's slots (session resolved without a
    /// transfer). Triggers a queue drain when a slot opened up.
    pub async fn release_slot(&self, id: PrincipalId) {
        if self.index.release_slot(id) {
            self.drain_notify.notify_one();
        }
        self.persist_operator(id).await;
    }

    // -----------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------

    /// The operator currently handling a session, if any.
    #[must_use]
    pub fn operator_for(&self, session: &SessionId) -> Option<PrincipalId> {
        self.handlers.get(session).map(|entry| *entry.value())
    }

    /// Best eligible operator for the request, or `None`.
    #[must_use]
    pub fn find_available(
        &self,
        skills: &BTreeSet<String>,
        priority: Priority,
    ) -> Option<PrincipalId> {
        self.index
            .find_available(skills, priority, self.config.away_eligible_floor)
    }

    /// Snapshot of the online index, for dashboards and health.
    #[must_use]
    pub fn operators(&self) -> Vec<OperatorSnapshot> {
        self.index.snapshot()
    }

    /// Sessions currently parked.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Notifier that wakes the drain loop.
    #[must_use]
    pub fn drain_trigger(&self) -> Arc<Notify> {
        Arc::clone(&self.drain_notify)
    }

    // -----------------------------------------------------------------
    // Transfers
    // -----------------------------------------------------------------

    /// Move a session to a human: straight to an operator when one is
    /// eligible, otherwise into the waiting queue.
    ///
    /// # Errors
    ///
    /// [`AssignError::AlreadyWaiting`] when the session already has a
    /// live waiting record; storage failures otherwise.
    pub async fn transfer_to_human(
        &self,
        session: &SessionId,
        reason: &str,
        priority: Priority,
        skills: BTreeSet<String>,
    ) -> AssignResult<TransferOutcome> {
        let lock = self.lock_for(session);
        let _guard = lock.lock().await;

        // A session already parked stays parked; surfacing the conflict
        // here keeps one session from being handled twice.
        if let Some(record) = self.queue_store.waiting_for(session).await? {
            if record.status == WaitingStatus::Waiting {
                return Err(AssignError::AlreadyWaiting(session.clone()));
            }
        }

        // An operator-handled session first releases its current slot.
        let prev = self.operator_for(session);
        if let Some(prev_op) = prev {
            self.handlers.remove(session);
            if self.index.release_slot(prev_op) {
                self.drain_notify.notify_one();
            }
            self.persist_operator(prev_op).await;
            self.queue_store
                .append_transfer(TransferRecord::new(
                    session.clone(),
                    Some(TransferParty::Operator(prev_op)),
                    TransferParty::Queue,
                    reason,
                ))
                .await?;
        }
        let from = Some(prev.map_or(TransferParty::Ai, TransferParty::Operator));

        // Find-and-claim loop: another transfer may win the slot between
        // the lookup and the claim.
        loop {
            let Some(operator) = self.find_available(&skills, priority) else {
                return self.enqueue_waiting(session, reason, priority, skills).await;
            };
            match self.index.claim_slot(operator) {
                Ok(()) => {
                    let ticket = self
                        .assign_session(session, operator, from, reason, priority)
                        .await?;
                    return Ok(TransferOutcome::Assigned { operator, ticket });
                }
                Err(AssignError::OperatorAtCapacity(_) | AssignError::OperatorNotOnline(_)) => {
                    debug!(operator = %operator, "Lost the slot race, retrying find");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Direct operator-to-operator (or queue-to-operator) transfer.
    ///
    /// # Errors
    ///
    /// [`AssignError::OperatorAtCapacity`] when the target has no free
    /// slot; storage failures otherwise.
    pub async fn transfer_to_operator(
        &self,
        session: &SessionId,
        target: PrincipalId,
        reason: &str,
    ) -> AssignResult<TransferOutcome> {
        let lock = self.lock_for(session);
        let _guard = lock.lock().await;

        // Transfer-to-self is a no-op; claiming again would inflate the
        // operator's load.
        if self.operator_for(session) == Some(target) {
            let ticket = self
                .tickets
                .ticket_for_session(session)
                .await?
                .map(|t| t.id)
                .ok_or_else(|| {
                    StorageError::not_found("ticket for session", session.clone())
                })?;
            return Ok(TransferOutcome::Assigned {
                operator: target,
                ticket,
            });
        }

        // The claim must succeed before the previous slot is released.
        self.index.claim_slot(target)?;

        let prev = self.operator_for(session);
        let from = if let Some(prev_op) = prev {
            if prev_op != target {
                if self.index.release_slot(prev_op) {
                    self.drain_notify.notify_one();
                }
                self.persist_operator(prev_op).await;
            }
            Some(TransferParty::Operator(prev_op))
        } else if self.queue.cancel(session).is_some() {
            self.queue_store
                .set_waiting_status(session, WaitingStatus::Assigned)
                .await?;
            Some(TransferParty::Queue)
        } else {
            Some(TransferParty::Ai)
        };

        let priority = match self.tickets.ticket_for_session(session).await? {
            Some(ticket) => ticket.priority,
            None => Priority::Normal,
        };
        let ticket = self
            .assign_session(session, target, from, reason, priority)
            .await?;
        Ok(TransferOutcome::Assigned {
            operator: target,
            ticket,
        })
    }

    /// End a session: release the operator slot, cancel any waiting
    /// record, mark the session ended.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn end_session(&self, session: &SessionId) -> AssignResult<()> {
        let lock = self.lock_for(session);
        let _guard = lock.lock().await;

        if let Some((_, operator)) = self.handlers.remove(session) {
            if self.index.release_slot(operator) {
                self.drain_notify.notify_one();
            }
            self.persist_operator(operator).await;
        }

        if self.queue.cancel(session).is_some() {
            self.queue_store
                .set_waiting_status(session, WaitingStatus::Cancelled)
                .await?;
        }

        if let Ok(mut stored) = self.conversations.session(session).await {
            stored.status = SessionStatus::Ended;
            stored.last_activity_at = Utc::now();
            self.conversations.update_session(stored).await?;
        }

        self.session_locks.remove(session);
        Ok(())
    }

    // -----------------------------------------------------------------
    // Queue drain
    // -----------------------------------------------------------------

    /// Drain the waiting queue until it is empty or the head cannot be
    /// placed. Returns how many sessions were assigned.
    pub async fn drain_once(&self) -> usize {
        let mut assigned = 0;
        loop {
            let Some(entry) = self.queue.pop() else { break };
            match self.try_assign_from_queue(entry).await {
                Ok(DrainStep::Assigned) => assigned += 1,
                Ok(DrainStep::Skipped) => {}
                Ok(DrainStep::NoOperator) => break,
                Err(err) => {
                    warn!(error = %err, "Queue drain step failed");
                    break;
                }
            }
        }
        if assigned > 0 {
            info!(assigned, remaining = self.queue.len(), "Queue drained");
        }
        assigned
    }

    async fn try_assign_from_queue(&self, entry: WaitingEntry) -> AssignResult<DrainStep> {
        // A record cancelled while queued is dropped, not assigned.
        match self.queue_store.waiting_for(&entry.session).await? {
            Some(record) if record.status == WaitingStatus::Waiting => {}
            _ => return Ok(DrainStep::Skipped),
        }

        let lock = self.lock_for(&entry.session);
        let _guard = lock.lock().await;

        loop {
            let Some(operator) = self.find_available(&entry.skills, entry.priority) else {
                self.queue.put_back(entry);
                return Ok(DrainStep::NoOperator);
            };
            match self.index.claim_slot(operator) {
                Ok(()) => {
                    self.queue_store
                        .set_waiting_status(&entry.session, WaitingStatus::Assigned)
                        .await?;
                    self.assign_session(
                        &entry.session,
                        operator,
                        Some(TransferParty::Queue),
                        &entry.reason,
                        entry.priority,
                    )
                    .await?;
                    return Ok(DrainStep::Assigned);
                }
                Err(AssignError::OperatorAtCapacity(_) | AssignError::OperatorNotOnline(_)) => {}
                Err(err) => {
                    self.queue.put_back(entry);
                    return Err(err);
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    fn lock_for(&self, session: &SessionId) -> Arc<Mutex<()>> {
        self.session_locks
            .entry(session.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Requeue a session whose operator went offline.
    async fn requeue_from_operator(
        &self,
        session: &SessionId,
        operator: PrincipalId,
    ) -> AssignResult<()> {
        let lock = self.lock_for(session);
        let _guard = lock.lock().await;

        self.handlers.remove(session);
        self.queue_store
            .append_transfer(TransferRecord::new(
                session.clone(),
                Some(TransferParty::Operator(operator)),
                TransferParty::Queue,
                "operator-offline",
            ))
            .await?;

        let priority = match self.tickets.ticket_for_session(session).await? {
            Some(ticket) => ticket.priority,
            None => Priority::Normal,
        };
        self.enqueue_waiting(session, "operator-offline", priority, BTreeSet::new())
            .await?;
        Ok(())
    }

    async fn enqueue_waiting(
        &self,
        session: &SessionId,
        reason: &str,
        priority: Priority,
        skills: BTreeSet<String>,
    ) -> AssignResult<TransferOutcome> {
        let record = WaitingRecord::waiting(session.clone(), priority, reason);
        match self.queue_store.put_waiting(record.clone()).await {
            Ok(()) => {}
            Err(StorageError::Conflict(_)) => {
                return Err(AssignError::AlreadyWaiting(session.clone()));
            }
            Err(err) => return Err(err.into()),
        }

        let position = self.queue.push(WaitingEntry {
            session: session.clone(),
            priority,
            queued_at: record.queued_at,
            skills,
            reason: reason.to_string(),
        });

        if let Ok(mut stored) = self.conversations.session(session).await {
            stored.status = SessionStatus::Waiting;
            stored.last_activity_at = Utc::now();
            if let Err(err) = self.conversations.update_session(stored).await {
                warn!(%session, error = %err, "Failed to persist waiting status");
            }
        }

        self.hub
            .deliver_to_session(
                session,
                Frame::HandoffNotification {
                    reason: reason.to_string(),
                    position: Some(u32::try_from(position).unwrap_or(u32::MAX)),
                },
            )
            .await;

        debug!(%session, position, "Session queued for a human");
        Ok(TransferOutcome::Queued { position })
    }

    /// Final leg of every assignment: records, ticket, notifications.
    /// The caller has already claimed the slot and holds the session
    /// lock.
    async fn assign_session(
        &self,
        session: &SessionId,
        operator: PrincipalId,
        from: Option<TransferParty>,
        reason: &str,
        priority: Priority,
    ) -> AssignResult<TicketId> {
        let now = Utc::now();
        self.handlers.insert(session.clone(), operator);
        self.index.mark_assigned(operator, now);
        self.persist_operator(operator).await;

        self.queue_store
            .append_transfer(TransferRecord::new(
                session.clone(),
                from,
                TransferParty::Operator(operator),
                reason,
            ))
            .await?;

        let stored_session = match self.conversations.session(session).await {
            Ok(mut stored) => {
                stored.status = SessionStatus::Handled;
                stored.last_activity_at = now;
                if let Err(err) = self.conversations.update_session(stored.clone()).await {
                    warn!(%session, error = %err, "Failed to persist handled status");
                }
                Some(stored)
            }
            Err(_) => None,
        };

        // Create or update the ticket; load change and transfer record
        // belong to the same logical step.
        let ticket = match self.tickets.ticket_for_session(session).await? {
            Some(mut ticket) => {
                ticket.operator = Some(operator);
                ticket.set_status(TicketStatus::Assigned, now);
                self.tickets.update(ticket.clone()).await?;
                self.publish_ticket_event(EventTag::TicketUpdated, &ticket, stored_session.as_ref());
                ticket
            }
            None => {
                let customer = stored_session
                    .as_ref()
                    .map_or(PrincipalId(0), |s| s.customer);
                let mut ticket = Ticket::open("Escalated conversation", reason, customer, priority)
                    .with_session(session.clone());
                ticket.operator = Some(operator);
                ticket.set_status(TicketStatus::Assigned, now);
                let ticket = self.tickets.create(ticket).await?;
                self.publish_ticket_event(EventTag::TicketCreated, &ticket, stored_session.as_ref());
                ticket
            }
        };

        self.hub
            .deliver_to_session(
                session,
                Frame::HandoffNotification {
                    reason: reason.to_string(),
                    position: None,
                },
            )
            .await;
        self.hub
            .deliver_to_operator(operator, Frame::system("new session"))
            .await;

        info!(%session, operator = %operator, ticket = %ticket.id, "Session assigned");
        Ok(ticket.id)
    }

    fn publish_ticket_event(&self, tag: EventTag, ticket: &Ticket, session: Option<&Session>) {
        let payload = serde_json::json!({
            "ticket": ticket,
            "session": session.map(|s| serde_json::json!({
                "id": s.id,
                "platform": s.platform,
                "customer": s.customer,
            })),
        });
        let mut event = PlatformEvent::new(tag, ticket.id.0, payload);
        if let Some(session) = session {
            event = event.with_session(session.id.clone());
        }
        self.events.publish(event);
    }

    async fn persist_operator(&self, id: PrincipalId) {
        let Some(snapshot) = self.index.get(id) else {
            return;
        };
        let directory = Arc::clone(&self.directory);
        let profile = snapshot.profile;
        let result = with_retry(RetryPolicy::default(), || {
            let directory = Arc::clone(&directory);
            let profile = profile.clone();
            async move { directory.upsert_operator(profile).await }
        })
        .await;
        if let Err(err) = result {
            warn!(operator = %id, error = %err, "Failed to persist operator snapshot");
        }
    }
}

/// Background task: drain on slot/availability events and on a
/// periodic tick, until shutdown.
pub async fn run_drain_loop(
    engine: Arc<AssignmentEngine>,
    tick: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let trigger = engine.drain_trigger();
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!(tick_secs = tick.as_secs(), "Queue drain loop started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => {
                info!("Drain loop received shutdown signal");
                break;
            }
            () = trigger.notified() => {
                engine.drain_once().await;
            }
            _ = ticker.tick() => {
                engine.drain_once().await;
            }
        }
    }
}
