//! In-memory reference implementation of every repository trait.
//!
//! Backs tests and single-node dev deployments. Maps are guarded by
//! `tokio::sync::RwLock`; numeric ids come from per-family counters.
//! Locks are held only for the map operation, never across awaits.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use convoy_core::prelude::*;

use crate::error::{StorageError, StorageResult};
use crate::stores::{
    AutomationStore, ConversationStore, DirectoryStore, KnowledgeStore, QueueStore, SlaStore,
    TicketStore,
};

/// Shared in-memory store implementing all repository traits.
#[derive(Default)]
pub struct MemoryStore {
    principals: RwLock<HashMap<PrincipalId, Principal>>,
    operators: RwLock<HashMap<PrincipalId, OperatorProfile>>,
    sessions: RwLock<HashMap<SessionId, Session>>,
    messages: RwLock<HashMap<SessionId, Vec<Message>>>,
    tickets: RwLock<HashMap<TicketId, Ticket>>,
    comments: RwLock<Vec<TicketComment>>,
    waiting: RwLock<HashMap<SessionId, Vec<WaitingRecord>>>,
    transfers: RwLock<HashMap<SessionId, Vec<TransferRecord>>>,
    sla_configs: RwLock<HashMap<i64, SlaConfig>>,
    violations: RwLock<Vec<SlaViolation>>,
    triggers: RwLock<BTreeMap<i64, AutomationTrigger>>,
    runs: RwLock<Vec<AutomationRun>>,
    docs: RwLock<HashMap<i64, KnowledgeDoc>>,
    next_id: AtomicI64,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            ..Self::default()
        }
    }

    /// Fault injection: make every write return `Unavailable` until
    /// switched back. Lets tests exercise the retry and
    /// `persisted=false` paths.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable("write fault injected".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DirectoryStore for MemoryStore {
    async fn principal(&self, id: PrincipalId) -> StorageResult<Principal> {
        self.principals
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("principal", id))
    }

    async fn upsert_principal(&self, principal: Principal) -> StorageResult<()> {
        self.check_writable()?;
        self.principals
            .write()
            .await
            .insert(principal.id, principal);
        Ok(())
    }

    async fn operator_profile(&self, id: PrincipalId) -> StorageResult<OperatorProfile> {
        self.operators
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("operator", id))
    }

    async fn upsert_operator(&self, profile: OperatorProfile) -> StorageResult<()> {
        self.check_writable()?;
        self.operators.write().await.insert(profile.id, profile);
        Ok(())
    }

    async fn operators(&self) -> StorageResult<Vec<OperatorProfile>> {
        let mut all: Vec<_> = self.operators.read().await.values().cloned().collect();
        all.sort_by_key(|o| o.id);
        Ok(all)
    }

    async fn operators_in_department(
        &self,
        department: &str,
    ) -> StorageResult<Vec<OperatorProfile>> {
        let mut hits: Vec<_> = self
            .operators
            .read()
            .await
            .values()
            .filter(|o| o.department == department)
            .cloned()
            .collect();
        hits.sort_by_key(|o| o.id);
        Ok(hits)
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn create_session(&self, session: Session) -> StorageResult<()> {
        self.check_writable()?;
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(StorageError::Conflict(format!(
                "session already exists: {}",
                session.id
            )));
        }
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn session(&self, id: &SessionId) -> StorageResult<Session> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("session", id))
    }

    async fn update_session(&self, session: Session) -> StorageResult<()> {
        self.check_writable()?;
        let mut sessions = self.sessions.write().await;
        if !sessions.contains_key(&session.id) {
            return Err(StorageError::not_found("session", &session.id));
        }
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn append_message(
        &self,
        session: &SessionId,
        content: String,
        kind: MessageKind,
        sender: SenderRole,
    ) -> StorageResult<Message> {
        self.check_writable()?;
        if !self.sessions.read().await.contains_key(session) {
            return Err(StorageError::not_found("session", session));
        }
        let message = Message {
            id: MessageId(self.next_id()),
            session: session.clone(),
            content,
            kind,
            sender,
            created_at: Utc::now(),
        };
        self.messages
            .write()
            .await
            .entry(session.clone())
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn recent_messages(
        &self,
        session: &SessionId,
        limit: usize,
    ) -> StorageResult<Vec<Message>> {
        let map = self.messages.read().await;
        let Some(log) = map.get(session) else {
            return Ok(Vec::new());
        };
        let start = log.len().saturating_sub(limit);
        Ok(log[start..].to_vec())
    }

    async fn messages(
        &self,
        session: &SessionId,
        offset: usize,
        limit: usize,
    ) -> StorageResult<Vec<Message>> {
        let map = self.messages.read().await;
        let Some(log) = map.get(session) else {
            return Ok(Vec::new());
        };
        Ok(log.iter().skip(offset).take(limit).cloned().collect())
    }
}

#[async_trait]
impl TicketStore for MemoryStore {
    async fn create(&self, mut ticket: Ticket) -> StorageResult<Ticket> {
        self.check_writable()?;
        ticket.id = TicketId(self.next_id());
        self.tickets
            .write()
            .await
            .insert(ticket.id, ticket.clone());
        Ok(ticket)
    }

    async fn get(&self, id: TicketId) -> StorageResult<Ticket> {
        self.tickets
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("ticket", id))
    }

    async fn update(&self, ticket: Ticket) -> StorageResult<()> {
        self.check_writable()?;
        let mut tickets = self.tickets.write().await;
        if !tickets.contains_key(&ticket.id) {
            return Err(StorageError::not_found("ticket", ticket.id));
        }
        tickets.insert(ticket.id, ticket);
        Ok(())
    }

    async fn open_tickets(&self) -> StorageResult<Vec<Ticket>> {
        let mut open: Vec<_> = self
            .tickets
            .read()
            .await
            .values()
            .filter(|t| !t.status.is_terminal())
            .cloned()
            .collect();
        open.sort_by_key(|t| t.id);
        Ok(open)
    }

    async fn ticket_for_session(&self, session: &SessionId) -> StorageResult<Option<Ticket>> {
        Ok(self
            .tickets
            .read()
            .await
            .values()
            .filter(|t| t.session.as_ref() == Some(session) && !t.status.is_terminal())
            .min_by_key(|t| t.id)
            .cloned())
    }

    async fn add_comment(
        &self,
        ticket: TicketId,
        body: String,
        author: Option<PrincipalId>,
    ) -> StorageResult<TicketComment> {
        self.check_writable()?;
        if !self.tickets.read().await.contains_key(&ticket) {
            return Err(StorageError::not_found("ticket", ticket));
        }
        let comment = TicketComment {
            id: self.next_id(),
            ticket,
            body,
            author,
            created_at: Utc::now(),
        };
        self.comments.write().await.push(comment.clone());
        Ok(comment)
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn put_waiting(&self, record: WaitingRecord) -> StorageResult<()> {
        self.check_writable()?;
        let mut waiting = self.waiting.write().await;
        let history = waiting.entry(record.session.clone()).or_default();
        if history
            .iter()
            .any(|r| r.status == WaitingStatus::Waiting)
        {
            return Err(StorageError::Conflict(format!(
                "session already waiting: {}",
                record.session
            )));
        }
        history.push(record);
        Ok(())
    }

    async fn set_waiting_status(
        &self,
        session: &SessionId,
        status: WaitingStatus,
    ) -> StorageResult<()> {
        self.check_writable()?;
        let mut waiting = self.waiting.write().await;
        let live = waiting
            .get_mut(session)
            .and_then(|h| h.iter_mut().rfind(|r| r.status == WaitingStatus::Waiting))
            .ok_or_else(|| StorageError::not_found("waiting record", session))?;
        live.status = status;
        Ok(())
    }

    async fn waiting_for(&self, session: &SessionId) -> StorageResult<Option<WaitingRecord>> {
        Ok(self
            .waiting
            .read()
            .await
            .get(session)
            .and_then(|h| h.iter().rfind(|r| r.status == WaitingStatus::Waiting))
            .cloned())
    }

    async fn append_transfer(&self, record: TransferRecord) -> StorageResult<()> {
        self.check_writable()?;
        self.transfers
            .write()
            .await
            .entry(record.session.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn transfers_for(&self, session: &SessionId) -> StorageResult<Vec<TransferRecord>> {
        Ok(self
            .transfers
            .read()
            .await
            .get(session)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl SlaStore for MemoryStore {
    async fn active_configs(&self) -> StorageResult<Vec<SlaConfig>> {
        let mut configs: Vec<_> = self
            .sla_configs
            .read()
            .await
            .values()
            .filter(|c| c.active)
            .cloned()
            .collect();
        configs.sort_by_key(|c| c.id);
        Ok(configs)
    }

    async fn upsert_config(&self, mut config: SlaConfig) -> StorageResult<SlaConfig> {
        self.check_writable()?;
        let mut configs = self.sla_configs.write().await;
        if config.active {
            let clash = configs.values().any(|c| {
                c.active
                    && c.id != config.id
                    && c.priority == config.priority
                    && c.customer_tier == config.customer_tier
            });
            if clash {
                return Err(StorageError::Conflict(format!(
                    "active SLA config already covers ({}, {:?})",
                    config.priority, config.customer_tier
                )));
            }
        }
        if config.id == 0 {
            config.id = self.next_id();
        }
        configs.insert(config.id, config.clone());
        Ok(config)
    }

    async fn record_violation(&self, mut violation: SlaViolation) -> StorageResult<SlaViolation> {
        self.check_writable()?;
        violation.id = self.next_id();
        self.violations.write().await.push(violation.clone());
        Ok(violation)
    }

    async fn unresolved_violation(
        &self,
        ticket: TicketId,
        kind: SlaKind,
    ) -> StorageResult<Option<SlaViolation>> {
        Ok(self
            .violations
            .read()
            .await
            .iter()
            .find(|v| v.ticket == ticket && v.kind == kind && !v.resolved)
            .cloned())
    }

    async fn resolve_violation(&self, id: i64) -> StorageResult<()> {
        self.check_writable()?;
        let mut violations = self.violations.write().await;
        let violation = violations
            .iter_mut()
            .find(|v| v.id == id)
            .ok_or_else(|| StorageError::not_found("sla violation", id))?;
        violation.resolved = true;
        Ok(())
    }
}

#[async_trait]
impl AutomationStore for MemoryStore {
    async fn triggers_for(&self, event: EventTag) -> StorageResult<Vec<AutomationTrigger>> {
        // BTreeMap iteration gives the stable-by-id evaluation order.
        Ok(self
            .triggers
            .read()
            .await
            .values()
            .filter(|t| t.active && t.event == event)
            .cloned()
            .collect())
    }

    async fn trigger(&self, id: i64) -> StorageResult<AutomationTrigger> {
        self.triggers
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("trigger", id))
    }

    async fn upsert_trigger(
        &self,
        mut trigger: AutomationTrigger,
    ) -> StorageResult<AutomationTrigger> {
        self.check_writable()?;
        if trigger.id == 0 {
            trigger.id = self.next_id();
        }
        self.triggers
            .write()
            .await
            .insert(trigger.id, trigger.clone());
        Ok(trigger)
    }

    async fn record_run(&self, mut run: AutomationRun) -> StorageResult<AutomationRun> {
        self.check_writable()?;
        run.id = self.next_id();
        self.runs.write().await.push(run.clone());
        Ok(run)
    }

    async fn runs_for(&self, trigger_id: i64) -> StorageResult<Vec<AutomationRun>> {
        let mut runs: Vec<_> = self
            .runs
            .read()
            .await
            .iter()
            .filter(|r| r.trigger_id == trigger_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }
}

#[async_trait]
impl KnowledgeStore for MemoryStore {
    async fn all_docs(&self) -> StorageResult<Vec<KnowledgeDoc>> {
        let mut docs: Vec<_> = self.docs.read().await.values().cloned().collect();
        docs.sort_by_key(|d| d.id);
        Ok(docs)
    }

    async fn upsert_doc(&self, mut doc: KnowledgeDoc) -> StorageResult<KnowledgeDoc> {
        self.check_writable()?;
        if doc.id == 0 {
            doc.id = self.next_id();
        }
        self.docs.write().await.insert(doc.id, doc.clone());
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_for(customer: i64) -> Session {
        Session::start(PrincipalId(customer), Platform::Web)
    }

    #[tokio::test]
    async fn messages_are_ordered_and_windowed() {
        let store = MemoryStore::new();
        let session = session_for(1);
        store.create_session(session.clone()).await.unwrap();

        for i in 0..5 {
            store
                .append_message(
                    &session.id,
                    format!("m{i}"),
                    MessageKind::Text,
                    SenderRole::Customer,
                )
                .await
                .unwrap();
        }

        let recent = store.recent_messages(&session.id, 3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].content, "m2");
        assert_eq!(recent[2].content, "m4");
        assert!(recent.windows(2).all(|w| w[0].id < w[1].id));

        let page = store.messages(&session.id, 1, 2).await.unwrap();
        assert_eq!(page[0].content, "m1");
        assert_eq!(page[1].content, "m2");
    }

    #[tokio::test]
    async fn second_live_waiting_record_is_a_conflict() {
        let store = MemoryStore::new();
        let session = session_for(1);

        store
            .put_waiting(WaitingRecord::waiting(
                session.id.clone(),
                Priority::Normal,
                "no-operator",
            ))
            .await
            .unwrap();

        let err = store
            .put_waiting(WaitingRecord::waiting(
                session.id.clone(),
                Priority::High,
                "again",
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));

        // After the record leaves Waiting, a new one is allowed.
        store
            .set_waiting_status(&session.id, WaitingStatus::Assigned)
            .await
            .unwrap();
        store
            .put_waiting(WaitingRecord::waiting(
                session.id.clone(),
                Priority::Normal,
                "back again",
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn sla_config_uniqueness_among_active() {
        let store = MemoryStore::new();
        let config = SlaConfig {
            id: 0,
            name: "high default".into(),
            priority: Priority::High,
            customer_tier: None,
            first_response_mins: 15,
            resolution_mins: 240,
            escalation_mins: 60,
            business_hours_only: false,
            active: true,
        };
        let stored = store.upsert_config(config.clone()).await.unwrap();
        assert_ne!(stored.id, 0);

        let mut dup = config.clone();
        dup.name = "clash".into();
        assert!(matches!(
            store.upsert_config(dup).await,
            Err(StorageError::Conflict(_))
        ));

        // Same pair but inactive is fine.
        let mut inactive = config;
        inactive.name = "archived".into();
        inactive.active = false;
        store.upsert_config(inactive).await.unwrap();
    }

    #[tokio::test]
    async fn ticket_for_session_skips_terminal_tickets() {
        let store = MemoryStore::new();
        let session = session_for(9);
        let ticket = Ticket::open("t", "d", PrincipalId(9), Priority::Normal)
            .with_session(session.id.clone());
        let mut stored = store.create(ticket).await.unwrap();

        assert!(
            store
                .ticket_for_session(&session.id)
                .await
                .unwrap()
                .is_some()
        );

        stored.set_status(TicketStatus::Closed, Utc::now());
        store.update(stored).await.unwrap();
        assert!(
            store
                .ticket_for_session(&session.id)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn write_fault_injection_is_transient() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        let err = store
            .create_session(session_for(1))
            .await
            .unwrap_err();
        assert!(err.is_transient());

        store.set_fail_writes(false);
        store.create_session(session_for(1)).await.unwrap();
    }

    #[tokio::test]
    async fn triggers_come_back_in_id_order() {
        let store = MemoryStore::new();
        for name in ["b", "a", "c"] {
            store
                .upsert_trigger(AutomationTrigger {
                    id: 0,
                    name: name.into(),
                    event: EventTag::TicketCreated,
                    conditions: Vec::new(),
                    actions: Vec::new(),
                    active: true,
                })
                .await
                .unwrap();
        }
        let triggers = store.triggers_for(EventTag::TicketCreated).await.unwrap();
        let ids: Vec<_> = triggers.iter().map(|t| t.id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
        assert_eq!(triggers.len(), 3);
    }
}
