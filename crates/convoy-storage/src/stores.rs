//! Repository traits, one per entity family.
//!
//! Engines depend on these traits only; backends implement them. All
//! methods take `&self` and are object-safe so stores can be shared as
//! `Arc<dyn Trait>`.

use async_trait::async_trait;

use convoy_core::prelude::*;

use crate::error::StorageResult;

/// Principals and operator profiles.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    /// Fetch a principal.
    async fn principal(&self, id: PrincipalId) -> StorageResult<Principal>;

    /// Insert or replace a principal.
    async fn upsert_principal(&self, principal: Principal) -> StorageResult<()>;

    /// Fetch an operator profile.
    async fn operator_profile(&self, id: PrincipalId) -> StorageResult<OperatorProfile>;

    /// Insert or replace an operator profile.
    async fn upsert_operator(&self, profile: OperatorProfile) -> StorageResult<()>;

    /// All operator profiles.
    async fn operators(&self) -> StorageResult<Vec<OperatorProfile>>;

    /// Operators in a department, for role-based automation assignment
    /// and dashboard broadcasts.
    async fn operators_in_department(&self, department: &str)
    -> StorageResult<Vec<OperatorProfile>>;
}

/// Sessions and their append-only message logs.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Persist a new session.
    async fn create_session(&self, session: Session) -> StorageResult<()>;

    /// Fetch a session.
    async fn session(&self, id: &SessionId) -> StorageResult<Session>;

    /// Replace a session (status/activity updates).
    async fn update_session(&self, session: Session) -> StorageResult<()>;

    /// Append a message; storage assigns the id and timestamp. Returns
    /// the stored message.
    async fn append_message(
        &self,
        session: &SessionId,
        content: String,
        kind: MessageKind,
        sender: SenderRole,
    ) -> StorageResult<Message>;

    /// The most recent `limit` messages of a session, in session order
    /// (oldest first).
    async fn recent_messages(&self, session: &SessionId, limit: usize)
    -> StorageResult<Vec<Message>>;

    /// A page of a session's history in session order.
    async fn messages(
        &self,
        session: &SessionId,
        offset: usize,
        limit: usize,
    ) -> StorageResult<Vec<Message>>;
}

/// Tickets and their comments.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Persist a new ticket; storage assigns the id. Returns the stored
    /// ticket.
    async fn create(&self, ticket: Ticket) -> StorageResult<Ticket>;

    /// Fetch a ticket.
    async fn get(&self, id: TicketId) -> StorageResult<Ticket>;

    /// Replace a ticket.
    async fn update(&self, ticket: Ticket) -> StorageResult<()>;

    /// All tickets not yet resolved or closed, for the SLA scan.
    async fn open_tickets(&self) -> StorageResult<Vec<Ticket>>;

    /// The non-terminal ticket linked to a session, if any.
    async fn ticket_for_session(&self, session: &SessionId) -> StorageResult<Option<Ticket>>;

    /// Append a comment.
    async fn add_comment(
        &self,
        ticket: TicketId,
        body: String,
        author: Option<PrincipalId>,
    ) -> StorageResult<TicketComment>;
}

/// Waiting-queue records and the transfer audit log.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Persist a waiting record.
    ///
    /// # Errors
    ///
    /// `Conflict` when the session already has a record with status
    /// `Waiting` — the at-most-one-live-record invariant.
    async fn put_waiting(&self, record: WaitingRecord) -> StorageResult<()>;

    /// Update the status of a session's live waiting record.
    async fn set_waiting_status(
        &self,
        session: &SessionId,
        status: WaitingStatus,
    ) -> StorageResult<()>;

    /// The live waiting record for a session, if any.
    async fn waiting_for(&self, session: &SessionId) -> StorageResult<Option<WaitingRecord>>;

    /// Append a transfer record.
    async fn append_transfer(&self, record: TransferRecord) -> StorageResult<()>;

    /// All transfer records of a session, oldest first.
    async fn transfers_for(&self, session: &SessionId) -> StorageResult<Vec<TransferRecord>>;
}

/// SLA configs and violations.
#[async_trait]
pub trait SlaStore: Send + Sync {
    /// All active configs.
    async fn active_configs(&self) -> StorageResult<Vec<SlaConfig>>;

    /// Insert or replace a config; storage assigns ids to new configs.
    ///
    /// # Errors
    ///
    /// `Conflict` when another active config already claims the same
    /// `(priority, customer_tier)` pair.
    async fn upsert_config(&self, config: SlaConfig) -> StorageResult<SlaConfig>;

    /// Record a violation; storage assigns the id.
    async fn record_violation(&self, violation: SlaViolation) -> StorageResult<SlaViolation>;

    /// The unresolved violation of `kind` for a ticket, if one exists.
    async fn unresolved_violation(
        &self,
        ticket: TicketId,
        kind: SlaKind,
    ) -> StorageResult<Option<SlaViolation>>;

    /// Mark a violation resolved.
    async fn resolve_violation(&self, id: i64) -> StorageResult<()>;
}

/// Automation triggers and their run log.
#[async_trait]
pub trait AutomationStore: Send + Sync {
    /// Active triggers for an event, in stable id order.
    async fn triggers_for(&self, event: EventTag) -> StorageResult<Vec<AutomationTrigger>>;

    /// Fetch one trigger by id (active or not).
    async fn trigger(&self, id: i64) -> StorageResult<AutomationTrigger>;

    /// Insert or replace a trigger; storage assigns ids to new triggers.
    async fn upsert_trigger(&self, trigger: AutomationTrigger) -> StorageResult<AutomationTrigger>;

    /// Record a run; storage assigns the id.
    async fn record_run(&self, run: AutomationRun) -> StorageResult<AutomationRun>;

    /// Runs of one trigger, newest first.
    async fn runs_for(&self, trigger_id: i64) -> StorageResult<Vec<AutomationRun>>;
}

/// Knowledge documents for the fallback KB.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Every document.
    async fn all_docs(&self) -> StorageResult<Vec<KnowledgeDoc>>;

    /// Insert or replace a document; storage assigns ids to new docs.
    async fn upsert_doc(&self, doc: KnowledgeDoc) -> StorageResult<KnowledgeDoc>;
}
