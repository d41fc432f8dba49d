//! The automation engine: trigger matching, run recording, dry runs,
//! and batch application.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use convoy_core::{AutomationRun, AutomationTrigger, EventTag, PlatformEvent, TicketId};
use convoy_events::EventReceiver;
use convoy_storage::{AutomationStore, StorageResult, TicketStore};

use crate::action::ActionExecutor;
use crate::condition::evaluate_conditions;

/// Evaluates triggers against events and records runs.
pub struct AutomationEngine {
    store: Arc<dyn AutomationStore>,
    tickets: Arc<dyn TicketStore>,
    executor: ActionExecutor,
}

impl AutomationEngine {
    /// Build the engine.
    #[must_use]
    pub fn new(
        store: Arc<dyn AutomationStore>,
        tickets: Arc<dyn TicketStore>,
        executor: ActionExecutor,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            tickets,
            executor,
        })
    }

    /// Evaluate every active trigger for the event, in stable id order.
    /// Trigger failures are isolated: one failing run never aborts its
    /// siblings.
    pub async fn handle_event(&self, event: &PlatformEvent) {
        let triggers = match self.store.triggers_for(event.tag).await {
            Ok(triggers) => triggers,
            Err(err) => {
                warn!(tag = %event.tag, error = %err, "Failed to load triggers");
                return;
            }
        };

        for trigger in triggers {
            if let Err(err) = self.run_trigger(&trigger, event, false).await {
                warn!(trigger = trigger.id, error = %err, "Failed to record automation run");
            }
        }
    }

    /// Evaluate one trigger against an event without mutating anything.
    /// Records a dry run and returns it.
    ///
    /// # Errors
    ///
    /// Propagates storage failures (unknown trigger, run log write).
    pub async fn dry_run(
        &self,
        trigger_id: i64,
        event: &PlatformEvent,
    ) -> StorageResult<Option<AutomationRun>> {
        let trigger = self.store.trigger(trigger_id).await?;
        self.run_trigger(&trigger, event, true).await
    }

    /// Apply one trigger to an explicit set of tickets. Returns the
    /// recorded runs (one per matching ticket).
    ///
    /// # Errors
    ///
    /// Propagates storage failures on trigger/ticket lookup; per-ticket
    /// action failures are recorded in each run instead.
    pub async fn batch_run(
        &self,
        trigger_id: i64,
        tickets: &[TicketId],
        dry_run: bool,
    ) -> StorageResult<Vec<AutomationRun>> {
        let trigger = self.store.trigger(trigger_id).await?;
        let mut runs = Vec::new();
        for id in tickets {
            let ticket = self.tickets.get(*id).await?;
            let event = PlatformEvent::new(
                trigger.event,
                ticket.id.0,
                json!({"ticket": ticket}),
            );
            if let Some(run) = self.run_trigger(&trigger, &event, dry_run).await? {
                runs.push(run);
            }
        }
        info!(trigger = trigger_id, targets = tickets.len(), matched = runs.len(), "Batch run finished");
        Ok(runs)
    }

    /// Evaluate and, on a match, execute. Returns the recorded run, or
    /// `None` when conditions did not match.
    async fn run_trigger(
        &self,
        trigger: &AutomationTrigger,
        event: &PlatformEvent,
        dry_run: bool,
    ) -> StorageResult<Option<AutomationRun>> {
        if !evaluate_conditions(&trigger.conditions, &event.payload) {
            debug!(trigger = trigger.id, tag = %event.tag, "Trigger did not match");
            return Ok(None);
        }
        self.execute_and_record(trigger, event, dry_run).await.map(Some)
    }

    async fn execute_and_record(
        &self,
        trigger: &AutomationTrigger,
        event: &PlatformEvent,
        dry_run: bool,
    ) -> StorageResult<AutomationRun> {
        let started_at = Utc::now();
        let ticket_id = target_ticket(event);

        let mut executed: Vec<Value> = Vec::new();
        let mut error: Option<String> = None;

        for action in &trigger.actions {
            match self
                .executor
                .execute(action, ticket_id, &event.payload, dry_run)
                .await
            {
                Ok(description) => executed.push(description),
                Err(message) => {
                    // One failure stops this run; siblings are isolated
                    // at the caller.
                    error = Some(message);
                    break;
                }
            }
        }

        let matches = u32::try_from(trigger.conditions.len().max(1)).unwrap_or(u32::MAX);
        let run = AutomationRun {
            id: 0,
            trigger_id: trigger.id,
            target: event.target,
            event: event.tag,
            dry_run,
            matches,
            executed_actions: executed,
            started_at,
            finished_at: Some(Utc::now()),
            error,
        };

        debug!(trigger = trigger.id, target = event.target, dry_run, "Trigger ran");
        self.store.record_run(run).await
    }
}

/// The ticket a trigger run operates on: the event target for ticket
/// events, otherwise the `ticket.id` carried in the payload.
fn target_ticket(event: &PlatformEvent) -> Option<TicketId> {
    match event.tag {
        EventTag::TicketCreated | EventTag::TicketUpdated => Some(TicketId(event.target)),
        EventTag::MessageReceived | EventTag::SlaViolated => {
            convoy_core::automation::payload_ticket_id(&event.payload)
        }
    }
}

/// Background task: apply automation to every event on the bus until
/// shutdown.
pub async fn run_automation_loop(
    engine: Arc<AutomationEngine>,
    mut events: EventReceiver,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    info!("Automation loop started");
    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => {
                info!("Automation loop received shutdown signal");
                break;
            }
            event = events.recv() => {
                match event {
                    Some(event) => engine.handle_event(&event).await,
                    None => {
                        info!("Event bus closed, automation loop exiting");
                        break;
                    }
                }
            }
        }
    }
}
