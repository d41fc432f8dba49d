//! Action execution.
//!
//! Actions mutate tickets through the storage traits, notify through
//! the hub, and fire webhooks through a shared HTTP client. Each
//! executed action yields a JSON description that lands in the run's
//! `executed_actions` audit list.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, warn};

use convoy_config::AutomationConfig;
use convoy_core::{Frame, PrincipalId, TicketId, TriggerAction};
use convoy_hub::Hub;
use convoy_storage::{DirectoryStore, TicketStore};

/// Executes trigger actions against the runtime.
pub struct ActionExecutor {
    tickets: Arc<dyn TicketStore>,
    directory: Arc<dyn DirectoryStore>,
    hub: Hub,
    http: reqwest::Client,
    webhook_retries: u32,
    webhook_backoff: Duration,
}

impl ActionExecutor {
    /// Build an executor.
    #[must_use]
    pub fn new(
        config: &AutomationConfig,
        tickets: Arc<dyn TicketStore>,
        directory: Arc<dyn DirectoryStore>,
        hub: Hub,
    ) -> Self {
        Self {
            tickets,
            directory,
            hub,
            http: reqwest::Client::new(),
            webhook_retries: config.webhook_retries.max(1),
            webhook_backoff: Duration::from_millis(config.webhook_backoff_ms),
        }
    }

    /// Execute one action against the target ticket. In dry-run mode
    /// nothing mutates; the returned description is what *would* run.
    ///
    /// # Errors
    ///
    /// Returns a human-readable error string; the engine records it and
    /// stops the current trigger's run.
    pub async fn execute(
        &self,
        action: &TriggerAction,
        ticket_id: Option<TicketId>,
        payload: &Value,
        dry_run: bool,
    ) -> Result<Value, String> {
        let description = describe(action, ticket_id);
        if dry_run {
            return Ok(description);
        }

        match action {
            TriggerAction::SetPriority { priority } => {
                let mut ticket = self.load_ticket(ticket_id).await?;
                ticket.priority = *priority;
                ticket.updated_at = Utc::now();
                self.tickets
                    .update(ticket)
                    .await
                    .map_err(|e| e.to_string())?;
            }
            TriggerAction::SetStatus { status } => {
                let mut ticket = self.load_ticket(ticket_id).await?;
                ticket.set_status(*status, Utc::now());
                self.tickets
                    .update(ticket)
                    .await
                    .map_err(|e| e.to_string())?;
            }
            TriggerAction::Assign { operator_id, role } => {
                let operator = self.resolve_assignee(*operator_id, role.as_deref()).await?;
                let mut ticket = self.load_ticket(ticket_id).await?;
                ticket.operator = Some(operator);
                ticket.updated_at = Utc::now();
                self.tickets
                    .update(ticket)
                    .await
                    .map_err(|e| e.to_string())?;
            }
            TriggerAction::AddTag { tag } => {
                let mut ticket = self.load_ticket(ticket_id).await?;
                ticket.tags.insert(tag.clone());
                ticket.updated_at = Utc::now();
                self.tickets
                    .update(ticket)
                    .await
                    .map_err(|e| e.to_string())?;
            }
            TriggerAction::RemoveTag { tag } => {
                let mut ticket = self.load_ticket(ticket_id).await?;
                ticket.tags.remove(tag);
                ticket.updated_at = Utc::now();
                self.tickets
                    .update(ticket)
                    .await
                    .map_err(|e| e.to_string())?;
            }
            TriggerAction::Notify { channel, message } => {
                let channel = channel.clone();
                self.hub
                    .broadcast(Frame::system(message.clone()), move |meta| {
                        meta.department.as_deref() == Some(channel.as_str())
                    })
                    .await;
            }
            TriggerAction::CreateComment { body } => {
                let id = ticket_id.ok_or("no ticket in event payload")?;
                self.tickets
                    .add_comment(id, body.clone(), None)
                    .await
                    .map_err(|e| e.to_string())?;
            }
            TriggerAction::FireWebhook { url } => {
                self.fire_webhook(url, payload)?;
            }
        }

        Ok(description)
    }

    async fn load_ticket(&self, id: Option<TicketId>) -> Result<convoy_core::Ticket, String> {
        let id = id.ok_or("no ticket in event payload")?;
        self.tickets.get(id).await.map_err(|e| e.to_string())
    }

    async fn resolve_assignee(
        &self,
        operator_id: Option<PrincipalId>,
        role: Option<&str>,
    ) -> Result<PrincipalId, String> {
        if let Some(id) = operator_id {
            return Ok(id);
        }
        let role = role.ok_or("assign needs operator_id or role")?;
        let operators = self
            .directory
            .operators_in_department(role)
            .await
            .map_err(|e| e.to_string())?;
        operators
            .iter()
            .min_by(|a, b| {
                a.load_ratio()
                    .partial_cmp(&b.load_ratio())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|o| o.id)
            .ok_or_else(|| format!("no operator in department {role}"))
    }

    /// Fire-and-forget with a retry budget; failures never fail the
    /// run, only the spawned delivery task logs them.
    fn fire_webhook(&self, url: &str, payload: &Value) -> Result<(), String> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(format!("webhook scheme not allowed: {url}"));
        }

        let client = self.http.clone();
        let url = url.to_string();
        let body = payload.clone();
        let retries = self.webhook_retries;
        let backoff = self.webhook_backoff;

        tokio::spawn(async move {
            for attempt in 0..retries {
                if attempt > 0 {
                    let delay = backoff.saturating_mul(2u32.saturating_pow(attempt - 1));
                    tokio::time::sleep(delay).await;
                }
                match client.post(&url).json(&body).send().await {
                    Ok(response) if response.status().is_success() => {
                        debug!(%url, attempt, "Webhook delivered");
                        return;
                    }
                    Ok(response) => {
                        warn!(%url, attempt, status = %response.status(), "Webhook rejected");
                    }
                    Err(err) => {
                        warn!(%url, attempt, error = %err, "Webhook send failed");
                    }
                }
            }
            warn!(%url, retries, "Webhook delivery gave up");
        });
        Ok(())
    }
}

/// JSON description of an action, for the run audit list.
fn describe(action: &TriggerAction, ticket: Option<TicketId>) -> Value {
    let mut description = serde_json::to_value(action).unwrap_or(Value::Null);
    if let (Some(obj), Some(ticket)) = (description.as_object_mut(), ticket) {
        obj.insert("ticket_id".to_string(), json!(ticket.0));
    }
    description
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_config::HubConfig;
    use convoy_core::{Priority, Ticket, TicketStatus};
    use convoy_metrics::Metrics;
    use convoy_storage::MemoryStore;
    use tokio::sync::broadcast;

    async fn executor_with_store() -> (ActionExecutor, Arc<MemoryStore>, broadcast::Sender<()>) {
        let store = Arc::new(MemoryStore::new());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (hub, _inbound, _handle) = convoy_hub::Hub::start(
            &HubConfig::default(),
            Metrics::new().unwrap(),
            shutdown_rx,
        );
        let executor = ActionExecutor::new(
            &AutomationConfig::default(),
            Arc::clone(&store) as Arc<dyn TicketStore>,
            Arc::clone(&store) as Arc<dyn DirectoryStore>,
            hub,
        );
        (executor, store, shutdown_tx)
    }

    async fn seed_ticket(store: &MemoryStore) -> TicketId {
        let ticket = Ticket::open("t", "d", PrincipalId(1), Priority::Normal);
        store.create(ticket).await.unwrap().id
    }

    #[tokio::test]
    async fn set_priority_mutates_the_ticket() {
        let (executor, store, _shutdown) = executor_with_store().await;
        let id = seed_ticket(&store).await;

        executor
            .execute(
                &TriggerAction::SetPriority {
                    priority: Priority::Urgent,
                },
                Some(id),
                &json!({}),
                false,
            )
            .await
            .unwrap();

        assert_eq!(store.get(id).await.unwrap().priority, Priority::Urgent);
    }

    #[tokio::test]
    async fn dry_run_mutates_nothing() {
        let (executor, store, _shutdown) = executor_with_store().await;
        let id = seed_ticket(&store).await;

        let description = executor
            .execute(
                &TriggerAction::SetStatus {
                    status: TicketStatus::Closed,
                },
                Some(id),
                &json!({}),
                true,
            )
            .await
            .unwrap();

        assert_eq!(description["type"], "set_status");
        assert_eq!(store.get(id).await.unwrap().status, TicketStatus::Open);
    }

    #[tokio::test]
    async fn tag_actions_round_trip() {
        let (executor, store, _shutdown) = executor_with_store().await;
        let id = seed_ticket(&store).await;

        executor
            .execute(
                &TriggerAction::AddTag { tag: "vip".into() },
                Some(id),
                &json!({}),
                false,
            )
            .await
            .unwrap();
        assert!(store.get(id).await.unwrap().tags.contains("vip"));

        executor
            .execute(
                &TriggerAction::RemoveTag { tag: "vip".into() },
                Some(id),
                &json!({}),
                false,
            )
            .await
            .unwrap();
        assert!(!store.get(id).await.unwrap().tags.contains("vip"));
    }

    #[tokio::test]
    async fn webhook_rejects_non_http_schemes() {
        let (executor, _store, _shutdown) = executor_with_store().await;
        let err = executor
            .execute(
                &TriggerAction::FireWebhook {
                    url: "file:///etc/passwd".into(),
                },
                None,
                &json!({}),
                false,
            )
            .await
            .unwrap_err();
        assert!(err.contains("scheme"));
    }

    #[tokio::test]
    async fn missing_ticket_is_a_run_error() {
        let (executor, _store, _shutdown) = executor_with_store().await;
        let err = executor
            .execute(
                &TriggerAction::AddTag { tag: "x".into() },
                None,
                &json!({}),
                false,
            )
            .await
            .unwrap_err();
        assert!(err.contains("no ticket"));
    }
}
