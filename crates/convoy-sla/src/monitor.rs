//! The periodic violation scan.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use convoy_config::SlaScanConfig;
use convoy_core::prelude::*;
use convoy_events::EventBus;
use convoy_hub::Hub;
use convoy_storage::{DirectoryStore, SlaStore, TicketStore};

/// Scans open tickets for missed SLA deadlines.
pub struct SlaMonitor {
    config: SlaScanConfig,
    sla: Arc<dyn SlaStore>,
    tickets: Arc<dyn TicketStore>,
    directory: Arc<dyn DirectoryStore>,
    hub: Hub,
    events: EventBus,
}

impl SlaMonitor {
    /// Build a monitor.
    #[must_use]
    pub fn new(
        config: SlaScanConfig,
        sla: Arc<dyn SlaStore>,
        tickets: Arc<dyn TicketStore>,
        directory: Arc<dyn DirectoryStore>,
        hub: Hub,
        events: EventBus,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            sla,
            tickets,
            directory,
            hub,
            events,
        })
    }

    /// One scan pass. Returns how many new violations were recorded.
    pub async fn scan_once(&self) -> usize {
        self.scan_at(Utc::now()).await
    }

    /// [`SlaMonitor::scan_once`] with an explicit clock, for tests.
    pub async fn scan_at(&self, now: DateTime<Utc>) -> usize {
        let configs = match self.sla.active_configs().await {
            Ok(configs) => configs,
            Err(err) => {
                warn!(error = %err, "SLA scan could not load configs");
                return 0;
            }
        };
        let tickets = match self.tickets.open_tickets().await {
            Ok(tickets) => tickets,
            Err(err) => {
                warn!(error = %err, "SLA scan could not load open tickets");
                return 0;
            }
        };

        let mut recorded = 0;
        for ticket in tickets {
            recorded += self.check_ticket(&ticket, &configs, now).await;
        }
        if recorded > 0 {
            info!(recorded, "SLA scan recorded violations");
        }
        recorded
    }

    async fn check_ticket(
        &self,
        ticket: &Ticket,
        configs: &[SlaConfig],
        now: DateTime<Utc>,
    ) -> usize {
        let tier = match self.directory.principal(ticket.customer).await {
            Ok(principal) => principal.tier,
            Err(_) => None,
        };
        let Some(config) = crate::deadline::match_config(configs, ticket.priority, tier.as_deref())
        else {
            return 0;
        };
        let hours = config
            .business_hours_only
            .then_some(&self.config.business_hours);

        let mut recorded = 0;

        // First response.
        let deadline =
            crate::deadline::deadline_for(ticket.created_at, config.first_response_mins, hours);
        let missed = ticket.first_response_at.is_none() && now > deadline;
        recorded += self
            .reconcile(ticket, config, SlaKind::FirstResponse, deadline, missed, now)
            .await;

        // Resolution.
        let deadline =
            crate::deadline::deadline_for(ticket.created_at, config.resolution_mins, hours);
        let missed = ticket.resolved_at.is_none() && now > deadline;
        recorded += self
            .reconcile(ticket, config, SlaKind::Resolution, deadline, missed, now)
            .await;

        recorded
    }

    /// Record a newly missed deadline, or resolve a violation whose
    /// condition has since been satisfied.
    async fn reconcile(
        &self,
        ticket: &Ticket,
        config: &SlaConfig,
        kind: SlaKind,
        deadline: DateTime<Utc>,
        missed: bool,
        now: DateTime<Utc>,
    ) -> usize {
        let existing = match self.sla.unresolved_violation(ticket.id, kind).await {
            Ok(existing) => existing,
            Err(err) => {
                warn!(ticket = %ticket.id, error = %err, "Violation lookup failed");
                return 0;
            }
        };

        match (missed, existing) {
            (true, None) => {
                let violation = SlaViolation {
                    id: 0,
                    ticket: ticket.id,
                    config_id: config.id,
                    kind,
                    deadline_at: deadline,
                    violated_at: now,
                    resolved: false,
                };
                match self.sla.record_violation(violation).await {
                    Ok(violation) => {
                        self.announce(ticket, &violation).await;
                        1
                    }
                    Err(err) => {
                        warn!(ticket = %ticket.id, error = %err, "Failed to record violation");
                        0
                    }
                }
            }
            (false, Some(existing)) => {
                // The deadline condition is satisfied now (response
                // arrived, ticket resolved); close the book.
                if let Err(err) = self.sla.resolve_violation(existing.id).await {
                    warn!(ticket = %ticket.id, error = %err, "Failed to resolve violation");
                }
                0
            }
            _ => {
                debug!(ticket = %ticket.id, kind = %kind, missed, "No violation change");
                0
            }
        }
    }

    /// Publish `sla-violated` and push escalation frames to the owning
    /// operator and their department channel.
    async fn announce(&self, ticket: &Ticket, violation: &SlaViolation) {
        let payload = json!({
            "ticket": ticket,
            "violation": {
                "kind": violation.kind,
                "deadline_at": violation.deadline_at,
                "config_id": violation.config_id,
            },
        });
        let mut event = PlatformEvent::new(EventTag::SlaViolated, ticket.id.0, payload);
        if let Some(session) = &ticket.session {
            event = event.with_session(session.clone());
        }
        self.events.publish(event);

        let notice = Frame::system(format!(
            "SLA {} deadline missed on ticket #{}",
            violation.kind, ticket.id
        ));
        if let Some(operator) = ticket.operator {
            self.hub.deliver_to_operator(operator, notice.clone()).await;
            if let Ok(profile) = self.directory.operator_profile(operator).await {
                let department = profile.department;
                self.hub
                    .broadcast(notice, move |meta| {
                        meta.department.as_deref() == Some(department.as_str())
                    })
                    .await;
            }
        }
    }
}

/// Background task: scan on a fixed interval until shutdown.
pub async fn run_sla_loop(monitor: Arc<SlaMonitor>, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
    let interval = Duration::from_secs(monitor.config.scan_interval_secs);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The immediate first tick is skipped; scanning at startup would
    // race index rebuilds.
    ticker.tick().await;
    info!(interval_secs = interval.as_secs(), "SLA scan loop started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => {
                info!("SLA loop received shutdown signal");
                break;
            }
            _ = ticker.tick() => {
                monitor.scan_once().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use convoy_config::HubConfig;
    use convoy_metrics::Metrics;
    use convoy_storage::MemoryStore;
    use tokio::sync::broadcast;

    struct Rig {
        monitor: Arc<SlaMonitor>,
        store: Arc<MemoryStore>,
        bus: EventBus,
        _shutdown: broadcast::Sender<()>,
    }

    async fn rig() -> Rig {
        let store = Arc::new(MemoryStore::new());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (hub, _inbound, _handle) = convoy_hub::Hub::start(
            &HubConfig::default(),
            Metrics::new().unwrap(),
            shutdown_rx,
        );
        let bus = EventBus::new();
        let monitor = SlaMonitor::new(
            SlaScanConfig::default(),
            Arc::clone(&store) as Arc<dyn SlaStore>,
            Arc::clone(&store) as Arc<dyn TicketStore>,
            Arc::clone(&store) as Arc<dyn DirectoryStore>,
            hub,
            bus.clone(),
        );
        Rig {
            monitor,
            store,
            bus,
            _shutdown: shutdown_tx,
        }
    }

    async fn seed_config(store: &MemoryStore, first_response_mins: u32) -> SlaConfig {
        store
            .upsert_config(SlaConfig {
                id: 0,
                name: "high default".into(),
                priority: Priority::High,
                customer_tier: None,
                first_response_mins,
                resolution_mins: 240,
                escalation_mins: 60,
                business_hours_only: false,
                active: true,
            })
            .await
            .unwrap()
    }

    async fn seed_ticket(store: &MemoryStore, age_minutes: i64) -> Ticket {
        let mut ticket = Ticket::open("t9", "d", PrincipalId(9), Priority::High);
        ticket.created_at = Utc::now() - ChronoDuration::minutes(age_minutes);
        store.create(ticket).await.unwrap()
    }

    #[tokio::test]
    async fn missed_first_response_records_one_violation_and_fires_event() {
        let r = rig().await;
        seed_config(&r.store, 15).await;
        let ticket = seed_ticket(&r.store, 16).await;
        let mut events = r.bus.subscribe();

        assert_eq!(r.monitor.scan_once().await, 1);

        let violation = r
            .store
            .unresolved_violation(ticket.id, SlaKind::FirstResponse)
            .await
            .unwrap()
            .expect("violation recorded");
        assert_eq!(violation.kind, SlaKind::FirstResponse);

        let event = events.recv().await.unwrap();
        assert_eq!(event.tag, EventTag::SlaViolated);
        assert_eq!(event.payload["violation"]["kind"], "first-response");

        // A second scan must not duplicate the violation.
        assert_eq!(r.monitor.scan_once().await, 0);
    }

    #[tokio::test]
    async fn fresh_tickets_do_not_violate() {
        let r = rig().await;
        seed_config(&r.store, 15).await;
        seed_ticket(&r.store, 5).await;

        assert_eq!(r.monitor.scan_once().await, 0);
    }

    #[tokio::test]
    async fn first_response_clears_future_violations_and_resolves_existing() {
        let r = rig().await;
        seed_config(&r.store, 15).await;
        let mut ticket = seed_ticket(&r.store, 20).await;

        assert_eq!(r.monitor.scan_once().await, 1);
        let violation = r
            .store
            .unresolved_violation(ticket.id, SlaKind::FirstResponse)
            .await
            .unwrap()
            .unwrap();

        // An operator replied (late); the violation resolves on the
        // next pass instead of repeating.
        ticket.first_response_at = Some(Utc::now());
        r.store.update(ticket.clone()).await.unwrap();
        assert_eq!(r.monitor.scan_once().await, 0);
        assert!(
            r.store
                .unresolved_violation(ticket.id, SlaKind::FirstResponse)
                .await
                .unwrap()
                .is_none()
        );
        // The old record still exists, marked resolved.
        let _ = violation;
    }

    #[tokio::test]
    async fn tickets_without_matching_config_are_skipped() {
        let r = rig().await;
        // Config covers high; ticket is low priority.
        seed_config(&r.store, 15).await;
        let mut ticket = Ticket::open("t", "d", PrincipalId(9), Priority::Low);
        ticket.created_at = Utc::now() - ChronoDuration::minutes(600);
        r.store.create(ticket).await.unwrap();

        assert_eq!(r.monitor.scan_once().await, 0);
    }

    #[tokio::test]
    async fn old_unresolved_ticket_violates_resolution_too() {
        let r = rig().await;
        seed_config(&r.store, 15).await;
        let ticket = seed_ticket(&r.store, 300).await;

        // Both first-response (15m) and resolution (240m) are missed.
        assert_eq!(r.monitor.scan_once().await, 2);
        assert!(
            r.store
                .unresolved_violation(ticket.id, SlaKind::Resolution)
                .await
                .unwrap()
                .is_some()
        );
    }
}
