//! Daemon state: wiring every engine together and supervising the
//! background loops.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use convoy_assign::{AssignmentEngine, run_drain_loop};
use convoy_auth::Verifier;
use convoy_automation::{ActionExecutor, AutomationEngine, run_automation_loop};
use convoy_config::ConvoyConfig;
use convoy_core::Frame;
use convoy_events::EventBus;
use convoy_hub::{ClientTag, Hub};
use convoy_limit::RateLimiter;
use convoy_metrics::{Ingestor, Metrics};
use convoy_resolver::{HttpBackend, KeywordKb, Resolver};
use convoy_router::{AdapterRegistry, EscalationPolicy, Router, RouterDeps, run_router_loop};
use convoy_sla::{SlaMonitor, run_sla_loop};
use convoy_storage::MemoryStore;

/// Interval of the dashboard `metrics-tick` broadcast.
const METRICS_TICK_SECS: u64 = 30;

/// Shared daemon state.
pub struct AppState {
    /// Loaded configuration.
    pub config: ConvoyConfig,
    /// Metrics registry handle.
    pub metrics: Metrics,
    /// Connection hub.
    pub hub: Hub,
    /// Message router.
    pub router: Arc<Router>,
    /// Assignment engine.
    pub assign: Arc<AssignmentEngine>,
    /// AI resolver.
    pub resolver: Arc<Resolver>,
    /// Automation engine.
    pub automation: Arc<AutomationEngine>,
    /// SLA monitor.
    pub sla: Arc<SlaMonitor>,
    /// Credential verifier.
    pub verifier: Arc<Verifier>,
    /// Rate limiter.
    pub limiter: Arc<RateLimiter>,
    /// Client-metrics ingestor.
    pub ingestor: Arc<Ingestor>,
    /// The storage backend (every repository trait).
    pub store: Arc<MemoryStore>,
    /// Platform event bus.
    pub events: EventBus,
    /// Shutdown broadcast to every background loop.
    pub shutdown: broadcast::Sender<()>,
    /// Process start, for uptime.
    pub started_at: Instant,
}

impl AppState {
    /// Wire the runtime and spawn its background loops.
    ///
    /// # Errors
    ///
    /// Fails when metric registration or the initial index rebuild
    /// fails.
    pub async fn build(
        config: ConvoyConfig,
        adapters: AdapterRegistry,
    ) -> anyhow::Result<(Arc<Self>, Vec<JoinHandle<()>>)> {
        let metrics = Metrics::new()?;
        let (shutdown, _) = broadcast::channel(8);
        let store = Arc::new(MemoryStore::new());
        let events = EventBus::new();

        let (hub, inbound_rx, hub_handle) =
            Hub::start(&config.hub, metrics.clone(), shutdown.subscribe());

        let assign = AssignmentEngine::new(
            config.assignment.clone(),
            Arc::clone(&store) as Arc<dyn convoy_storage::DirectoryStore>,
            Arc::clone(&store) as Arc<dyn convoy_storage::ConversationStore>,
            Arc::clone(&store) as Arc<dyn convoy_storage::TicketStore>,
            Arc::clone(&store) as Arc<dyn convoy_storage::QueueStore>,
            hub.clone(),
            events.clone(),
        );
        assign.rebuild_index().await?;

        let primary = if config.ai.base_url.is_empty() {
            info!("No AI base URL configured, fallback KB only");
            None
        } else {
            let key = (!config.ai.api_key.is_empty()).then(|| config.ai.api_key.clone());
            Some(Arc::new(HttpBackend::new(
                config.ai.base_url.clone(),
                key,
                config.ai.model.clone(),
            )) as Arc<dyn convoy_resolver::AiBackend>)
        };
        let resolver = Arc::new(Resolver::new(
            primary,
            KeywordKb::new(
                Arc::clone(&store) as Arc<dyn convoy_storage::KnowledgeStore>,
                config.ai.fallback_top_k,
            ),
            &config.ai,
            metrics.clone(),
        ));

        let executor = ActionExecutor::new(
            &config.automation,
            Arc::clone(&store) as Arc<dyn convoy_storage::TicketStore>,
            Arc::clone(&store) as Arc<dyn convoy_storage::DirectoryStore>,
            hub.clone(),
        );
        let automation = AutomationEngine::new(
            Arc::clone(&store) as Arc<dyn convoy_storage::AutomationStore>,
            Arc::clone(&store) as Arc<dyn convoy_storage::TicketStore>,
            executor,
        );

        let sla = SlaMonitor::new(
            config.sla.clone(),
            Arc::clone(&store) as Arc<dyn convoy_storage::SlaStore>,
            Arc::clone(&store) as Arc<dyn convoy_storage::TicketStore>,
            Arc::clone(&store) as Arc<dyn convoy_storage::DirectoryStore>,
            hub.clone(),
            events.clone(),
        );

        let router = Router::new(
            EscalationPolicy::new(config.escalation.clone(), config.ai.confidence_threshold),
            adapters,
            RouterDeps {
                resolver: Arc::clone(&resolver),
                assign: Arc::clone(&assign),
                conversations: Arc::clone(&store) as Arc<dyn convoy_storage::ConversationStore>,
                tickets: Arc::clone(&store) as Arc<dyn convoy_storage::TicketStore>,
                hub: hub.clone(),
                events: events.clone(),
                metrics: metrics.clone(),
            },
        );

        let verifier = Arc::new(Verifier::new(
            &config.auth.secret,
            config.auth.role_permissions.clone(),
            config.auth.leeway_secs,
        ));
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit, metrics.registry())?);
        let ingestor = Arc::new(Ingestor::new(
            &config.metrics.ingest_whitelist,
            metrics.registry(),
        )?);

        // Background loops.
        let mut handles = vec![hub_handle];
        handles.push(tokio::spawn(run_router_loop(
            Arc::clone(&router),
            inbound_rx,
            shutdown.subscribe(),
        )));
        handles.push(tokio::spawn(run_drain_loop(
            Arc::clone(&assign),
            Duration::from_secs(config.assignment.drain_tick_secs),
            shutdown.subscribe(),
        )));
        handles.push(tokio::spawn(run_sla_loop(
            Arc::clone(&sla),
            shutdown.subscribe(),
        )));
        handles.push(tokio::spawn(run_automation_loop(
            Arc::clone(&automation),
            events.subscribe(),
            shutdown.subscribe(),
        )));

        // Subscribe before spawning so a shutdown fired immediately
        // after build is never missed.
        let tick_shutdown = shutdown.subscribe();

        let state = Arc::new(Self {
            config,
            metrics,
            hub,
            router,
            assign,
            resolver,
            automation,
            sla,
            verifier,
            limiter,
            ingestor,
            store,
            events,
            shutdown,
            started_at: Instant::now(),
        });

        handles.push(tokio::spawn(run_metrics_tick(
            Arc::clone(&state),
            tick_shutdown,
        )));

        Ok((state, handles))
    }

    /// Daemon uptime.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Begin the shutdown drain: stop attaches, flush queues up to the
    /// deadline, then cancel every background loop.
    pub async fn drain_and_shutdown(&self) {
        info!("Shutdown requested, draining");
        self.hub.begin_drain().await;

        let deadline = Duration::from_secs(self.config.server.drain_deadline_secs);
        let drain_started = Instant::now();
        while drain_started.elapsed() < deadline {
            match self.hub.snapshot().await {
                Ok(snapshot) if snapshot.clients.is_empty() => break,
                Ok(_) => tokio::time::sleep(Duration::from_millis(250)).await,
                Err(_) => break,
            }
        }

        if self.shutdown.send(()).is_err() {
            warn!("No background loops were listening for shutdown");
        }
        let drained_in_ms = u64::try_from(drain_started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(drained_in_ms, "Drain finished, background loops stopped");
    }
}

/// Periodic `metrics-tick` broadcast to operator dashboards.
async fn run_metrics_tick(state: Arc<AppState>, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(METRICS_TICK_SECS));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                state.metrics.tick_uptime();
                let stats = state.resolver.stats();
                let tick = serde_json::json!({
                    "active_sockets": state.metrics.active_sockets.get(),
                    "queue_depth": state.assign.queue_depth(),
                    "ai_primary_success": stats.primary_success,
                    "ai_fallback_used": stats.fallback_used,
                    "ai_latency_ema": state.resolver.latency_ema(),
                });
                state
                    .hub
                    .broadcast(Frame::MetricsTick(tick), |meta| {
                        matches!(meta.tag, ClientTag::Operator(_))
                    })
                    .await;
            }
        }
    }
}
