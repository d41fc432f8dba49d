//! The hub run-loop and its public handle.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use convoy_config::HubConfig;
use convoy_core::{ClientId, Frame, PrincipalId, RawFrame, SessionId};
use convoy_metrics::Metrics;

use crate::client::{ClientQueue, ClientTag, Outbound, QueuePush};

/// Capacity of the command and inbound channels. Bounded so a stalled
/// run-loop back-pressures producers instead of growing without limit.
const COMMAND_CHANNEL_CAPACITY: usize = 1024;
const INBOUND_CHANNEL_CAPACITY: usize = 1024;

/// Hub errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    /// The hub is draining; no new clients.
    #[error("hub is draining")]
    Draining,
    /// The run-loop has exited.
    #[error("hub is closed")]
    Closed,
}

/// An inbound frame as handed to the router.
#[derive(Debug, Clone)]
pub struct Inbound {
    /// The client that sent it.
    pub client: ClientId,
    /// How that client is attached.
    pub tag: ClientTag,
    /// The frame, still raw so unknown types can reach channel
    /// adapters.
    pub raw: RawFrame,
    /// Arrival time.
    pub received_at: DateTime<Utc>,
}

/// Addressing metadata the broadcast predicate sees.
#[derive(Debug, Clone)]
pub struct ClientMeta {
    /// Client id.
    pub id: ClientId,
    /// Attachment tag.
    pub tag: ClientTag,
    /// Operator department, for dashboard broadcasts.
    pub department: Option<String>,
}

/// Everything the transport needs to serve one attached client.
#[derive(Debug)]
pub struct AttachedClient {
    /// Assigned client id.
    pub id: ClientId,
    /// Outbound queue the transport's writer drains.
    pub queue: Arc<ClientQueue>,
    last_activity: Arc<Mutex<Instant>>,
}

impl AttachedClient {
    /// Record read or write activity, deferring heartbeat death.
    pub fn touch(&self) {
        let mut last = self
            .last_activity
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *last = Instant::now();
    }
}

/// Broadcast predicate over client metadata.
type BroadcastFilter = Box<dyn Fn(&ClientMeta) -> bool + Send>;

/// Registry snapshot for health and admin surfaces.
#[derive(Debug, Clone)]
pub struct HubSnapshot {
    /// Metadata of every attached client.
    pub clients: Vec<ClientMeta>,
    /// Whether the hub is refusing new attaches.
    pub draining: bool,
}

enum Command {
    Attach {
        tag: ClientTag,
        department: Option<String>,
        reply: oneshot::Sender<Result<AttachedClient, HubError>>,
    },
    Detach(ClientId),
    DeliverSession(SessionId, RawFrame),
    DeliverOperator(PrincipalId, RawFrame),
    Broadcast(RawFrame, BroadcastFilter),
    BeginDrain,
    Snapshot(oneshot::Sender<HubSnapshot>),
}

/// Cloneable handle to the hub run-loop.
#[derive(Clone)]
pub struct Hub {
    tx: mpsc::Sender<Command>,
    inbound_tx: mpsc::Sender<Inbound>,
}

impl Hub {
    /// Start the run-loop. Returns the handle, the inbound channel the
    /// router consumes, and the run-loop join handle.
    #[must_use]
    pub fn start(
        config: &HubConfig,
        metrics: Metrics,
        shutdown: broadcast::Receiver<()>,
    ) -> (Self, mpsc::Receiver<Inbound>, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);

        let run_loop = RunLoop {
            rx,
            shutdown,
            clients: HashMap::new(),
            by_session: HashMap::new(),
            by_operator: HashMap::new(),
            queue_capacity: config.outbound_queue,
            heartbeat: Duration::from_secs(config.heartbeat_secs),
            metrics,
            draining: false,
        };
        let handle = tokio::spawn(run_loop.run());

        (
            Self { tx, inbound_tx },
            inbound_rx,
            handle,
        )
    }

    /// Sender the transport's readers push inbound frames into.
    #[must_use]
    pub fn inbound_sender(&self) -> mpsc::Sender<Inbound> {
        self.inbound_tx.clone()
    }

    /// Register a new client.
    ///
    /// # Errors
    ///
    /// [`HubError::Draining`] during shutdown, [`HubError::Closed`] if
    /// the run-loop is gone.
    pub async fn attach(
        &self,
        tag: ClientTag,
        department: Option<String>,
    ) -> Result<AttachedClient, HubError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Attach {
                tag,
                department,
                reply,
            })
            .await
            .map_err(|_| HubError::Closed)?;
        rx.await.map_err(|_| HubError::Closed)?
    }

    /// Remove a client. Idempotent.
    pub async fn detach(&self, id: ClientId) {
        let _ = self.tx.send(Command::Detach(id)).await;
    }

    /// Enqueue a frame to every client attached to a session.
    pub async fn deliver_to_session(&self, session: &SessionId, frame: Frame) {
        let _ = self
            .tx
            .send(Command::DeliverSession(session.clone(), frame.into()))
            .await;
    }

    /// Enqueue a frame to every client attached to an operator.
    pub async fn deliver_to_operator(&self, operator: PrincipalId, frame: Frame) {
        let _ = self
            .tx
            .send(Command::DeliverOperator(operator, frame.into()))
            .await;
    }

    /// Enqueue a frame to every client matching the predicate.
    pub async fn broadcast<F>(&self, frame: Frame, filter: F)
    where
        F: Fn(&ClientMeta) -> bool + Send + 'static,
    {
        let _ = self
            .tx
            .send(Command::Broadcast(frame.into(), Box::new(filter)))
            .await;
    }

    /// Stop accepting attaches and tell every client to flush and
    /// close.
    pub async fn begin_drain(&self) {
        let _ = self.tx.send(Command::BeginDrain).await;
    }

    /// Snapshot the registry.
    ///
    /// # Errors
    ///
    /// [`HubError::Closed`] if the run-loop is gone.
    pub async fn snapshot(&self) -> Result<HubSnapshot, HubError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Snapshot(reply))
            .await
            .map_err(|_| HubError::Closed)?;
        rx.await.map_err(|_| HubError::Closed)
    }
}

struct Entry {
    meta: ClientMeta,
    queue: Arc<ClientQueue>,
    last_activity: Arc<Mutex<Instant>>,
}

struct RunLoop {
    rx: mpsc::Receiver<Command>,
    shutdown: broadcast::Receiver<()>,
    clients: HashMap<ClientId, Entry>,
    by_session: HashMap<SessionId, HashSet<ClientId>>,
    by_operator: HashMap<PrincipalId, HashSet<ClientId>>,
    queue_capacity: usize,
    heartbeat: Duration,
    metrics: Metrics,
    draining: bool,
}

impl RunLoop {
    async fn run(mut self) {
        // Jitter the first heartbeat so a fleet of restarting hubs does
        // not beat in phase.
        let jitter = self.heartbeat.mul_f64(f64::from(fastrand::u32(0..1000)) / 1000.0);
        let first_tick = Instant::now() + jitter;
        let mut ticker = tokio::time::interval_at(first_tick, self.heartbeat);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(heartbeat_secs = self.heartbeat.as_secs(), "Hub run-loop started");

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.recv() => {
                    info!("Hub run-loop received shutdown signal");
                    self.begin_drain();
                    break;
                }
                command = self.rx.recv() => {
                    match command {
                        Some(command) => self.handle(command),
                        None => {
                            info!("Hub command channel closed, run-loop exiting");
                            break;
                        }
                    }
                }
                _ = ticker.tick() => self.heartbeat_tick(),
            }
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Attach {
                tag,
                department,
                reply,
            } => {
                let _ = reply.send(self.attach(tag, department));
            }
            Command::Detach(id) => self.detach(id),
            Command::DeliverSession(session, frame) => {
                self.deliver(self.by_session.get(&session).cloned(), &frame);
            }
            Command::DeliverOperator(operator, frame) => {
                self.deliver(self.by_operator.get(&operator).cloned(), &frame);
            }
            Command::Broadcast(frame, filter) => {
                let targets: HashSet<ClientId> = self
                    .clients
                    .values()
                    .filter(|entry| filter(&entry.meta))
                    .map(|entry| entry.meta.id)
                    .collect();
                self.deliver(Some(targets), &frame);
            }
            Command::BeginDrain => self.begin_drain(),
            Command::Snapshot(reply) => {
                let _ = reply.send(HubSnapshot {
                    clients: self.clients.values().map(|e| e.meta.clone()).collect(),
                    draining: self.draining,
                });
            }
        }
    }

    fn attach(
        &mut self,
        tag: ClientTag,
        department: Option<String>,
    ) -> Result<AttachedClient, HubError> {
        if self.draining {
            return Err(HubError::Draining);
        }

        let id = ClientId::new();
        let queue = Arc::new(ClientQueue::new(self.queue_capacity));
        let last_activity = Arc::new(Mutex::new(Instant::now()));

        match &tag {
            ClientTag::CustomerOf(session) => {
                self.by_session.entry(session.clone()).or_default().insert(id);
            }
            ClientTag::Operator(operator) => {
                self.by_operator.entry(*operator).or_default().insert(id);
            }
        }

        let meta = ClientMeta {
            id,
            tag,
            department,
        };
        debug!(client = %id, tag = ?meta.tag, "Client attached");
        self.clients.insert(
            id,
            Entry {
                meta,
                queue: Arc::clone(&queue),
                last_activity: Arc::clone(&last_activity),
            },
        );
        self.metrics
            .active_sockets
            .set(i64::try_from(self.clients.len()).unwrap_or(i64::MAX));

        Ok(AttachedClient {
            id,
            queue,
            last_activity,
        })
    }

    fn detach(&mut self, id: ClientId) {
        let Some(entry) = self.clients.remove(&id) else {
            return; // Idempotent.
        };
        entry.queue.close();
        match &entry.meta.tag {
            ClientTag::CustomerOf(session) => {
                if let Some(set) = self.by_session.get_mut(session) {
                    set.remove(&id);
                    if set.is_empty() {
                        self.by_session.remove(session);
                    }
                }
            }
            ClientTag::Operator(operator) => {
                if let Some(set) = self.by_operator.get_mut(operator) {
                    set.remove(&id);
                    if set.is_empty() {
                        self.by_operator.remove(operator);
                    }
                }
            }
        }
        debug!(client = %id, "Client detached");
        self.metrics
            .active_sockets
            .set(i64::try_from(self.clients.len()).unwrap_or(i64::MAX));
    }

    fn deliver(&self, targets: Option<HashSet<ClientId>>, frame: &RawFrame) {
        let Some(targets) = targets else { return };
        for id in targets {
            if let Some(entry) = self.clients.get(&id) {
                if entry.queue.push(Outbound::Frame(frame.clone())) == QueuePush::DroppedOldest {
                    self.metrics
                        .hub_dropped_frames
                        .with_label_values(&["overflow"])
                        .inc();
                    warn!(client = %id, "Outbound queue overflow, dropped oldest frame");
                }
            }
        }
    }

    fn heartbeat_tick(&mut self) {
        let now = Instant::now();
        let dead_after = self.heartbeat * 3;

        let mut dead = Vec::new();
        for (id, entry) in &self.clients {
            let last = *entry
                .last_activity
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if now.duration_since(last) > dead_after {
                dead.push(*id);
                continue;
            }
            entry.queue.push(Outbound::Heartbeat);
        }

        for id in dead {
            warn!(client = %id, "No activity for three heartbeats, closing");
            if let Some(entry) = self.clients.get(&id) {
                entry
                    .queue
                    .push(Outbound::Frame(Frame::system("connection timed out").into()));
                entry.queue.push(Outbound::Close);
            }
            self.detach(id);
        }
    }

    fn begin_drain(&mut self) {
        if self.draining {
            return;
        }
        self.draining = true;
        info!(clients = self.clients.len(), "Hub draining");
        for entry in self.clients.values() {
            entry
                .queue
                .push(Outbound::Frame(Frame::system("server shutting down").into()));
            entry.queue.push(Outbound::Close);
        }
    }
}
