//! End-to-end transfer flows over the in-memory stores and a live hub.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::broadcast;

use convoy_assign::{AssignmentEngine, TransferOutcome};
use convoy_config::{AssignmentConfig, HubConfig};
use convoy_core::prelude::*;
use convoy_events::EventBus;
use convoy_hub::{ClientQueue, ClientTag, Hub, Outbound};
use convoy_metrics::Metrics;
use convoy_storage::{
    ConversationStore, DirectoryStore, MemoryStore, QueueStore, TicketStore,
};

struct Harness {
    engine: Arc<AssignmentEngine>,
    store: Arc<MemoryStore>,
    hub: Hub,
    _shutdown: broadcast::Sender<()>,
}

async fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let (hub, _inbound, _handle) = Hub::start(
        &HubConfig {
            outbound_queue: 64,
            heartbeat_secs: 60,
        },
        Metrics::new().unwrap(),
        shutdown_rx,
    );

    let engine = AssignmentEngine::new(
        AssignmentConfig::default(),
        Arc::clone(&store) as Arc<dyn DirectoryStore>,
        Arc::clone(&store) as Arc<dyn ConversationStore>,
        Arc::clone(&store) as Arc<dyn TicketStore>,
        Arc::clone(&store) as Arc<dyn QueueStore>,
        hub.clone(),
        EventBus::new(),
    );

    Harness {
        engine,
        store,
        hub,
        _shutdown: shutdown_tx,
    }
}

async fn seed_operator(store: &MemoryStore, id: i64, max: u32, load: u32) -> PrincipalId {
    let principal = PrincipalId(id);
    let mut profile = OperatorProfile::new(principal, "support", max)
        .with_skill("billing")
        .with_skill("en");
    profile.current_load = load;
    store.upsert_operator(profile).await.unwrap();
    principal
}

async fn seed_session(store: &MemoryStore, customer: i64) -> SessionId {
    let session = Session::start(PrincipalId(customer), Platform::Web);
    let id = session.id.clone();
    store.create_session(session).await.unwrap();
    id
}

/// Drain one client queue into frames, skipping heartbeats.
fn frames_of(queue: &ClientQueue) -> Vec<RawFrame> {
    queue
        .drain_now()
        .into_iter()
        .filter_map(|item| match item {
            Outbound::Frame(frame) => Some(frame),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn escalation_assigns_available_operator() {
    let h = harness().await;
    let operator = seed_operator(&h.store, 7, 5, 1).await;
    let session = seed_session(&h.store, 100).await;
    h.engine.go_online(operator).await.unwrap();

    // Attach a customer tab and the operator console so the frames can
    // be observed.
    let customer_client = h
        .hub
        .attach(ClientTag::CustomerOf(session.clone()), None)
        .await
        .unwrap();
    let operator_client = h
        .hub
        .attach(ClientTag::Operator(operator), Some("support".into()))
        .await
        .unwrap();

    let outcome = h
        .engine
        .transfer_to_human(&session, "policy", Priority::Normal, BTreeSet::new())
        .await
        .unwrap();

    let TransferOutcome::Assigned {
        operator: assigned, ..
    } = outcome
    else {
        panic!("expected assignment, got {outcome:?}");
    };
    assert_eq!(assigned, operator);

    // Load went 1 -> 2.
    let snapshot = h
        .engine
        .operators()
        .into_iter()
        .find(|s| s.profile.id == operator)
        .unwrap();
    assert_eq!(snapshot.profile.current_load, 2);

    // Ticket: assigned to the operator, normal priority.
    let ticket = h
        .store
        .ticket_for_session(&session)
        .await
        .unwrap()
        .expect("ticket created");
    assert_eq!(ticket.operator, Some(operator));
    assert_eq!(ticket.status, TicketStatus::Assigned);
    assert_eq!(ticket.priority, Priority::Normal);

    // Transfer record: ai -> operator.
    let transfers = h.store.transfers_for(&session).await.unwrap();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].from, Some(TransferParty::Ai));
    assert_eq!(transfers[0].to, TransferParty::Operator(operator));

    // Frames: handoff-notification to the customer, system notice to
    // the operator. Flush hub commands via snapshot first.
    let _ = h.hub.snapshot().await.unwrap();
    let customer_frames = frames_of(&customer_client.queue);
    assert!(
        customer_frames
            .iter()
            .any(|f| f.kind == "handoff-notification" && f.data["reason"] == "policy")
    );
    let operator_frames = frames_of(&operator_client.queue);
    assert!(
        operator_frames
            .iter()
            .any(|f| f.kind == "system" && f.data["text"] == "new session")
    );

    // Session is operator-handled now.
    assert_eq!(h.engine.operator_for(&session), Some(operator));
    let stored = h.store.session(&session).await.unwrap();
    assert_eq!(stored.status, SessionStatus::Handled);
}

#[tokio::test]
async fn no_operator_queues_then_drain_assigns() {
    let h = harness().await;
    let session = seed_session(&h.store, 101).await;

    let customer_client = h
        .hub
        .attach(ClientTag::CustomerOf(session.clone()), None)
        .await
        .unwrap();

    // Nobody online: the session parks at position 1.
    let outcome = h
        .engine
        .transfer_to_human(&session, "no-operator", Priority::Normal, BTreeSet::new())
        .await
        .unwrap();
    assert_eq!(outcome, TransferOutcome::Queued { position: 1 });

    let record = h
        .store
        .waiting_for(&session)
        .await
        .unwrap()
        .expect("waiting record");
    assert_eq!(record.status, WaitingStatus::Waiting);
    assert_eq!(h.store.session(&session).await.unwrap().status, SessionStatus::Waiting);

    let _ = h.hub.snapshot().await.unwrap();
    let frames = frames_of(&customer_client.queue);
    assert!(
        frames
            .iter()
            .any(|f| f.kind == "handoff-notification" && f.data["position"] == 1)
    );

    // A second escalation while waiting is a conflict.
    let err = h
        .engine
        .transfer_to_human(&session, "again", Priority::Normal, BTreeSet::new())
        .await
        .unwrap_err();
    assert!(matches!(err, convoy_assign::AssignError::AlreadyWaiting(_)));

    // An operator with matching skills comes online; one drain pass
    // places the session.
    let operator = seed_operator(&h.store, 3, 5, 0).await;
    h.engine.go_online(operator).await.unwrap();
    let assigned = h.engine.drain_once().await;
    assert_eq!(assigned, 1);

    let record = h.store.waiting_for(&session).await.unwrap();
    assert!(record.is_none(), "live waiting record should be consumed");

    let transfers = h.store.transfers_for(&session).await.unwrap();
    let last = transfers.last().unwrap();
    assert_eq!(last.from, Some(TransferParty::Queue));
    assert_eq!(last.to, TransferParty::Operator(operator));

    let snapshot = h
        .engine
        .operators()
        .into_iter()
        .find(|s| s.profile.id == operator)
        .unwrap();
    assert_eq!(snapshot.profile.current_load, 1);
}

#[tokio::test]
async fn operator_disconnect_returns_session_to_queue() {
    let h = harness().await;
    let operator = seed_operator(&h.store, 7, 5, 0).await;
    let session = seed_session(&h.store, 102).await;
    h.engine.go_online(operator).await.unwrap();

    let outcome = h
        .engine
        .transfer_to_human(&session, "policy", Priority::High, BTreeSet::new())
        .await
        .unwrap();
    assert!(matches!(outcome, TransferOutcome::Assigned { .. }));

    // Synthetic disconnect.
    h.engine.go_offline(operator).await.unwrap();

    assert_eq!(h.engine.operator_for(&session), None);
    let record = h
        .store
        .waiting_for(&session)
        .await
        .unwrap()
        .expect("requeued");
    assert_eq!(record.status, WaitingStatus::Waiting);

    // The record chain reconstructs the history:
    // ai -> operator, operator -> queue.
    let transfers = h.store.transfers_for(&session).await.unwrap();
    assert_eq!(transfers.len(), 2);
    assert_eq!(transfers[0].from, Some(TransferParty::Ai));
    assert_eq!(transfers[0].to, TransferParty::Operator(operator));
    assert_eq!(transfers[1].from, Some(TransferParty::Operator(operator)));
    assert_eq!(transfers[1].to, TransferParty::Queue);
    assert_eq!(transfers[1].reason, "operator-offline");
}

#[tokio::test]
async fn operator_to_operator_transfer_moves_one_slot() {
    let h = harness().await;
    let alice = seed_operator(&h.store, 1, 5, 0).await;
    let bob = seed_operator(&h.store, 2, 5, 0).await;
    let session = seed_session(&h.store, 103).await;
    h.engine.go_online(alice).await.unwrap();

    h.engine
        .transfer_to_human(&session, "policy", Priority::Normal, BTreeSet::new())
        .await
        .unwrap();
    h.engine.go_online(bob).await.unwrap();

    h.engine
        .transfer_to_operator(&session, bob, "specialist needed")
        .await
        .unwrap();

    let loads: Vec<(PrincipalId, u32)> = h
        .engine
        .operators()
        .into_iter()
        .map(|s| (s.profile.id, s.profile.current_load))
        .collect();
    // Net change across operators is zero: alice released, bob claimed.
    assert!(loads.contains(&(alice, 0)));
    assert!(loads.contains(&(bob, 1)));
    assert_eq!(h.engine.operator_for(&session), Some(bob));

    let ticket = h
        .store
        .ticket_for_session(&session)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ticket.operator, Some(bob));
}

#[tokio::test]
async fn transfer_to_full_operator_fails_without_side_effects() {
    let h = harness().await;
    let alice = seed_operator(&h.store, 1, 5, 0).await;
    let bob = seed_operator(&h.store, 2, 1, 1).await; // full
    let session = seed_session(&h.store, 104).await;
    h.engine.go_online(alice).await.unwrap();
    h.engine.go_online(bob).await.unwrap();

    h.engine
        .transfer_to_human(&session, "policy", Priority::Normal, BTreeSet::new())
        .await
        .unwrap();

    let err = h
        .engine
        .transfer_to_operator(&session, bob, "try bob")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        convoy_assign::AssignError::OperatorAtCapacity(_)
    ));

    // Alice keeps the session and her slot.
    assert_eq!(h.engine.operator_for(&session), Some(alice));
    let snapshot = h
        .engine
        .operators()
        .into_iter()
        .find(|s| s.profile.id == alice)
        .unwrap();
    assert_eq!(snapshot.profile.current_load, 1);
}

#[tokio::test]
async fn drain_never_double_assigns_one_slot() {
    let h = harness().await;
    // One operator, one slot; two waiting sessions.
    let operator = seed_operator(&h.store, 1, 1, 0).await;
    let first = seed_session(&h.store, 105).await;
    let second = seed_session(&h.store, 106).await;

    for session in [&first, &second] {
        let outcome = h
            .engine
            .transfer_to_human(session, "no-operator", Priority::Normal, BTreeSet::new())
            .await
            .unwrap();
        assert!(matches!(outcome, TransferOutcome::Queued { .. }));
    }

    h.engine.go_online(operator).await.unwrap();
    let assigned = h.engine.drain_once().await;
    assert_eq!(assigned, 1);

    // The older session won; the younger one still waits at the head.
    assert_eq!(h.engine.operator_for(&first), Some(operator));
    assert_eq!(h.engine.operator_for(&second), None);
    assert_eq!(h.engine.queue_depth(), 1);
    assert_eq!(
        h.store.waiting_for(&second).await.unwrap().unwrap().status,
        WaitingStatus::Waiting
    );
}

#[tokio::test]
async fn end_session_releases_slot_and_cancels_waiting() {
    let h = harness().await;
    let operator = seed_operator(&h.store, 1, 1, 0).await;
    let session = seed_session(&h.store, 107).await;
    h.engine.go_online(operator).await.unwrap();

    h.engine
        .transfer_to_human(&session, "policy", Priority::Normal, BTreeSet::new())
        .await
        .unwrap();
    h.engine.end_session(&session).await.unwrap();

    assert_eq!(h.engine.operator_for(&session), None);
    let snapshot = h
        .engine
        .operators()
        .into_iter()
        .find(|s| s.profile.id == operator)
        .unwrap();
    assert_eq!(snapshot.profile.current_load, 0);
    assert_eq!(
        h.store.session(&session).await.unwrap().status,
        SessionStatus::Ended
    );
}
