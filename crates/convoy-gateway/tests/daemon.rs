//! Daemon wiring: state build, credential flow, ingest, and drain.

use std::collections::HashMap;

use convoy_auth::{Claims, mint};
use convoy_config::ConvoyConfig;
use convoy_gateway::AppState;
use convoy_hub::ClientTag;
use convoy_metrics::{ClientMetric, ClientMetricsBatch};
use convoy_router::AdapterRegistry;

fn test_config() -> ConvoyConfig {
    let mut config = ConvoyConfig::default();
    config.auth.secret = "daemon-test-secret".to_string();
    config
}

#[tokio::test]
async fn build_wires_every_engine() {
    let (state, _handles) = AppState::build(test_config(), AdapterRegistry::new())
        .await
        .unwrap();

    // The hub accepts clients and the metrics registry renders.
    let client = state
        .hub
        .attach(
            ClientTag::Operator(convoy_core::PrincipalId(1)),
            Some("support".into()),
        )
        .await
        .unwrap();
    let text = state.metrics.render().unwrap();
    assert!(text.contains("convoy_uptime_seconds"));
    assert!(text.contains("convoy_active_sockets 1"));

    drop(client);
}

#[tokio::test]
async fn minted_credentials_verify_with_role_expansion() {
    let (state, _handles) = AppState::build(test_config(), AdapterRegistry::new())
        .await
        .unwrap();

    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        user_id: Some(42),
        roles: vec!["operator".to_string()],
        iat: Some(now),
        exp: Some(now + 600),
        ..Claims::default()
    };
    let token = mint("daemon-test-secret", &claims).unwrap();

    let verified = state.verifier.verify(&token).unwrap();
    assert_eq!(verified.principal, convoy_core::PrincipalId(42));
    // The default role map expands operator into session/ticket grants.
    assert!(verified.permissions.iter().any(|p| p == "sessions.*"));

    // A credential minted with another secret is rejected.
    let forged = mint("other-secret", &claims).unwrap();
    assert!(state.verifier.verify(&forged).is_err());
}

#[tokio::test]
async fn ingest_respects_the_whitelist() {
    let (state, _handles) = AppState::build(test_config(), AdapterRegistry::new())
        .await
        .unwrap();

    let report = state.ingestor.apply(&ClientMetricsBatch {
        source: "widget".into(),
        tenant: None,
        session: None,
        metrics: vec![
            ClientMetric {
                name: "widget_loads".into(),
                value: 1.0,
                labels: HashMap::new(),
            },
            ClientMetric {
                name: "not_whitelisted".into(),
                value: 1.0,
                labels: HashMap::new(),
            },
        ],
    });
    assert_eq!(report.accepted, 1);
    assert_eq!(report.dropped, 1);

    let text = state.metrics.render().unwrap();
    assert!(text.contains("convoy_client_widget_loads"));
    assert!(!text.contains("convoy_client_not_whitelisted"));
}

#[tokio::test]
async fn drain_refuses_new_clients_and_stops_loops() {
    let mut config = test_config();
    config.server.drain_deadline_secs = 1;
    let (state, handles) = AppState::build(config, AdapterRegistry::new())
        .await
        .unwrap();

    state.drain_and_shutdown().await;

    let err = state
        .hub
        .attach(ClientTag::Operator(convoy_core::PrincipalId(1)), None)
        .await;
    assert!(err.is_err(), "attach after drain must fail");

    // Every background loop observed the shutdown broadcast.
    for handle in handles {
        tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .expect("loop did not stop")
            .expect("loop panicked");
    }
}
