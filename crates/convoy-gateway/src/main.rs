//! Daemon entry point.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context as _;
use tracing::{error, info, warn};

use convoy_gateway::{AppState, build_app};
use convoy_router::AdapterRegistry;
use convoy_telemetry::setup_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::var("CONVOY_CONFIG").unwrap_or_else(|_| "convoy.toml".to_string());
    let config = convoy_config::load_or_default(&config_path)
        .with_context(|| format!("loading configuration from {config_path}"))?;

    setup_logging(&config.log).context("installing the tracing subscriber")?;
    info!(version = env!("CARGO_PKG_VERSION"), "Convoy gateway starting");

    if config.auth.secret.is_empty() {
        warn!("auth.secret is empty; every credential will fail verification");
    }

    // Channel adapters register here as the deployment grows; the web
    // widget needs no transform.
    let adapters = AdapterRegistry::new();

    let (state, handles) = AppState::build(config, adapters).await?;

    let bind: SocketAddr = state.config.server.bind.parse()?;
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!(%bind, "Listening");

    let app = build_app(std::sync::Arc::clone(&state));
    let server_state = std::sync::Arc::clone(&state);
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let mut shutdown = server_state.shutdown.subscribe();
        let _ = shutdown.recv().await;
    });

    let serve_handle = tokio::spawn(async move {
        if let Err(err) = server.await {
            error!(error = %err, "Server error");
        }
    });

    wait_for_signal().await;
    state.drain_and_shutdown().await;

    // Give the loops a moment to observe the signal, then cut them off.
    let joined = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = serve_handle.await;
        for handle in handles {
            let _ = handle.await;
        }
    })
    .await;
    if joined.is_err() {
        warn!("Background loops did not stop in time");
    }

    info!("Convoy gateway stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(term) => term,
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                let _ = ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => info!("SIGINT received"),
            _ = term.recv() => info!("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!("Ctrl-C received");
    }
}
