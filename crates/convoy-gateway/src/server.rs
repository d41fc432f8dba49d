//! The HTTP/WebSocket surface.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router as AxumRouter,
    extract::{
        ConnectInfo, Path, Query, State,
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use convoy_auth::{AccessMode, ResourceGuard, Verified};
use convoy_core::{Platform, Session, SessionId, TicketId, parse_raw};
use convoy_hub::{AttachedClient, ClientTag, Inbound, Outbound};
use convoy_limit::{Decision, RejectBody, client_key};
use convoy_metrics::ClientMetricsBatch;
use convoy_storage::ConversationStore;

use crate::error::ApiError;
use crate::health::{HealthCheck, HealthStatus};
use crate::state::AppState;

/// Build the axum application.
#[must_use]
pub fn build_app(state: Arc<AppState>) -> AxumRouter {
    AxumRouter::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/metrics/ingest", post(ingest_handler))
        .route("/api/operators", get(operators_handler))
        .route("/api/sessions/:id/messages", get(messages_handler))
        .route("/api/sessions/:id/end", post(end_session_handler))
        .route("/api/ai/breaker/reset", post(breaker_reset_handler))
        .route("/api/automation/triggers/:id/run", post(batch_run_handler))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

// ---------------------------------------------------------------------
// Auth and rate limiting at the edge
// ---------------------------------------------------------------------

fn bearer_token(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        if let Ok(text) = value.to_str() {
            if let Some(token) = text.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }
    query_token.map(str::to_string)
}

fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<Verified, ApiError> {
    let token = bearer_token(headers, query_token)
        .ok_or_else(|| ApiError::unauthorized("missing bearer credential"))?;
    state
        .verifier
        .verify(&token)
        .map_err(|err| ApiError::unauthorized(err.to_string()))
}

fn authorize(
    verified: &Verified,
    resource: &str,
    mode: AccessMode,
) -> Result<(), ApiError> {
    let guard = ResourceGuard::new(resource);
    if guard.allows(&verified.permissions, mode) {
        Ok(())
    } else {
        Err(ApiError::forbidden(format!(
            "requires {}",
            guard.required(mode)
        )))
    }
}

/// Rate-limit one request; returns the 429 response on rejection.
fn check_rate_limit(
    state: &AppState,
    headers: &HeaderMap,
    remote: SocketAddr,
    path: &str,
) -> Result<(), Response> {
    let header_value = state
        .limiter
        .key_header()
        .and_then(|name| headers.get(name))
        .and_then(|v| v.to_str().ok());
    let key = client_key(
        state.limiter.key_header(),
        header_value,
        &remote.ip().to_string(),
    );

    match state.limiter.check(&key, path) {
        Decision::Admit => Ok(()),
        Decision::Reject { retry_after_secs } => {
            let body = RejectBody::new(retry_after_secs);
            let response = (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, retry_after_secs.to_string())],
                Json(body),
            )
                .into_response();
            Err(response)
        }
    }
}

// ---------------------------------------------------------------------
// WebSocket ingress
// ---------------------------------------------------------------------

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = check_rate_limit(&state, &headers, remote, "/ws") {
        return response;
    }
    let verified = match authenticate(&state, &headers, query.get("token").map(String::as_str)) {
        Ok(verified) => verified,
        Err(err) => return err.into_response(),
    };
    if let Err(err) = authorize(&verified, "sessions", AccessMode::Write) {
        return err.into_response();
    }

    // Operators attach consoles; customers attach to a session,
    // creating one on first contact.
    let is_operator = verified.roles.iter().any(|r| r == "operator");
    let tag = if is_operator {
        ClientTag::Operator(verified.principal)
    } else {
        match resolve_customer_session(&state, &verified, &query).await {
            Ok(session) => ClientTag::CustomerOf(session),
            Err(err) => return err.into_response(),
        }
    };
    let department = query.get("department").cloned();

    ws.on_upgrade(move |socket| serve_socket(socket, state, tag, department))
}

/// Attach an existing session or start a new one for the customer.
async fn resolve_customer_session(
    state: &AppState,
    verified: &Verified,
    query: &HashMap<String, String>,
) -> Result<SessionId, ApiError> {
    if let Some(raw) = query.get("session") {
        let id = raw
            .parse::<uuid::Uuid>()
            .map(SessionId)
            .map_err(|_| ApiError::bad_request("session is not a uuid"))?;
        let session = state
            .store
            .session(&id)
            .await
            .map_err(|_| ApiError::not_found("unknown session"))?;
        if session.customer != verified.principal {
            return Err(ApiError::forbidden("session belongs to another customer"));
        }
        return Ok(id);
    }

    let platform: Platform = query
        .get("platform")
        .cloned()
        .unwrap_or_else(|| "web".to_string())
        .into();
    let session = Session::start(verified.principal, platform);
    let id = session.id.clone();
    state
        .store
        .create_session(session)
        .await
        .map_err(|err| ApiError::internal(err.to_string()))?;
    info!(session = %id, customer = %verified.principal, "Session started");
    Ok(id)
}

/// One connection: attach to the hub, then run the reader and writer
/// halves until either side ends.
async fn serve_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    tag: ClientTag,
    department: Option<String>,
) {
    let attached = match state.hub.attach(tag.clone(), department).await {
        Ok(attached) => attached,
        Err(err) => {
            debug!(error = %err, "Attach refused");
            let mut socket = socket;
            let _ = socket
                .send(WsMessage::Text(
                    json!({"type": "system", "data": {"text": err.to_string()}}).to_string(),
                ))
                .await;
            let _ = socket.close().await;
            return;
        }
    };
    let client_id = attached.id;
    let attached = Arc::new(attached);

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(run_writer(sink, Arc::clone(&attached)));
    run_reader(stream, &state, &attached, tag).await;

    // Reader finished (peer closed or errored): detach closes the
    // queue, which ends the writer after its flush.
    state.hub.detach(client_id).await;
    let _ = writer.await;
    debug!(client = %client_id, "Socket closed");
}

/// Reader half: wire frames into the router's ingress channel.
async fn run_reader(
    mut stream: futures::stream::SplitStream<WebSocket>,
    state: &AppState,
    attached: &AttachedClient,
    tag: ClientTag,
) {
    let inbound_tx = state.hub.inbound_sender();
    while let Some(message) = stream.next().await {
        match message {
            Ok(WsMessage::Text(text)) => {
                attached.touch();
                match parse_raw(&text) {
                    Ok(raw) => {
                        let inbound = Inbound {
                            client: attached.id,
                            tag: tag.clone(),
                            raw,
                            received_at: chrono::Utc::now(),
                        };
                        if inbound_tx.send(inbound).await.is_err() {
                            // Router gone: the daemon is shutting down.
                            break;
                        }
                    }
                    Err(err) => {
                        debug!(client = %attached.id, error = %err, "Unparseable frame");
                        attached.queue.push(Outbound::Frame(
                            convoy_core::Frame::system("malformed frame").into(),
                        ));
                    }
                }
            }
            Ok(WsMessage::Pong(_) | WsMessage::Ping(_)) => attached.touch(),
            Ok(WsMessage::Close(_)) | Err(_) => break,
            Ok(WsMessage::Binary(_)) => {
                debug!(client = %attached.id, "Binary frame ignored");
            }
        }
    }
}

/// Writer half: drain the hub queue onto the wire.
async fn run_writer(
    mut sink: futures::stream::SplitSink<WebSocket, WsMessage>,
    attached: Arc<AttachedClient>,
) {
    while let Some(item) = attached.queue.pop().await {
        let result = match item {
            Outbound::Frame(frame) => match serde_json::to_string(&frame) {
                Ok(text) => sink.send(WsMessage::Text(text)).await,
                Err(err) => {
                    warn!(client = %attached.id, error = %err, "Frame encode failed");
                    continue;
                }
            },
            Outbound::Heartbeat => sink.send(WsMessage::Ping(Vec::new())).await,
            Outbound::Close => break,
        };
        match result {
            Ok(()) => attached.touch(),
            Err(_) => break,
        }
    }
    let _ = sink.close().await;
}

// ---------------------------------------------------------------------
// HTTP endpoints
// ---------------------------------------------------------------------

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthStatus> {
    let mut checks = Vec::new();

    let start = Instant::now();
    let hub_check = match state.hub.snapshot().await {
        Ok(snapshot) if snapshot.draining => {
            HealthCheck::degraded("hub", "draining", start.elapsed())
        }
        Ok(_) => HealthCheck::healthy("hub", start.elapsed()),
        Err(err) => HealthCheck::unhealthy("hub", err.to_string(), start.elapsed()),
    };
    checks.push(hub_check);

    let start = Instant::now();
    let breaker = state.resolver.breaker_state();
    let breaker_check = match breaker {
        convoy_resolver::BreakerSnapshot::Closed => {
            HealthCheck::healthy("ai_breaker", start.elapsed())
        }
        convoy_resolver::BreakerSnapshot::HalfOpen => {
            HealthCheck::degraded("ai_breaker", "half-open", start.elapsed())
        }
        convoy_resolver::BreakerSnapshot::Open { reopens_in_secs } => HealthCheck::degraded(
            "ai_breaker",
            format!("open, trial in {reopens_in_secs}s"),
            start.elapsed(),
        ),
    };
    checks.push(breaker_check);

    let start = Instant::now();
    let depth = state.assign.queue_depth();
    let queue_check = if depth > 50 {
        HealthCheck::degraded("waiting_queue", format!("{depth} sessions waiting"), start.elapsed())
    } else {
        HealthCheck::healthy("waiting_queue", start.elapsed())
    };
    checks.push(queue_check);

    let start = Instant::now();
    let storage_check = match convoy_storage::DirectoryStore::operators(&*state.store).await {
        Ok(_) => HealthCheck::healthy("storage", start.elapsed()),
        Err(err) => HealthCheck::unhealthy("storage", err.to_string(), start.elapsed()),
    };
    checks.push(storage_check);

    Json(HealthStatus::from_checks(checks, state.uptime()))
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.render() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => ApiError::internal(err.to_string()).into_response(),
    }
}

async fn ingest_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(batch): Json<ClientMetricsBatch>,
) -> Response {
    if let Err(response) = check_rate_limit(&state, &headers, remote, "/api/metrics/ingest") {
        return response;
    }
    let report = state.ingestor.apply(&batch);
    Json(report).into_response()
}

async fn operators_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let verified = authenticate(&state, &headers, query.get("token").map(String::as_str))?;
    authorize(&verified, "operators", AccessMode::Read)?;

    let operators: Vec<_> = state
        .assign
        .operators()
        .into_iter()
        .map(|s| {
            json!({
                "id": s.profile.id,
                "department": s.profile.department,
                "availability": s.profile.availability,
                "load": s.profile.current_load,
                "max_concurrent": s.profile.max_concurrent,
                "skills": s.profile.skills,
                "avg_response_secs": s.profile.avg_response_secs,
                "last_assigned_at": s.last_assigned_at,
            })
        })
        .collect();
    Ok(Json(json!({
        "operators": operators,
        "queue_depth": state.assign.queue_depth(),
    })))
}

#[derive(Debug, Deserialize)]
struct PageParams {
    #[serde(default)]
    offset: usize,
    #[serde(default = "default_page_limit")]
    limit: usize,
    token: Option<String>,
}

fn default_page_limit() -> usize {
    50
}

async fn messages_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<uuid::Uuid>,
    Query(params): Query<PageParams>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let verified = authenticate(&state, &headers, params.token.as_deref())?;
    authorize(&verified, "sessions", AccessMode::Read)?;

    let session = SessionId(id);
    let messages = state
        .store
        .messages(&session, params.offset, params.limit.min(500))
        .await
        .map_err(|err| ApiError::not_found(err.to_string()))?;
    Ok(Json(json!({"messages": messages})))
}

async fn end_session_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<uuid::Uuid>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let verified = authenticate(&state, &headers, query.get("token").map(String::as_str))?;
    authorize(&verified, "sessions", AccessMode::Write)?;

    let session = SessionId(id);
    state
        .assign
        .end_session(&session)
        .await
        .map_err(|err| ApiError::from(convoy_core::CoreError::from(err)))?;
    state.router.forget_session(&session);
    state
        .hub
        .deliver_to_session(&session, convoy_core::Frame::system("session ended"))
        .await;
    info!(%session, by = %verified.principal, "Session ended");
    Ok(Json(json!({"status": "ended"})))
}

async fn breaker_reset_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let verified = authenticate(&state, &headers, query.get("token").map(String::as_str))?;
    authorize(&verified, "ai", AccessMode::Write)?;

    state.resolver.force_reset_breaker();
    info!(admin = %verified.principal, "Breaker force-reset");
    Ok(Json(json!({"status": "closed"})))
}

#[derive(Debug, Deserialize)]
struct BatchRunBody {
    ticket_ids: Vec<i64>,
    #[serde(default)]
    dry_run: bool,
}

async fn batch_run_handler(
    State(state): State<Arc<AppState>>,
    Path(trigger_id): Path<i64>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<BatchRunBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let verified = authenticate(&state, &headers, query.get("token").map(String::as_str))?;
    authorize(&verified, "automation", AccessMode::Write)?;

    let tickets: Vec<TicketId> = body.ticket_ids.iter().copied().map(TicketId).collect();
    let runs = state
        .automation
        .batch_run(trigger_id, &tickets, body.dry_run)
        .await
        .map_err(|err| ApiError::from(convoy_core::CoreError::from(err)))?;
    Ok(Json(json!({"runs": runs})))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_prefers_header_over_query() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());

        assert_eq!(bearer_token(&headers, Some("xyz")), Some("abc".to_string()));
        assert_eq!(
            bearer_token(&HeaderMap::new(), Some("xyz")),
            Some("xyz".to_string())
        );
        assert_eq!(bearer_token(&HeaderMap::new(), None), None);
    }
}
