//! HTTP shell: telemetry ingestion and action delivery.
//!
//! This module is the thin boundary around the pipeline:
//! - `POST /api/events/batch` appends batched telemetry to the store,
//! - `GET /api/actions/poll` returns recently suggested actions for a user,
//! - `GET /api/actions/stream` pushes suggestions to a live session (SSE),
//! - `GET /health` liveness.
//!
//! Delivery is best-effort: a poll and a stream may surface the same
//! suggestion, and a disconnected session simply misses pushes.

mod registry;

pub use registry::SessionRegistry;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::time::MissedTickBehavior;
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::event::{ActionSuggestion, EventKind, RawEvent};
use crate::store::{EventStore, StoreError};

/// Default cap on poll results, matching what a client can usefully render.
const DEFAULT_POLL_LIMIT: usize = 20;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random).
    pub port: u16,
}

struct AppState {
    store: Arc<dyn EventStore>,
    registry: SessionRegistry,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

#[derive(Deserialize)]
struct BatchRequest {
    #[serde(default)]
    events: Vec<IncomingEvent>,
    #[serde(default)]
    user_id: Option<String>,
}

/// One event as producers send it; `type` and `event_type` are accepted
/// interchangeably and a missing timestamp means "now".
#[derive(Deserialize)]
struct IncomingEvent {
    #[serde(rename = "type", alias = "event_type")]
    kind: EventKind,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    ts: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct PollQuery {
    user_id: String,
    #[serde(default)]
    since: Option<DateTime<Utc>>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct StreamQuery {
    user_id: String,
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// POST /api/events/batch
///
/// The user id comes from the `x-user-id` header, the body, or is generated
/// for anonymous producers.
async fn ingest_batch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<BatchRequest>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    let user_id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or(body.user_id)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let count = body.events.len();
    for incoming in body.events {
        let event = RawEvent {
            id: Uuid::new_v4(),
            user_id: user_id.clone(),
            session_id: incoming.session_id,
            kind: incoming.kind,
            payload: incoming.payload,
            timestamp: incoming.ts.unwrap_or_else(Utc::now),
        };
        state.store.append(event).await.map_err(|error| {
            tracing::error!(%error, "event insert failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: error.to_string(),
                    code: "STORE_ERROR".to_string(),
                }),
            )
        })?;
    }

    tracing::debug!(user = %user_id, count, "telemetry batch accepted");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/actions/poll?user_id=...
async fn poll_actions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PollQuery>,
) -> Result<Json<Vec<RawEvent>>, (StatusCode, Json<ErrorResponse>)> {
    let since = query.since.unwrap_or(DateTime::<Utc>::MIN_UTC);
    let limit = query.limit.unwrap_or(DEFAULT_POLL_LIMIT);

    let actions = state
        .store
        .actions_for_user(&query.user_id, since, limit)
        .await
        .map_err(|error| {
            tracing::error!(%error, "action poll failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: error.to_string(),
                    code: "STORE_ERROR".to_string(),
                }),
            )
        })?;
    Ok(Json(actions))
}

/// GET /api/actions/stream?user_id=...
///
/// Server-sent events; one `action` event per suggestion. The session is
/// registered for the connection's lifetime and pruned after disconnect.
async fn stream_actions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let receiver = state.registry.register(&query.user_id).await;
    tracing::debug!(user = %query.user_id, "session subscribed to action stream");

    let stream = BroadcastStream::new(receiver).filter_map(|item| match item {
        Ok(suggestion) => Event::default()
            .event("action")
            .json_data(&suggestion)
            .ok()
            .map(Ok),
        // A lagged session missed buffered suggestions; it catches up via poll.
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Block until the store answers a ping, retrying `max_attempts` times.
pub async fn wait_for_store(
    store: &dyn EventStore,
    max_attempts: u32,
    delay: Duration,
) -> Result<(), StoreError> {
    let mut last_error = StoreError::Unavailable("no attempts made".to_string());
    for attempt in 1..=max_attempts {
        match store.ping().await {
            Ok(()) => {
                tracing::info!(attempt, "event store ready");
                return Ok(());
            }
            Err(error) => {
                tracing::info!(attempt, %error, "waiting for event store");
                last_error = error;
                if attempt < max_attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    Err(last_error)
}

/// Forward freshly recorded suggestions to live sessions.
///
/// Scans the store once per interval for `action_suggested` events since the
/// previous scan and publishes them through the registry. Sessions that are
/// not connected simply miss the push and fall back to polling.
pub async fn run_dispatcher(
    store: Arc<dyn EventStore>,
    registry: SessionRegistry,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_checked = Utc::now();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let since = last_checked;
                last_checked = Utc::now();
                match store.recent_actions(since).await {
                    Ok(actions) => {
                        for event in actions {
                            match serde_json::from_value::<ActionSuggestion>(event.payload.clone()) {
                                Ok(suggestion) => {
                                    registry.publish(&event.user_id, suggestion).await;
                                }
                                Err(error) => {
                                    tracing::warn!(%error, event_id = %event.id, "malformed action payload; not delivered");
                                }
                            }
                        }
                    }
                    Err(error) => {
                        tracing::warn!(%error, "action scan failed; retrying next interval");
                    }
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("action dispatcher shutting down");
                break;
            }
        }
    }
}

/// Run the HTTP server.
pub async fn run(
    config: ServerConfig,
    store: Arc<dyn EventStore>,
    registry: SessionRegistry,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let state = Arc::new(AppState { store, registry });

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/events/batch", post(ingest_batch))
        .route("/api/actions/poll", get(poll_actions))
        .route("/api/actions/stream", get(stream_actions))
        .layer(
            // Telemetry arrives from arbitrary browser origins.
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("telemetry server listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("server shutdown signal received");
            })
            .await
        {
            tracing::error!("server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
