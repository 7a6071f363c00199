//! HTTP surface.
//!
//! - `OPTIONS {endpoint}`: webhook abuse-protection handshake, echoes the
//!   request origin in `WebHook-Allowed-Origin`
//! - `POST {endpoint}`: event delivery (see [`crate::ingest`])
//! - `GET {hub_path}`: WebSocket upgrade for live subscribers
//! - `GET /health`, `GET /metrics`

use crate::config::ServerConfig;
use crate::error::IngestError;
use crate::ingest::{IngestOutcome, Ingestor};
use crate::hub::serve_session;
use axum::body::Bytes;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, options};
use axum::Router;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Origin header sent by the platform before registering a webhook
pub const WEBHOOK_REQUEST_ORIGIN: &str = "webhook-request-origin";

const WEBHOOK_ALLOWED_RATE: HeaderName = HeaderName::from_static("webhook-allowed-rate");
const WEBHOOK_ALLOWED_ORIGIN: HeaderName = HeaderName::from_static("webhook-allowed-origin");

/// Request counters
pub struct Metrics {
    requests_received: AtomicU64,
    requests_rejected: AtomicU64,
    handshakes: AtomicU64,
    events_accepted: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            requests_received: AtomicU64::new(0),
            requests_rejected: AtomicU64::new(0),
            handshakes: AtomicU64::new(0),
            events_accepted: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub ingestor: Ingestor,
    pub metrics: Arc<Metrics>,
    pub heartbeat: Duration,
}

impl AppState {
    pub fn new(ingestor: Ingestor, heartbeat: Duration) -> Self {
        Self {
            ingestor,
            metrics: Arc::new(Metrics::new()),
            heartbeat,
        }
    }
}

/// Build the axum router for the configured paths.
pub fn build_router(state: AppState, server: &ServerConfig) -> Router {
    Router::new()
        .route(
            &server.endpoint,
            options(webhook_options).post(webhook_post),
        )
        .route(&server.hub_path, get(subscribe))
        .route("/health", get(health_check))
        .route("/metrics", get(get_metrics))
        .with_state(state)
}

/// Answer the platform's pre-registration probe.
async fn webhook_options(headers: HeaderMap) -> impl IntoResponse {
    let origin = headers
        .get(WEBHOOK_REQUEST_ORIGIN)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(""));

    debug!(origin = ?origin, "Webhook origin probe");

    (
        StatusCode::OK,
        [
            (WEBHOOK_ALLOWED_RATE, HeaderValue::from_static("*")),
            (WEBHOOK_ALLOWED_ORIGIN, origin),
        ],
    )
}

async fn webhook_post(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    state.metrics.requests_received.fetch_add(1, Ordering::Relaxed);

    match state.ingestor.ingest(&headers, &body).await {
        Ok(IngestOutcome::Validated(response)) => {
            state.metrics.handshakes.fetch_add(1, Ordering::Relaxed);
            info!("Subscription validated");
            Json(response).into_response()
        }
        Ok(IngestOutcome::Accepted { events }) => {
            state
                .metrics
                .events_accepted
                .fetch_add(events as u64, Ordering::Relaxed);
            info!(events, "Notification accepted");
            StatusCode::OK.into_response()
        }
        Err(e) => reject(&state, e),
    }
}

fn reject(state: &AppState, error: IngestError) -> Response {
    state.metrics.requests_rejected.fetch_add(1, Ordering::Relaxed);
    warn!(error = %error, "Webhook request rejected");
    error.into_response()
}

async fn subscribe(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let hub = Arc::clone(state.ingestor.hub());
    let heartbeat = state.heartbeat;
    ws.on_upgrade(move |socket| serve_session(socket, hub, heartbeat))
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "sessions": state.ingestor.hub().session_count(),
    }))
}

/// Server metrics as JSON
async fn get_metrics(State(state): State<AppState>) -> Json<Value> {
    let uptime = state.metrics.uptime_seconds();
    let hub = state.ingestor.hub();
    let hub_stats = hub.stats();

    let uptime_str = if uptime < 60 {
        format!("{}s", uptime)
    } else if uptime < 3600 {
        format!("{}m {}s", uptime / 60, uptime % 60)
    } else {
        format!("{}h {}m {}s", uptime / 3600, (uptime % 3600) / 60, uptime % 60)
    };

    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": uptime,
        "uptime": uptime_str,
        "requests": {
            "received": state.metrics.requests_received.load(Ordering::Relaxed),
            "rejected": state.metrics.requests_rejected.load(Ordering::Relaxed),
            "handshakes": state.metrics.handshakes.load(Ordering::Relaxed),
        },
        "events": {
            "accepted": state.metrics.events_accepted.load(Ordering::Relaxed),
            "broadcasts": hub_stats.broadcasts,
            "delivered": hub_stats.delivered,
            "dropped": hub_stats.dropped,
        },
        "sessions": hub.session_count(),
        "status": "running"
    }))
}
