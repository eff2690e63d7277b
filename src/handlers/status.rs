//! Status and metrics HTTP endpoints.
//!
//! - `GET /health`: liveness, always `{"status":"ok","consumer":"running"}`
//! - `GET /metrics`: consumer counters and subscribed topics
//!
//! Any other route answers 404.

use std::future::Future;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::metrics::ConsumerMetrics;

/// Shared state for the status handlers.
#[derive(Clone)]
pub struct StatusState {
    pub metrics: Arc<ConsumerMetrics>,
    pub topics: Vec<String>,
}

impl StatusState {
    pub fn new(metrics: Arc<ConsumerMetrics>, topics: Vec<String>) -> Self {
        Self { metrics, topics }
    }
}

/// Start the status server and run until `shutdown` resolves.
///
/// Port 0 binds an ephemeral port; the bound port is always logged.
pub async fn serve<F>(
    state: StatusState,
    config: &ServerConfig,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    let actual_port = listener.local_addr()?.port();
    info!(port = actual_port, "Status server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Build the axum router (separated for testing).
pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        consumer: "running",
    })
}

async fn metrics(State(state): State<StatusState>) -> Json<MetricsResponse> {
    let snapshot = state.metrics.snapshot();
    Json(MetricsResponse {
        received_messages: snapshot.received,
        processed_messages: snapshot.processed,
        errors: snapshot.errors,
        topics: state.topics.clone(),
    })
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found")
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    consumer: &'static str,
}

#[derive(Serialize)]
struct MetricsResponse {
    received_messages: u64,
    processed_messages: u64,
    errors: u64,
    topics: Vec<String>,
}
