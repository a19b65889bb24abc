//! Probe and metrics endpoints
//!
//! `/healthz` backs the liveness probe, `/readyz` the readiness probe and
//! `/metrics` is scraped by Prometheus.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use orchestrator_lib::{health::HealthRegistry, observability::OrchestratorMetrics};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

/// State shared by the handlers
#[derive(Clone)]
pub struct AppState {
    pub health: HealthRegistry,
    /// Held so the orchestrator metric families are registered before the
    /// first scrape
    pub metrics: OrchestratorMetrics,
}

impl AppState {
    pub fn new(health: HealthRegistry, metrics: OrchestratorMetrics) -> Self {
        Self { health, metrics }
    }
}

fn probe_status(passing: bool) -> StatusCode {
    if passing {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn healthz(State(state): State<Arc<AppState>>) -> Response {
    let health = state.health.health().await;
    (probe_status(health.status.is_operational()), Json(health)).into_response()
}

async fn readyz(State(state): State<Arc<AppState>>) -> Response {
    let readiness = state.health.readiness().await;
    (probe_status(readiness.ready), Json(readiness)).into_response()
}

async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let mut body = Vec::new();

    if let Err(e) = encoder.encode(&prometheus::gather(), &mut body) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        body,
    )
        .into_response()
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the endpoints on `0.0.0.0:<port>` until shutdown is broadcast
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Serving probes and metrics");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}
