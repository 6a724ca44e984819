use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;

use crate::models::{CacheStatus, EpgStatus};
use crate::AppState;

/// Root endpoint - basic status
pub async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "Live TV Guide Server",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

/// Health check response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    uptime: u64,
    catalog: CacheStatus,
    catalog_polling: bool,
    epg: EpgStatus,
    epg_available: bool,
    epg_needs_update: bool,
    resolved_streams: usize,
}

/// GET /health - Catalog and guide health
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let catalog = state.channels.status().await;
    let epg = state.epg.status();

    // Serving stale data still counts as degraded rather than down
    let status = match (catalog.channels > 0, epg.degraded) {
        (true, false) => "ok",
        (true, true) => "degraded",
        (false, _) => "starting",
    };

    Json(HealthResponse {
        status,
        uptime: state.start_time.elapsed().as_secs(),
        catalog,
        catalog_polling: state.channels.is_polling(),
        epg,
        epg_available: state.epg.is_available(),
        epg_needs_update: state.epg.needs_update(),
        resolved_streams: state.resolved_streams.len(),
    })
}

/// GET /metrics - Prometheus metrics
pub async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                b"Internal Server Error".to_vec(),
            )
        }
    }
}

/// Readiness probe: ready once a catalog snapshot is being served
pub async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.channels.snapshot().await.is_some() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready - catalog not loaded")
    }
}

/// Liveness probe
pub async fn live() -> impl IntoResponse {
    (StatusCode::OK, "alive")
}
