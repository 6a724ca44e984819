pub mod catalog;
pub mod config;
pub mod epg;
pub mod health;
pub mod streams;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::AppState;

/// Every endpoint, without middleware or state attached
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Health endpoints
        .route("/", get(health::root))
        .route("/health", get(health::health_check))
        .route("/metrics", get(health::metrics))
        .route("/ready", get(health::ready))
        .route("/live", get(health::live))
        // Addon settings
        .route("/api/config", post(config::apply_config))
        // Catalog
        .route("/api/catalog", get(catalog::get_catalog))
        .route("/api/catalog/now-playing", get(catalog::now_playing))
        .route("/api/channels/:id/streams", get(streams::get_streams))
        // Guide
        .route("/api/epg/status", get(epg::status))
        .route("/api/epg/:channel", get(epg::channel_guide))
}
