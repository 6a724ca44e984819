use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::models::ResolvedStream;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct StreamsResponse {
    pub streams: Vec<ResolvedStream>,
    pub cached: bool,
}

/// GET /api/channels/:id/streams - Playable streams of one channel.
/// Resolved streams are memoised per channel for a few minutes.
pub async fn get_streams(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StreamsResponse>, (StatusCode, Json<serde_json::Value>)> {
    let Some(channel) = state.channels.get_channel(&id).await else {
        tracing::info!("Channel not found: {}", id);
        return Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "Channel not found" })),
        ));
    };

    if let Some(streams) = state.resolved_streams.get(&channel.id) {
        return Ok(Json(StreamsResponse {
            streams,
            cached: true,
        }));
    }

    match state.resolver.resolve(&channel).await {
        Ok(streams) => {
            if !streams.is_empty() {
                state.resolved_streams.set(&channel.id, streams.clone());
            }
            tracing::info!("Resolved {} streams for {}", streams.len(), channel.name);
            Ok(Json(StreamsResponse {
                streams,
                cached: false,
            }))
        }
        Err(e) => {
            tracing::error!("Stream resolution for {} failed: {:#}", channel.id, e);
            Err((
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({ "error": "Failed to resolve streams" })),
            ))
        }
    }
}
