use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::models::{EpgStatus, ProgramView};
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelGuideResponse {
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub current: Option<ProgramView>,
    pub upcoming: Vec<ProgramView>,
}

/// GET /api/epg/status - Guide ingestion summary
pub async fn status(State(state): State<Arc<AppState>>) -> Json<EpgStatus> {
    Json(state.epg.status())
}

/// GET /api/epg/:channel - Current and upcoming programmes of one channel.
/// Accepts a TV-guide id or anything that identifies a catalog channel.
pub async fn channel_guide(
    State(state): State<Arc<AppState>>,
    Path(channel): Path<String>,
) -> Result<Json<ChannelGuideResponse>, (StatusCode, Json<serde_json::Value>)> {
    let guide_id = match state.channels.get_channel(&channel).await {
        Some(found) => found.tvg_id.unwrap_or(channel),
        None => channel,
    };

    let response = ChannelGuideResponse {
        icon: state.epg.channel_icon(&guide_id),
        current: state.epg.current_program(&guide_id),
        upcoming: state.epg.upcoming_programs(&guide_id),
        channel: guide_id,
    };

    if response.icon.is_none() && response.current.is_none() && response.upcoming.is_empty() {
        return Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "No guide data for channel" })),
        ));
    }

    Ok(Json(response))
}
