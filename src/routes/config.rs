use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::models::AddonConfig;
use crate::services::epg::SourceInput;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResponse {
    pub status: &'static str,
    pub source_changed: bool,
    pub epg_changed: bool,
    pub settings_changed: bool,
    pub config: AddonConfig,
}

/// Where the guide should come from: the configured EPG URL, else the
/// URLs advertised in the playlist header.
pub fn epg_source(config: &AddonConfig, advertised: &[String]) -> Option<SourceInput> {
    match config.epg.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        Some(raw) => Some(SourceInput::from(raw)),
        None if !advertised.is_empty() => Some(SourceInput::Raw(advertised.join(","))),
        None => None,
    }
}

/// Bring the guide in line with the current configuration. No-op when the
/// guide is disabled or the same source is already loaded.
pub async fn sync_epg(state: &AppState) {
    let config = state.channels.current_config().await;
    if !config.epg_enabled() {
        return;
    }

    let advertised = state.channels.status().await.epg_urls;
    match epg_source(&config, &advertised) {
        Some(source) => state.epg.initialize(source).await,
        None => tracing::info!("EPG enabled but no guide source is configured or advertised"),
    }
}

/// POST /api/config - Apply addon settings
pub async fn apply_config(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AddonConfig>,
) -> Result<Json<ConfigResponse>, (StatusCode, Json<serde_json::Value>)> {
    if let Some(url) = payload.m3u.as_deref() {
        if !url.trim().starts_with("http") {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": "Invalid playlist URL" })),
            ));
        }
    }

    let changes = state.channels.apply_configuration(&payload).await;
    let config = state.channels.current_config().await;

    // Catalog-driven guide loads happen when the rebuild announces itself
    if changes.epg && config.epg_enabled() {
        let state = state.clone();
        tokio::spawn(async move {
            sync_epg(&state).await;
        });
    }

    Ok(Json(ConfigResponse {
        status: "ok",
        source_changed: changes.source,
        epg_changed: changes.epg,
        settings_changed: changes.other,
        config,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epg_source_prefers_configured_url() {
        let advertised = vec!["http://a/guide.xml".to_string(), "http://b/guide.xml.gz".to_string()];

        let configured = AddonConfig {
            epg: Some(" http://mine/epg.xml ".into()),
            ..Default::default()
        };
        assert_eq!(
            epg_source(&configured, &advertised),
            Some(SourceInput::Raw("http://mine/epg.xml".into()))
        );

        assert_eq!(
            epg_source(&AddonConfig::default(), &advertised),
            Some(SourceInput::Raw("http://a/guide.xml,http://b/guide.xml.gz".into()))
        );
        assert_eq!(epg_source(&AddonConfig::default(), &[]), None);
    }
}
