use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;

use crate::models::{Channel, FilterKind, ProgramView};
use crate::services::epg::EpgIngestor;
use crate::AppState;

/// Query parameters of `GET /api/catalog`
#[derive(Debug, Default, Deserialize)]
pub struct CatalogQuery {
    pub search: Option<String>,
    pub genre: Option<String>,
    pub skip: Option<String>,
}

impl CatalogQuery {
    /// Split into `(search, genre, skip)`. Some clients glue the offset onto
    /// the genre value (`Sport&skip=100`); that form is accepted too.
    fn normalized(self) -> (Option<String>, Option<String>, usize) {
        let mut skip = self
            .skip
            .as_deref()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0);

        let genre = self.genre.map(|genre| match genre.split_once("&skip") {
            Some((name, rest)) => {
                if let Some(value) = rest.strip_prefix('=') {
                    skip = value.trim().parse().unwrap_or(0);
                }
                name.to_string()
            }
            None => genre,
        });

        let present = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
        (present(self.search), present(genre), skip)
    }
}

/// Channel as listed in the catalog, enriched with guide data
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: String,
    pub genres: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    pub description: String,
    pub release_info: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tvg_id: Option<String>,
    pub behavior_hints: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<ProgramView>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub upcoming: Vec<ProgramView>,
}

#[derive(Debug, Default, Serialize)]
pub struct CatalogResponse {
    pub metas: Vec<CatalogEntry>,
    pub genres: Vec<String>,
    pub skip: usize,
    pub total: usize,
}

#[derive(Debug, Default, Serialize)]
pub struct NowPlayingResponse {
    pub metas: Vec<CatalogEntry>,
}

fn describe(current: &ProgramView, upcoming: &[ProgramView]) -> String {
    let mut text = format!("ON AIR NOW:\n{}", current.title);
    if !current.description.is_empty() {
        let _ = write!(text, "\n{}", current.description);
    }
    let _ = write!(text, "\nTime: {} - {}", current.start, current.stop);
    if !current.category.is_empty() {
        let _ = write!(text, "\nCategory: {}", current.category);
    }
    if !upcoming.is_empty() {
        text.push_str("\n\nUP NEXT:");
        for program in upcoming {
            let _ = write!(text, "\n{} - {}", program.start, program.title);
        }
    }
    text
}

fn build_entry(channel: &Channel, epg: &EpgIngestor, with_guide: bool, now: DateTime<Utc>) -> CatalogEntry {
    let name = match channel.channel_number.as_deref() {
        Some(number) => format!("{}. {}", number, channel.name),
        None => channel.name.clone(),
    };

    let mut behavior_hints = BTreeMap::new();
    behavior_hints.insert("isLive".to_string(), serde_json::Value::Bool(true));
    behavior_hints.extend(channel.behavior_hints.clone());

    let mut entry = CatalogEntry {
        id: channel.id.clone(),
        kind: "tv",
        name,
        genres: channel.genres.clone(),
        poster: channel.poster.clone(),
        logo: channel.logo.clone(),
        background: channel.background.clone(),
        description: format!("Live channel: {}", channel.name),
        release_info: "LIVE".to_string(),
        tvg_id: channel.tvg_id.clone(),
        behavior_hints,
        current: None,
        upcoming: Vec::new(),
    };

    let Some(tvg_id) = channel.tvg_id.as_deref() else {
        return entry;
    };

    // Guide icon fills whatever artwork the playlist left out
    if entry.poster.is_none() || entry.logo.is_none() || entry.background.is_none() {
        if let Some(icon) = epg.channel_icon(tvg_id) {
            entry.poster.get_or_insert_with(|| icon.clone());
            entry.logo.get_or_insert_with(|| icon.clone());
            entry.background.get_or_insert(icon);
        }
    }

    if with_guide {
        entry.current = epg.current_program_at(tvg_id, now);
        entry.upcoming = epg.upcoming_programs_at(tvg_id, now);
        if let Some(current) = &entry.current {
            entry.description = describe(current, &entry.upcoming);
            entry.release_info = format!("On air: {}", current.title);
        }
    }

    entry
}

/// GET /api/catalog - One page of the (filtered) channel catalog
pub async fn get_catalog(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CatalogQuery>,
) -> Json<CatalogResponse> {
    let config = state.channels.current_config().await;
    if config.m3u.is_none() {
        tracing::info!("Catalog requested before a playlist source was configured");
        return Json(CatalogResponse::default());
    }

    let (search, genre, skip) = query.normalized();

    // A bare page request keeps paging through the remembered filter
    match (search, genre) {
        (Some(search), _) => state.channels.set_last_filter(FilterKind::Search, search).await,
        (None, Some(genre)) => state.channels.set_last_filter(FilterKind::Genre, genre).await,
        (None, None) if skip == 0 => state.channels.clear_last_filter().await,
        (None, None) => {}
    }

    let channels = state.channels.get_filtered_channels().await;
    let genres = state
        .channels
        .snapshot()
        .await
        .map(|snapshot| snapshot.genres.clone())
        .unwrap_or_default();

    let now = Utc::now();
    let metas = channels
        .iter()
        .skip(skip)
        .take(state.config.catalog_page_size)
        .map(|channel| build_entry(channel, &state.epg, config.epg_enabled(), now))
        .collect();

    Json(CatalogResponse {
        metas,
        genres,
        skip,
        total: channels.len(),
    })
}

/// GET /api/catalog/now-playing - Channels with a programme on air right now
pub async fn now_playing(State(state): State<Arc<AppState>>) -> Json<NowPlayingResponse> {
    let catalog = state.channels.get_snapshot().await;

    let now = Utc::now();
    let metas: Vec<CatalogEntry> = catalog
        .channels
        .iter()
        .filter_map(|channel| {
            let program = state.epg.current_program_at(channel.tvg_id.as_deref()?, now)?;

            let mut entry = build_entry(channel, &state.epg, true, now);
            entry.name = format!("[LIVE] {}", channel.name);
            entry.poster = entry.logo.clone().or(entry.poster);
            entry.release_info = format!("{} - {}", program.start, program.stop);
            entry.description = if program.description.is_empty() {
                program.title.clone()
            } else {
                format!("{}\n{}", program.title, program.description)
            };
            Some(entry)
        })
        .collect();

    tracing::info!("{} channels on air now", metas.len());
    Json(NowPlayingResponse { metas })
}
