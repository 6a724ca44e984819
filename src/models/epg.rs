use chrono::{DateTime, Utc};
use serde::Serialize;

/// One scheduled programme. `start..=stop` is the airing window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramGuideEntry {
    /// Dotted-normalized channel key
    pub channel: String,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    pub title: String,
    pub description: String,
    pub category: String,
}

impl ProgramGuideEntry {
    pub fn is_airing_at(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now <= self.stop
    }
}

/// Programme as presented to clients, with times rendered in the display zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramView {
    pub title: String,
    pub description: String,
    pub category: String,
    pub start: String,
    pub stop: String,
}

/// Ingestion summary returned by `EpgIngestor::status`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EpgStatus {
    pub is_updating: bool,
    pub last_refresh: String,
    pub channels_count: usize,
    pub icons_count: usize,
    pub programs_count: usize,
    pub timezone: String,
    pub sources_total: usize,
    pub sources_failed: usize,
    pub parse_errors: usize,
    pub dropped_programmes: usize,
    pub degraded: bool,
}
