use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One playable URL of a channel plus the transport headers it needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDescriptor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

/// Live channel as produced by the playlist transformer.
/// Never mutated after the transformer hands it over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    /// Namespaced identifier, e.g. `tv|rai1`
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    pub streams: Vec<StreamDescriptor>,
    /// TV-guide identifier used to join with the EPG
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tvg_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_number: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub behavior_hints: BTreeMap<String, serde_json::Value>,
}

impl Channel {
    /// Identifier without its namespace prefix (`tv|rai1` -> `rai1`)
    pub fn bare_id(&self) -> &str {
        self.id
            .split_once('|')
            .map(|(_, rest)| rest)
            .unwrap_or(&self.id)
    }
}

/// Result of one successful playlist transformation
#[derive(Debug, Clone, Default)]
pub struct TransformOutput {
    pub channels: Vec<Channel>,
    pub genres: Vec<String>,
    pub epg_urls: Vec<String>,
}

/// Immutable point-in-time view of the catalog.
/// A new snapshot replaces the previous one wholesale.
#[derive(Debug, Clone)]
pub struct ChannelSnapshot {
    pub channels: Vec<Channel>,
    pub genres: Vec<String>,
    pub epg_urls: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ChannelSnapshot {
    pub fn from_output(output: TransformOutput, created_at: DateTime<Utc>) -> Self {
        Self {
            channels: output.channels,
            genres: output.genres,
            epg_urls: output.epg_urls,
            created_at,
        }
    }
}

/// Channels and genres handed to readers; empty when nothing is cached yet
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogView {
    pub channels: Vec<Channel>,
    pub genres: Vec<String>,
}

/// Kind of filter remembered between paginated catalog requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    Genre,
    Search,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastFilter {
    pub kind: FilterKind,
    pub value: String,
}

/// Observable summary of the channel cache
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatus {
    pub channels: usize,
    pub genres: usize,
    pub epg_urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    pub update_in_progress: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

/// Playable stream returned to clients after resolution
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedStream {
    pub name: String,
    pub title: String,
    pub url: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}
