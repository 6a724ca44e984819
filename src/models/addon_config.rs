use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

lazy_static! {
    /// `H:MM` or `HH:MM`
    static ref INTERVAL_REGEX: Regex = Regex::new(r"^(\d{1,2}):(\d{2})$").unwrap();
}

/// Accept `true`/`false` as JSON booleans or as strings
fn deserialize_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Bool(b)) => Ok(Some(b)),
        Some(serde_json::Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "on" => Ok(Some(true)),
            "false" | "0" | "off" | "" => Ok(Some(false)),
            other => Err(D::Error::custom(format!("invalid flag value: {other}"))),
        },
        Some(_) => Err(D::Error::custom("expected boolean or string")),
    }
}

/// User-facing addon settings. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonConfig {
    /// Playlist source URL
    #[serde(default)]
    pub m3u: Option<String>,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub epg_enabled: Option<bool>,
    /// EPG URL, comma-separated URLs, or a URL of a list of URLs
    #[serde(default)]
    pub epg: Option<String>,
    /// Catalog freshness window as `HH:MM`
    #[serde(default)]
    pub update_interval: Option<String>,
    #[serde(default)]
    pub id_suffix: Option<String>,
    #[serde(default)]
    pub remapper_path: Option<String>,
}

/// Which independent axes differ between two configurations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigChanges {
    pub source: bool,
    pub epg: bool,
    pub other: bool,
}

impl AddonConfig {
    /// Field-wise overlay: values present in `incoming` win
    pub fn merged_with(&self, incoming: &AddonConfig) -> AddonConfig {
        AddonConfig {
            m3u: incoming.m3u.clone().or_else(|| self.m3u.clone()),
            epg_enabled: incoming.epg_enabled.or(self.epg_enabled),
            epg: incoming.epg.clone().or_else(|| self.epg.clone()),
            update_interval: incoming
                .update_interval
                .clone()
                .or_else(|| self.update_interval.clone()),
            id_suffix: incoming.id_suffix.clone().or_else(|| self.id_suffix.clone()),
            remapper_path: incoming
                .remapper_path
                .clone()
                .or_else(|| self.remapper_path.clone()),
        }
    }

    pub fn changes_to(&self, next: &AddonConfig) -> ConfigChanges {
        ConfigChanges {
            source: self.m3u != next.m3u,
            epg: self.epg_enabled != next.epg_enabled || self.epg != next.epg,
            other: self.update_interval != next.update_interval
                || self.id_suffix != next.id_suffix
                || self.remapper_path != next.remapper_path,
        }
    }

    pub fn epg_enabled(&self) -> bool {
        self.epg_enabled.unwrap_or(false)
    }
}

/// Parse an `HH:MM` interval with 0 <= H < 24 and 0 <= M < 60
pub fn parse_update_interval(value: &str) -> Option<Duration> {
    let caps = INTERVAL_REGEX.captures(value.trim())?;
    let hours: u64 = caps.get(1)?.as_str().parse().ok()?;
    let minutes: u64 = caps.get(2)?.as_str().parse().ok()?;

    if hours < 24 && minutes < 60 {
        Some(Duration::from_secs(hours * 3600 + minutes * 60))
    } else {
        None
    }
}
