use std::env;

use crate::models::AddonConfig;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub port: u16,

    // Fetching
    pub user_agent: String,
    pub fetch_timeout_ms: u64,
    pub max_retries: u32,

    // EPG
    pub timezone_name: String,
    pub epg_refresh_cron: String,

    // Catalog
    pub poll_interval_secs: u64,
    pub catalog_page_size: usize,

    // Resolved stream cache
    pub resolved_stream_ttl_ms: u64,
    pub resolved_stream_capacity: usize,

    /// Addon settings applied at startup, before any `POST /api/config`
    pub bootstrap: AddonConfig,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            port: env_or("PORT", 3001),

            // VLC user agent avoids IPTV server blocks
            user_agent: env::var("USER_AGENT")
                .unwrap_or_else(|_| "VLC/3.0.20 LibVLC/3.0.20".to_string()),
            fetch_timeout_ms: env_or("FETCH_TIMEOUT_MS", 100_000),
            max_retries: env_or("MAX_RETRIES", 3),

            timezone_name: env::var("TIMEZONE_NAME").unwrap_or_else(|_| "Europe/Rome".to_string()),
            epg_refresh_cron: env::var("EPG_REFRESH_CRON")
                .unwrap_or_else(|_| "0 0 3 * * *".to_string()),

            poll_interval_secs: env_or("POLL_INTERVAL_SECS", 60).max(1),
            catalog_page_size: env_or("CATALOG_PAGE_SIZE", 100).max(1),

            resolved_stream_ttl_ms: env_or("RESOLVED_STREAM_TTL_MS", 300_000), // 5 minutes
            resolved_stream_capacity: env_or("RESOLVED_STREAM_CAPACITY", 2048),

            bootstrap: AddonConfig {
                m3u: env_opt("M3U_URL"),
                epg_enabled: env_opt("EPG_ENABLED").map(|v| {
                    matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "on" | "yes")
                }),
                epg: env_opt("EPG_URL"),
                update_interval: env_opt("UPDATE_INTERVAL"),
                id_suffix: env_opt("ID_SUFFIX"),
                remapper_path: env_opt("REMAPPER_PATH"),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
