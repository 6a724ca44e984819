//! M3U playlist to channel catalog transformation
//!
//! `ChannelCache` only knows the `PlaylistTransformer` trait; `M3uTransformer`
//! is the default implementation. It streams the playlist line by line, so
//! large playlists are never held in memory as a whole.

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{Client, Response};
use sha1::{Digest, Sha1};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::time::sleep;
use tokio_stream::StreamExt;
use tokio_util::io::StreamReader;

use crate::models::{AddonConfig, Channel, StreamDescriptor, TransformOutput};
use crate::services::normalize::normalize_loose;

// Limits for streamed parsing
const MAX_LINE_BYTES: usize = 32 * 1024;
const READ_LINE_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_GENRE: &str = "Other";

lazy_static! {
    /// Collapse runs of whitespace
    static ref MULTI_SPACE_REGEX: Regex = Regex::new(r"\s{2,}").unwrap();
    /// `key="value"` attributes of `#EXTM3U` and `#EXTINF` lines
    static ref ATTR_REGEX: Regex = Regex::new(r#"(\w+(?:-\w+)*)="([^"]*)""#).unwrap();
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("playlist request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("{0}")]
    Status(String),
    #[error("reading playlist failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("timed out while reading playlist line")]
    ReadTimeout,
    #[error("playlist line exceeds max length of {0} bytes")]
    LineTooLong(usize),
    #[error("invalid playlist: missing #EXTM3U header")]
    MissingHeader,
    #[error("playlist contains no channels")]
    Empty,
}

/// Turns a playlist source into channels, genres and discovered EPG URLs
#[async_trait]
pub trait PlaylistTransformer: Send + Sync {
    async fn load_and_transform(
        &self,
        source_url: &str,
        config: &AddonConfig,
    ) -> Result<TransformOutput, TransformError>;
}

#[derive(Debug, Default)]
struct ExtinfData {
    attributes: HashMap<String, String>,
    title: String,
}

impl ExtinfData {
    /// Trimmed, non-empty attribute value
    fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// `#EXTINF:duration key="value" ...,Title`. The duration is ignored; live
/// entries always carry -1.
fn parse_extinf(line: &str) -> Option<ExtinfData> {
    let content = line.strip_prefix("#EXTINF:")?;

    // Quoted attribute values may contain commas; the title starts after the
    // first comma that is outside quotes
    let mut in_quotes = false;
    let split = content.char_indices().find(|&(_, c)| {
        if c == '"' {
            in_quotes = !in_quotes;
        }
        c == ',' && !in_quotes
    })?;

    let header = &content[..split.0];
    let title = content[split.0 + 1..].trim().to_string();

    Some(ExtinfData {
        attributes: parse_attributes(header),
        title,
    })
}

fn parse_attributes(text: &str) -> HashMap<String, String> {
    ATTR_REGEX
        .captures_iter(text)
        .filter_map(|caps| {
            let key = caps.get(1)?.as_str().to_ascii_lowercase();
            let value = caps.get(2)?.as_str().to_string();
            Some((key, value))
        })
        .collect()
}

/// SHA1 of a URL as lowercase hex
pub fn hash_url(url: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Trim and collapse inner whitespace
fn normalize_text(text: &str) -> String {
    MULTI_SPACE_REGEX.replace_all(text.trim(), " ").to_string()
}

/// Append `.suffix` unless the id already ends with it
fn with_suffix(id: &str, suffix: Option<&str>) -> String {
    let Some(suffix) = suffix.map(|s| s.trim().trim_start_matches('.')).filter(|s| !s.is_empty()) else {
        return id.to_string();
    };
    let dotted = format!(".{}", suffix.to_lowercase());
    if id.to_lowercase().ends_with(&dotted) {
        id.to_string()
    } else {
        format!("{id}.{suffix}")
    }
}

/// Parse `source=target` remap lines; keys are loosely normalized
pub fn parse_remap(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (source, target) = line.split_once('=')?;
            let (source, target) = (normalize_loose(source), target.trim());
            (!source.is_empty() && !target.is_empty()).then(|| (source, target.to_string()))
        })
        .collect()
}

async fn load_remap(path: &str) -> HashMap<String, String> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => {
            let remap = parse_remap(&content);
            tracing::info!("Loaded {} tvg-id remap rules from {}", remap.len(), path);
            remap
        }
        Err(e) => {
            tracing::warn!("Could not read remap file {}: {}", path, e);
            HashMap::new()
        }
    }
}

/// Incremental playlist parser. Feed it lines, then `finish`.
pub struct PlaylistBuilder {
    id_suffix: Option<String>,
    remap: HashMap<String, String>,
    found_header: bool,
    pending: Option<ExtinfData>,
    pending_headers: BTreeMap<String, String>,
    pending_group: Option<String>,
    channels: Vec<Channel>,
    /// Channel identity (loose tvg-id or name) -> position in `channels`
    index: HashMap<String, usize>,
    genres: Vec<String>,
    seen_genres: HashSet<String>,
    epg_urls: Vec<String>,
    duplicates_skipped: usize,
}

impl PlaylistBuilder {
    pub fn new(id_suffix: Option<String>, remap: HashMap<String, String>) -> Self {
        Self {
            id_suffix,
            remap,
            found_header: false,
            pending: None,
            pending_headers: BTreeMap::new(),
            pending_group: None,
            channels: Vec::new(),
            index: HashMap::new(),
            genres: Vec::new(),
            seen_genres: HashSet::new(),
            epg_urls: Vec::new(),
            duplicates_skipped: 0,
        }
    }

    pub fn push_line(&mut self, line: &str) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }

        if trimmed.starts_with("#EXTM3U") {
            self.found_header = true;
            let attributes = parse_attributes(trimmed);
            for key in ["url-tvg", "x-tvg-url"] {
                let Some(value) = attributes.get(key) else { continue };
                for url in value.split(',').map(str::trim).filter(|u| !u.is_empty()) {
                    if !self.epg_urls.iter().any(|known| known == url) {
                        self.epg_urls.push(url.to_string());
                    }
                }
            }
            return;
        }

        if trimmed.starts_with("#EXTINF:") {
            self.pending = parse_extinf(trimmed);
            self.pending_headers.clear();
            self.pending_group = None;
            return;
        }

        if let Some(option) = trimmed.strip_prefix("#EXTVLCOPT:") {
            if let Some((key, value)) = option.split_once('=') {
                let header = match key.trim().to_ascii_lowercase().as_str() {
                    "http-user-agent" => Some("User-Agent"),
                    "http-referrer" | "http-referer" => Some("Referer"),
                    "http-origin" => Some("Origin"),
                    _ => None,
                };
                if let Some(header) = header {
                    self.pending_headers
                        .insert(header.to_string(), value.trim().to_string());
                }
            }
            return;
        }

        if let Some(group) = trimmed.strip_prefix("#EXTGRP:") {
            self.pending_group = Some(group.trim().to_string());
            return;
        }

        if trimmed.starts_with('#') {
            return;
        }

        if let Some(extinf) = self.pending.take() {
            self.add_entry(extinf, trimmed);
        }
    }

    fn tvg_id(&self, raw: &str) -> String {
        let remapped = self
            .remap
            .get(&normalize_loose(raw))
            .map(String::as_str)
            .unwrap_or(raw);
        with_suffix(remapped, self.id_suffix.as_deref())
    }

    fn add_entry(&mut self, extinf: ExtinfData, url: &str) {
        let title = normalize_text(&extinf.title);
        let name = if title.is_empty() {
            extinf.attr("tvg-name").map(normalize_text).unwrap_or_else(|| url.to_string())
        } else {
            title
        };

        let tvg_id = extinf.attr("tvg-id").map(|raw| self.tvg_id(raw));
        let logo = extinf.attr("tvg-logo").map(String::from);
        let channel_number = extinf.attr("tvg-chno").map(String::from);

        let group = extinf.attr("group-title")
            .map(String::from)
            .or_else(|| self.pending_group.take());
        let mut genres: Vec<String> = group
            .as_deref()
            .unwrap_or(DEFAULT_GENRE)
            .split(';')
            .map(normalize_text)
            .filter(|g| !g.is_empty())
            .collect();
        if genres.is_empty() {
            genres.push(DEFAULT_GENRE.to_string());
        }

        for genre in &genres {
            if self.seen_genres.insert(genre.clone()) {
                self.genres.push(genre.clone());
            }
        }

        let stream = StreamDescriptor {
            name: Some(name.clone()),
            url: url.to_string(),
            headers: std::mem::take(&mut self.pending_headers),
        };

        let identity = normalize_loose(tvg_id.as_deref().unwrap_or(&name));
        let identity = if identity.is_empty() {
            format!("ch_{}", &hash_url(url)[..12])
        } else {
            identity
        };

        if let Some(&position) = self.index.get(&identity) {
            let channel = &mut self.channels[position];
            if channel.streams.iter().any(|s| s.url == stream.url) {
                self.duplicates_skipped += 1;
                return;
            }
            channel.streams.push(stream);
            for genre in genres {
                if !channel.genres.contains(&genre) {
                    channel.genres.push(genre);
                }
            }
            if channel.logo.is_none() {
                channel.poster = logo.clone();
                channel.logo = logo;
            }
            return;
        }

        let id = match tvg_id.as_deref() {
            Some(tvg_id) => format!("tv|{tvg_id}"),
            None => format!("tv|{identity}"),
        };

        let mut behavior_hints = BTreeMap::new();
        behavior_hints.insert("isLive".to_string(), serde_json::Value::Bool(true));

        self.index.insert(identity, self.channels.len());
        self.channels.push(Channel {
            id,
            name,
            genres,
            poster: logo.clone(),
            logo,
            background: None,
            streams: vec![stream],
            tvg_id,
            channel_number,
            behavior_hints,
        });
    }

    pub fn finish(self) -> Result<TransformOutput, TransformError> {
        if !self.found_header {
            return Err(TransformError::MissingHeader);
        }
        if self.channels.is_empty() {
            return Err(TransformError::Empty);
        }

        if self.duplicates_skipped > 0 {
            tracing::info!("Skipped {} duplicate stream URLs", self.duplicates_skipped);
        }

        Ok(TransformOutput {
            channels: self.channels,
            genres: self.genres,
            epg_urls: self.epg_urls,
        })
    }
}

/// Drive a `PlaylistBuilder` from a buffered reader
pub async fn read_playlist<R>(mut reader: R, mut builder: PlaylistBuilder) -> Result<TransformOutput, TransformError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();

    loop {
        line.clear();

        let bytes_read = tokio::time::timeout(READ_LINE_TIMEOUT, reader.read_line(&mut line))
            .await
            .map_err(|_| TransformError::ReadTimeout)??;

        if bytes_read == 0 {
            break;
        }
        if line.len() > MAX_LINE_BYTES {
            return Err(TransformError::LineTooLong(MAX_LINE_BYTES));
        }

        builder.push_line(&line);
    }

    builder.finish()
}

/// Default transformer: fetches an M3U playlist over HTTP
pub struct M3uTransformer {
    client: Client,
    max_retries: u32,
}

impl M3uTransformer {
    pub fn new(user_agent: &str, timeout_ms: u64, max_retries: u32) -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_millis(timeout_ms))
            .gzip(true)
            .build()
            .context("Failed to create playlist HTTP client")?;

        Ok(Self { client, max_retries })
    }

    async fn fetch_with_retry(&self, url: &str) -> Result<Response, TransformError> {
        let mut attempt = 0;

        loop {
            let backoff = Duration::from_millis((1u64 << attempt).saturating_mul(500).min(10_000));

            match self.client.get(url).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => {
                    let status = resp.status();
                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS && attempt < self.max_retries {
                        tracing::warn!("fetch_retry" = attempt + 1, "reason" = "429", "backoff_ms" = backoff.as_millis() as u64);
                        sleep(backoff).await;
                        attempt += 1;
                        continue;
                    }

                    let message = match status {
                        reqwest::StatusCode::NOT_FOUND => "Playlist not found (404). Check the URL.".to_string(),
                        reqwest::StatusCode::FORBIDDEN => "Access denied (403). The playlist may require authentication.".to_string(),
                        reqwest::StatusCode::TOO_MANY_REQUESTS => "Too many requests (429). The playlist server is rate limiting.".to_string(),
                        _ => format!(
                            "HTTP {}: {}",
                            status.as_u16(),
                            status.canonical_reason().unwrap_or("Error")
                        ),
                    };
                    return Err(TransformError::Status(message));
                }
                Err(err) if attempt < self.max_retries => {
                    tracing::warn!("fetch_retry" = attempt + 1, "reason" = "network", "backoff_ms" = backoff.as_millis() as u64, "error" = %err);
                    sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

#[async_trait]
impl PlaylistTransformer for M3uTransformer {
    async fn load_and_transform(
        &self,
        source_url: &str,
        config: &AddonConfig,
    ) -> Result<TransformOutput, TransformError> {
        let remap = match config.remapper_path.as_deref() {
            Some(path) if !path.trim().is_empty() => load_remap(path.trim()).await,
            _ => HashMap::new(),
        };

        tracing::info!("Loading playlist: {}", source_url);
        let response = self.fetch_with_retry(source_url).await?;
        if let Some(len) = response.content_length() {
            tracing::info!("Playlist size: {:.2} MB", len as f64 / 1024.0 / 1024.0);
        }

        let stream_reader = StreamReader::new(
            response
                .bytes_stream()
                .map(|result| result.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))),
        );

        let builder = PlaylistBuilder::new(config.id_suffix.clone(), remap);
        let output = read_playlist(BufReader::new(stream_reader), builder).await?;

        tracing::info!(
            channels = output.channels.len(),
            genres = output.genres.len(),
            epg_urls = output.epg_urls.len(),
            "Playlist transformed"
        );
        Ok(output)
    }
}
