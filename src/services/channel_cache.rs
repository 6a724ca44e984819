//! Channel catalog cache
//!
//! Holds the last known-good snapshot and refreshes it in the background.
//! A rebuild builds a complete snapshot off to the side and swaps the `Arc`
//! in one write, so readers never see a partial catalog and a failed
//! rebuild leaves the old one in place.

use chrono::{DateTime, Utc};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;

use crate::models::{
    parse_update_interval, AddonConfig, CacheStatus, CatalogView, Channel, ChannelSnapshot,
    ConfigChanges, FilterKind, LastFilter,
};
use crate::services::guard::InProgressGuard;
use crate::services::metrics;
use crate::services::normalize::{normalize_loose, normalize_loose_without_suffix};
use crate::services::scheduler;
use crate::services::transformer::PlaylistTransformer;

/// Freshness window when no valid `update_interval` is configured
pub const DEFAULT_FRESHNESS: Duration = Duration::from_secs(12 * 3600);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
const EVENT_CAPACITY: usize = 16;

/// Notifications for the serving layer
#[derive(Debug, Clone)]
pub enum CacheEvent {
    Updated(CacheStatus),
    RebuildFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildOutcome {
    Updated,
    Failed,
    /// Another rebuild was already running
    Skipped,
}

#[derive(Debug, Default)]
struct CacheState {
    snapshot: Option<Arc<ChannelSnapshot>>,
    last_updated: Option<DateTime<Utc>>,
    source_url: Option<String>,
    config: AddonConfig,
    last_filter: Option<LastFilter>,
}

struct CacheInner {
    transformer: Arc<dyn PlaylistTransformer>,
    state: RwLock<CacheState>,
    update_in_progress: AtomicBool,
    events: broadcast::Sender<CacheEvent>,
    poller: Mutex<Option<JoinHandle<()>>>,
    poll_interval: Duration,
}

impl Drop for CacheInner {
    fn drop(&mut self) {
        let slot = self.poller.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }
}

/// Window after which a snapshot is stale. Invalid intervals are logged
/// and replaced by the default.
pub fn freshness_window(config: &AddonConfig) -> Duration {
    match config.update_interval.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        None => DEFAULT_FRESHNESS,
        Some(value) => parse_update_interval(value).unwrap_or_else(|| {
            tracing::warn!(
                "Invalid update interval '{}', using default of {}h",
                value,
                DEFAULT_FRESHNESS.as_secs() / 3600
            );
            DEFAULT_FRESHNESS
        }),
    }
}

/// Look a channel up by raw id (namespace stripped), tvg-id or display name,
/// all loosely normalized. When nothing matches and a suffix is configured,
/// retries with the suffix removed on both sides.
pub fn find_channel<'a>(channels: &'a [Channel], id: &str, suffix: Option<&str>) -> Option<&'a Channel> {
    let requested = id.split_once('|').map(|(_, rest)| rest).unwrap_or(id);

    let lookup = |normalize: &dyn Fn(&str) -> String| -> Option<&'a Channel> {
        let wanted = normalize(requested);
        if wanted.is_empty() {
            return None;
        }
        channels.iter().find(|c| {
            normalize(c.bare_id()) == wanted
                || c.tvg_id.as_deref().map(|t| normalize(t) == wanted).unwrap_or(false)
                || normalize(&c.name) == wanted
        })
    };

    lookup(&normalize_loose).or_else(|| {
        suffix
            .filter(|s| !normalize_loose(s).is_empty())
            .and_then(|s| lookup(&|value: &str| normalize_loose_without_suffix(value, Some(s))))
    })
}

/// Case-insensitive exact match against any genre
pub fn filter_by_genre(channels: &[Channel], genre: &str) -> Vec<Channel> {
    let wanted = genre.trim().to_lowercase();
    if wanted.is_empty() {
        return Vec::new();
    }
    channels
        .iter()
        .filter(|c| c.genres.iter().any(|g| g.to_lowercase() == wanted))
        .cloned()
        .collect()
}

/// Loose substring match on display names; an empty query matches everything
pub fn search(channels: &[Channel], query: &str) -> Vec<Channel> {
    if query.trim().is_empty() {
        return channels.to_vec();
    }
    let wanted = normalize_loose(query);
    channels
        .iter()
        .filter(|c| normalize_loose(&c.name).contains(&wanted))
        .cloned()
        .collect()
}

/// Shared catalog cache. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ChannelCache {
    inner: Arc<CacheInner>,
}

impl ChannelCache {
    pub fn new(transformer: Arc<dyn PlaylistTransformer>, poll_interval: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(CacheInner {
                transformer,
                state: RwLock::new(CacheState::default()),
                update_in_progress: AtomicBool::new(false),
                events,
                poller: Mutex::new(None),
                poll_interval,
            }),
        }
    }

    fn poller(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner.poller.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forget everything: no snapshot, no source, no filter
    pub async fn initialize(&self) {
        *self.inner.state.write().await = CacheState::default();
        tracing::info!("Channel cache initialized");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    /// Merge `incoming` into the current configuration and act on what
    /// changed. A new source triggers a background rebuild that keeps serving
    /// the old snapshot until it succeeds.
    pub async fn apply_configuration(&self, incoming: &AddonConfig) -> ConfigChanges {
        let (merged, changes) = {
            let mut state = self.inner.state.write().await;
            let merged = state.config.merged_with(incoming);
            let changes = state.config.changes_to(&merged);
            state.config = merged.clone();
            (merged, changes)
        };

        if changes.source {
            if let Some(url) = merged.m3u.clone() {
                tracing::info!("Playlist source changed, rebuilding from {}", url);
                let cache = self.clone();
                tokio::spawn(async move {
                    cache.rebuild(&url, None).await;
                });
            }
        }

        if changes.epg {
            tracing::info!("EPG settings changed (enabled: {})", merged.epg_enabled());
        }

        if changes.other {
            tracing::info!(
                "Catalog settings changed (interval: {:?}, suffix: {:?}), restarting poll",
                merged.update_interval,
                merged.id_suffix
            );
            self.start_polling();
        } else if !self.is_polling() {
            self.start_polling();
        }

        changes
    }

    /// Rebuild the snapshot from `source_url`. At most one rebuild runs at a
    /// time; failures are logged and announced, never returned.
    pub async fn rebuild(&self, source_url: &str, config: Option<&AddonConfig>) -> RebuildOutcome {
        let Some(_guard) = InProgressGuard::try_acquire(&self.inner.update_in_progress) else {
            tracing::info!("Catalog rebuild already in progress, skipping");
            metrics::CATALOG_REBUILDS.with_label_values(&["skipped"]).inc();
            return RebuildOutcome::Skipped;
        };

        let config = {
            let mut state = self.inner.state.write().await;
            if let Some(config) = config {
                state.config = state.config.merged_with(config);
            }
            state.config.clone()
        };

        let started = std::time::Instant::now();
        match self.inner.transformer.load_and_transform(source_url, &config).await {
            Ok(output) => {
                let snapshot = Arc::new(ChannelSnapshot::from_output(output, Utc::now()));
                let (channels, genres) = (snapshot.channels.len(), snapshot.genres.len());
                {
                    let mut state = self.inner.state.write().await;
                    state.last_updated = Some(snapshot.created_at);
                    state.snapshot = Some(snapshot);
                    state.source_url = Some(source_url.to_string());
                }

                metrics::CATALOG_REBUILDS.with_label_values(&["ok"]).inc();
                metrics::CATALOG_CHANNELS.set(channels as i64);
                tracing::info!(
                    channels,
                    genres,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Channel catalog updated"
                );

                let _ = self.inner.events.send(CacheEvent::Updated(self.status().await));
                RebuildOutcome::Updated
            }
            Err(e) => {
                metrics::CATALOG_REBUILDS.with_label_values(&["failed"]).inc();
                tracing::error!("Catalog rebuild from {} failed: {}", source_url, e);
                let _ = self.inner.events.send(CacheEvent::RebuildFailed(e.to_string()));
                RebuildOutcome::Failed
            }
        }
    }

    pub async fn is_stale(&self, config: &AddonConfig) -> bool {
        self.is_stale_at(config, Utc::now()).await
    }

    pub async fn is_stale_at(&self, config: &AddonConfig, now: DateTime<Utc>) -> bool {
        let window = freshness_window(config);
        let state = self.inner.state.read().await;

        match (&state.snapshot, state.last_updated) {
            (Some(_), Some(last)) => (now - last)
                .to_std()
                .map(|age| age >= window)
                .unwrap_or(false),
            _ => true,
        }
    }

    /// One poll tick: rebuild from the last source if the snapshot is stale
    pub async fn poll_once(&self) -> Option<RebuildOutcome> {
        let (source, config) = {
            let state = self.inner.state.read().await;
            if state.snapshot.is_none() {
                return None;
            }
            (state.source_url.clone()?, state.config.clone())
        };

        if !self.is_stale(&config).await {
            return None;
        }

        tracing::info!("Channel catalog is stale, refreshing from {}", source);
        Some(self.rebuild(&source, Some(&config)).await)
    }

    /// (Re)start the periodic staleness poll
    pub fn start_polling(&self) {
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(scheduler::run_every(self.inner.poll_interval, move || {
            let weak = weak.clone();
            async move {
                let Some(inner) = weak.upgrade() else {
                    return ControlFlow::Break(());
                };
                ChannelCache { inner }.poll_once().await;
                ControlFlow::Continue(())
            }
        }));

        if let Some(previous) = self.poller().replace(handle) {
            previous.abort();
        }
        tracing::info!("Catalog poll started (every {}s)", self.inner.poll_interval.as_secs());
    }

    pub fn is_polling(&self) -> bool {
        self.poller().as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    /// Stop the periodic poll. Safe to call more than once.
    pub fn cleanup(&self) {
        if let Some(handle) = self.poller().take() {
            handle.abort();
            tracing::info!("Catalog poll stopped");
        }
    }

    pub async fn snapshot(&self) -> Option<Arc<ChannelSnapshot>> {
        self.inner.state.read().await.snapshot.clone()
    }

    async fn channels(&self) -> Arc<ChannelSnapshot> {
        self.snapshot().await.unwrap_or_else(|| {
            Arc::new(ChannelSnapshot::from_output(Default::default(), DateTime::<Utc>::MIN_UTC))
        })
    }

    /// Channels and genres; empty lists before the first successful build
    pub async fn get_snapshot(&self) -> CatalogView {
        match self.snapshot().await {
            Some(snapshot) => CatalogView {
                channels: snapshot.channels.clone(),
                genres: snapshot.genres.clone(),
            },
            None => CatalogView::default(),
        }
    }

    pub async fn get_channel(&self, id: &str) -> Option<Channel> {
        let suffix = self.inner.state.read().await.config.id_suffix.clone();
        let snapshot = self.channels().await;
        find_channel(&snapshot.channels, id, suffix.as_deref()).cloned()
    }

    pub async fn get_channels_by_genre(&self, genre: &str) -> Vec<Channel> {
        filter_by_genre(&self.channels().await.channels, genre)
    }

    pub async fn search_channels(&self, query: &str) -> Vec<Channel> {
        search(&self.channels().await.channels, query)
    }

    /// Re-apply the remembered filter to the current snapshot
    pub async fn get_filtered_channels(&self) -> Vec<Channel> {
        match self.get_last_filter().await {
            Some(LastFilter { kind: FilterKind::Search, value }) => self.search_channels(&value).await,
            Some(LastFilter { kind: FilterKind::Genre, value }) => self.get_channels_by_genre(&value).await,
            None => self.get_snapshot().await.channels,
        }
    }

    pub async fn set_last_filter(&self, kind: FilterKind, value: impl Into<String>) {
        self.inner.state.write().await.last_filter = Some(LastFilter {
            kind,
            value: value.into(),
        });
    }

    pub async fn get_last_filter(&self) -> Option<LastFilter> {
        self.inner.state.read().await.last_filter.clone()
    }

    pub async fn clear_last_filter(&self) {
        self.inner.state.write().await.last_filter = None;
    }

    pub async fn current_config(&self) -> AddonConfig {
        self.inner.state.read().await.config.clone()
    }

    pub async fn status(&self) -> CacheStatus {
        let state = self.inner.state.read().await;
        let snapshot = state.snapshot.as_deref();

        CacheStatus {
            channels: snapshot.map(|s| s.channels.len()).unwrap_or(0),
            genres: snapshot.map(|s| s.genres.len()).unwrap_or(0),
            epg_urls: snapshot.map(|s| s.epg_urls.clone()).unwrap_or_default(),
            last_updated: state.last_updated,
            update_in_progress: self.inner.update_in_progress.load(Ordering::Acquire),
            source_url: state.source_url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransformOutput;
    use crate::services::transformer::TransformError;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    struct MockTransformer {
        calls: AtomicUsize,
        fail: AtomicBool,
        gate: Option<Arc<Notify>>,
        output: TransformOutput,
    }

    impl MockTransformer {
        fn new(output: TransformOutput) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                gate: None,
                output,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PlaylistTransformer for MockTransformer {
        async fn load_and_transform(
            &self,
            _source_url: &str,
            _config: &AddonConfig,
        ) -> Result<TransformOutput, TransformError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail.load(Ordering::SeqCst) {
                Err(TransformError::Status("HTTP 500: Internal Server Error".into()))
            } else {
                Ok(self.output.clone())
            }
        }
    }

    fn channel(id: &str, name: &str, tvg_id: Option<&str>, genres: &[&str]) -> Channel {
        Channel {
            id: format!("tv|{id}"),
            name: name.to_string(),
            genres: genres.iter().map(|g| g.to_string()).collect(),
            poster: None,
            logo: None,
            background: None,
            streams: vec![],
            tvg_id: tvg_id.map(String::from),
            channel_number: None,
            behavior_hints: BTreeMap::new(),
        }
    }

    fn sample_output() -> TransformOutput {
        TransformOutput {
            channels: vec![
                channel("Rai1.it", "Rai Uno", Some("Rai1.it"), &["Generalist"]),
                channel("skysport1", "Sky Sport 1", None, &["Sport"]),
                channel("skysport24", "Sky Sport 24", None, &["Sport", "News"]),
            ],
            genres: vec!["Generalist".into(), "Sport".into(), "News".into()],
            epg_urls: vec!["http://epg/guide.xml".into()],
        }
    }

    fn cache_with(transformer: Arc<MockTransformer>) -> ChannelCache {
        ChannelCache::new(transformer, DEFAULT_POLL_INTERVAL)
    }

    #[tokio::test]
    async fn test_empty_cache_views() {
        let cache = cache_with(Arc::new(MockTransformer::new(sample_output())));
        assert_eq!(cache.get_snapshot().await, CatalogView::default());
        assert!(cache.get_channel("rai1").await.is_none());
        assert!(cache.get_filtered_channels().await.is_empty());
        assert!(cache.is_stale(&AddonConfig::default()).await);
        assert!(cache.poll_once().await.is_none());
    }

    #[tokio::test]
    async fn test_rebuild_installs_snapshot_and_notifies() {
        let transformer = Arc::new(MockTransformer::new(sample_output()));
        let cache = cache_with(transformer.clone());
        let mut events = cache.subscribe();

        assert_eq!(cache.rebuild("http://src/list.m3u", None).await, RebuildOutcome::Updated);

        let view = cache.get_snapshot().await;
        assert_eq!(view.channels.len(), 3);
        assert_eq!(view.genres, vec!["Generalist", "Sport", "News"]);

        let status = cache.status().await;
        assert_eq!(status.source_url.as_deref(), Some("http://src/list.m3u"));
        assert_eq!(status.epg_urls, vec!["http://epg/guide.xml"]);
        assert!(!status.update_in_progress);

        match events.recv().await.unwrap() {
            CacheEvent::Updated(status) => assert_eq!(status.channels, 3),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_rebuild_keeps_previous_snapshot() {
        let transformer = Arc::new(MockTransformer::new(sample_output()));
        let cache = cache_with(transformer.clone());
        cache.rebuild("http://src/list.m3u", None).await;
        let before = cache.get_snapshot().await;
        let last_updated = cache.status().await.last_updated;

        let mut events = cache.subscribe();
        transformer.fail.store(true, Ordering::SeqCst);
        assert_eq!(cache.rebuild("http://src/other.m3u", None).await, RebuildOutcome::Failed);

        assert_eq!(cache.get_snapshot().await, before);
        let status = cache.status().await;
        assert!(!status.update_in_progress);
        assert_eq!(status.last_updated, last_updated);
        assert_eq!(status.source_url.as_deref(), Some("http://src/list.m3u"));
        assert!(matches!(events.recv().await.unwrap(), CacheEvent::RebuildFailed(msg) if msg.contains("500")));
    }

    #[tokio::test]
    async fn test_concurrent_rebuilds_call_transformer_once() {
        let gate = Arc::new(Notify::new());
        let transformer = Arc::new(MockTransformer {
            gate: Some(gate.clone()),
            ..MockTransformer::new(sample_output())
        });
        let cache = cache_with(transformer.clone());

        let first = tokio::spawn({
            let cache = cache.clone();
            async move { cache.rebuild("http://src/list.m3u", None).await }
        });
        while transformer.calls() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(cache.status().await.update_in_progress);

        let second = cache.rebuild("http://src/list.m3u", None).await;
        assert_eq!(second, RebuildOutcome::Skipped);

        gate.notify_one();
        assert_eq!(first.await.unwrap(), RebuildOutcome::Updated);
        assert_eq!(transformer.calls(), 1);
        assert!(!cache.status().await.update_in_progress);
    }

    #[tokio::test]
    async fn test_staleness_window_boundaries() {
        let cache = cache_with(Arc::new(MockTransformer::new(sample_output())));
        cache.rebuild("http://src/list.m3u", None).await;
        let last = cache.status().await.last_updated.unwrap();

        let config = AddonConfig {
            update_interval: Some("08:30".into()),
            ..Default::default()
        };
        let just_before = last + ChronoDuration::hours(8) + ChronoDuration::minutes(29) + ChronoDuration::seconds(59);
        let exactly = last + ChronoDuration::hours(8) + ChronoDuration::minutes(30);
        assert!(!cache.is_stale_at(&config, just_before).await);
        assert!(cache.is_stale_at(&config, exactly).await);

        // Unparsable interval falls back to 12 hours
        let bad = AddonConfig {
            update_interval: Some("8h30".into()),
            ..Default::default()
        };
        assert!(!cache.is_stale_at(&bad, last + ChronoDuration::hours(11)).await);
        assert!(cache.is_stale_at(&bad, last + ChronoDuration::hours(12)).await);
        assert!(!cache.is_stale_at(&AddonConfig::default(), last + ChronoDuration::hours(11)).await);
    }

    #[tokio::test]
    async fn test_poll_rebuilds_only_when_stale() {
        let transformer = Arc::new(MockTransformer::new(sample_output()));
        let cache = cache_with(transformer.clone());
        cache.rebuild("http://src/list.m3u", None).await;

        assert!(cache.poll_once().await.is_none());
        assert_eq!(transformer.calls(), 1);

        cache
            .apply_configuration(&AddonConfig {
                update_interval: Some("00:00".into()),
                ..Default::default()
            })
            .await;
        assert_eq!(cache.poll_once().await, Some(RebuildOutcome::Updated));
        assert_eq!(transformer.calls(), 2);
        cache.cleanup();
    }

    #[tokio::test]
    async fn test_lookup_and_filters() {
        let cache = cache_with(Arc::new(MockTransformer::new(sample_output())));
        cache.rebuild("http://src/list.m3u", None).await;

        // Raw id, namespaced id, tvg-id and display name
        assert_eq!(cache.get_channel("rai1.it").await.unwrap().name, "Rai Uno");
        assert_eq!(cache.get_channel("tv|Rai1.it").await.unwrap().name, "Rai Uno");
        assert_eq!(cache.get_channel("RAI UNO").await.unwrap().id, "tv|Rai1.it");
        assert_eq!(cache.get_channel("Sky.Sport.1").await.unwrap().name, "Sky Sport 1");
        assert!(cache.get_channel("rai1").await.is_none());
        assert!(cache.get_channel("").await.is_none());

        let sport = cache.get_channels_by_genre("SPORT").await;
        assert_eq!(sport.len(), 2);
        assert!(cache.get_channels_by_genre("Spo").await.is_empty());

        assert_eq!(cache.search_channels("sky sport").await.len(), 2);
        assert_eq!(cache.search_channels("").await.len(), 3);
        assert_eq!(cache.search_channels("24").await.len(), 1);
    }

    #[tokio::test]
    async fn test_suffix_fallback_lookup() {
        let cache = cache_with(Arc::new(MockTransformer::new(sample_output())));
        cache.rebuild("http://src/list.m3u", None).await;
        cache
            .apply_configuration(&AddonConfig {
                id_suffix: Some(".it".into()),
                ..Default::default()
            })
            .await;

        assert_eq!(cache.get_channel("rai1").await.unwrap().name, "Rai Uno");
        cache.cleanup();
    }

    #[tokio::test]
    async fn test_last_filter_round_trip() {
        let cache = cache_with(Arc::new(MockTransformer::new(sample_output())));
        cache.rebuild("http://src/list.m3u", None).await;

        cache.set_last_filter(FilterKind::Genre, "news").await;
        assert_eq!(cache.get_filtered_channels().await.len(), 1);

        cache.set_last_filter(FilterKind::Search, "sky").await;
        assert_eq!(cache.get_filtered_channels().await.len(), 2);
        assert_eq!(
            cache.get_last_filter().await,
            Some(LastFilter { kind: FilterKind::Search, value: "sky".into() })
        );

        cache.clear_last_filter().await;
        assert_eq!(cache.get_filtered_channels().await.len(), 3);
    }

    #[tokio::test]
    async fn test_apply_configuration_rebuilds_in_background() {
        let transformer = Arc::new(MockTransformer::new(sample_output()));
        let cache = cache_with(transformer.clone());
        let mut events = cache.subscribe();

        let config = AddonConfig {
            m3u: Some("http://src/list.m3u".into()),
            update_interval: Some("06:00".into()),
            ..Default::default()
        };
        let changes = cache.apply_configuration(&config).await;
        assert!(changes.source && changes.other && !changes.epg);
        assert!(cache.is_polling());

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, CacheEvent::Updated(_)));
        assert_eq!(cache.get_snapshot().await.channels.len(), 3);

        // Re-applying the same settings changes nothing
        assert_eq!(cache.apply_configuration(&config).await, ConfigChanges::default());
        assert_eq!(transformer.calls(), 1);

        cache.cleanup();
        cache.cleanup();
        assert!(!cache.is_polling());
    }

    #[tokio::test]
    async fn test_source_only_configuration_starts_polling() {
        let transformer = Arc::new(MockTransformer::new(sample_output()));
        let cache = cache_with(transformer.clone());
        assert!(!cache.is_polling());

        let changes = cache
            .apply_configuration(&AddonConfig {
                m3u: Some("http://src/list.m3u".into()),
                ..Default::default()
            })
            .await;
        assert!(changes.source && !changes.other && !changes.epg);
        assert!(cache.is_polling());

        // Later EPG-only changes keep the running poll
        cache
            .apply_configuration(&AddonConfig {
                epg_enabled: Some(true),
                ..Default::default()
            })
            .await;
        assert!(cache.is_polling());

        cache.cleanup();
        assert!(!cache.is_polling());
    }

    #[tokio::test]
    async fn test_initialize_resets_state() {
        let cache = cache_with(Arc::new(MockTransformer::new(sample_output())));
        cache.rebuild("http://src/list.m3u", None).await;
        cache.set_last_filter(FilterKind::Genre, "sport").await;

        cache.initialize().await;
        assert_eq!(cache.get_snapshot().await, CatalogView::default());
        assert!(cache.get_last_filter().await.is_none());
        assert!(cache.status().await.source_url.is_none());
    }
}
