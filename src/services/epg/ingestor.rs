//! EPG ingestion service
//!
//! Streams one or more XMLTV documents into a staging guide and swaps it in
//! when the refresh is done. Readers always see a complete guide: the
//! previous one until the swap, the new one after.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use futures::StreamExt;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;
use tokio::task::JoinHandle;

use super::guide::{GuideBuilder, ProgramGuide};
use super::sources::{decoded_reader, resolve_sources, EpgFetcher, FetchError, SourceInput};
use super::state_machine::EpgStateMachine;
use super::time::{format_clock, format_full};
use super::xml_events::{xml_events, XmlEvent};
use crate::models::{Channel, EpgStatus, ProgramGuideEntry, ProgramView};
use crate::services::guard::InProgressGuard;
use crate::services::metrics;
use crate::services::normalize::normalize_dotted;
use crate::services::scheduler;

/// Programmes returned by `upcoming_programs`
const UPCOMING_LIMIT: usize = 2;
/// Age after which the guide is considered outdated
const GUIDE_MAX_AGE_HOURS: i64 = 24;

/// Outcome counters of the last completed refresh
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub sources_total: usize,
    pub sources_failed: usize,
    pub parse_errors: usize,
    pub programmes: usize,
    pub dropped_programmes: usize,
}

impl RefreshReport {
    pub fn degraded(&self) -> bool {
        self.sources_failed > 0 || self.parse_errors > 0
    }
}

#[derive(Debug, Default)]
struct IngestState {
    last_source: Option<SourceInput>,
    last_refresh: Option<DateTime<Utc>>,
    report: RefreshReport,
}

struct Inner {
    fetcher: Arc<dyn EpgFetcher>,
    timezone: Tz,
    refresh_schedule: Schedule,
    guide: RwLock<Arc<ProgramGuide>>,
    updating: AtomicBool,
    state: Mutex<IngestState>,
    daily_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let slot = self
            .daily_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }
}

/// Stream one document into `builder`. Returns the number of XML errors
/// seen; a reader-level error ends this document but keeps what was parsed.
pub async fn ingest_document(
    fetcher: &dyn EpgFetcher,
    url: &str,
    builder: &mut GuideBuilder,
) -> Result<usize, FetchError> {
    let body = fetcher.open(url).await?;
    let reader = decoded_reader(body, url).await?;

    let events = xml_events(reader);
    futures::pin_mut!(events);

    let mut machine = EpgStateMachine::new();
    let mut parse_errors = 0usize;

    while let Some(event) = events.next().await {
        match &event {
            XmlEvent::End => break,
            XmlEvent::Error(description) => {
                parse_errors += 1;
                metrics::EPG_PARSE_ERRORS.inc();
                tracing::warn!("EPG parse error in {}: {}", url, description);
            }
            _ => {
                if let Some(item) = machine.handle(&event) {
                    builder.accept(item);
                }
            }
        }
    }

    if !machine.is_idle() {
        tracing::debug!("EPG document {} ended inside an unfinished element", url);
    }

    Ok(parse_errors)
}

fn to_view(entry: &ProgramGuideEntry, tz: Tz) -> ProgramView {
    ProgramView {
        title: entry.title.clone(),
        description: entry.description.clone(),
        category: entry.category.clone(),
        start: format_clock(entry.start, tz),
        stop: format_clock(entry.stop, tz),
    }
}

/// Programme guide service. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct EpgIngestor {
    inner: Arc<Inner>,
}

impl EpgIngestor {
    pub fn new(fetcher: Arc<dyn EpgFetcher>, timezone: Tz, refresh_schedule: Schedule) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                timezone,
                refresh_schedule,
                guide: RwLock::new(Arc::new(ProgramGuide::default())),
                updating: AtomicBool::new(false),
                state: Mutex::new(IngestState::default()),
                daily_task: Mutex::new(None),
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, IngestState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn guide(&self) -> Arc<ProgramGuide> {
        self.inner
            .guide
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn install(&self, guide: ProgramGuide) {
        *self
            .inner
            .guide
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(guide);
    }

    /// Load the guide from `source` unless it is already loaded from the
    /// same source. The first call also starts the daily refresh.
    pub async fn initialize(&self, source: impl Into<SourceInput>) {
        let source = source.into();

        let same_source = self.lock_state().last_source.as_ref() == Some(&source);
        if same_source && !self.guide().is_empty() {
            tracing::info!("EPG already loaded from {}, skipping", source);
            return;
        }

        self.lock_state().last_source = Some(source.clone());
        self.refresh(&source).await;
        self.ensure_daily_refresh();
    }

    fn ensure_daily_refresh(&self) {
        let mut slot = self
            .inner
            .daily_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let schedule = self.inner.refresh_schedule.clone();
        let tz = self.inner.timezone;

        *slot = Some(tokio::spawn(scheduler::run_on_schedule(schedule, tz, move || {
            let weak = weak.clone();
            async move {
                let Some(inner) = weak.upgrade() else {
                    return ControlFlow::Break(());
                };
                let ingestor = EpgIngestor { inner };
                let source = ingestor.lock_state().last_source.clone();
                if let Some(source) = source {
                    tracing::info!("Scheduled EPG refresh from {}", source);
                    ingestor.refresh(&source).await;
                }
                ControlFlow::Continue(())
            }
        })));

        tracing::info!("Daily EPG refresh scheduled ({})", tz);
    }

    /// Rebuild the guide from every document `source` resolves to.
    /// Returns `None` when another refresh is already running.
    pub async fn refresh(&self, source: &SourceInput) -> Option<RefreshReport> {
        let Some(_guard) = InProgressGuard::try_acquire(&self.inner.updating) else {
            tracing::info!("EPG refresh already in progress, skipping");
            metrics::EPG_REFRESHES.with_label_values(&["skipped"]).inc();
            return None;
        };

        let started = Instant::now();
        let urls = resolve_sources(self.inner.fetcher.as_ref(), source).await;
        tracing::info!("EPG refresh started with {} source(s)", urls.len());

        let mut builder = GuideBuilder::new();
        let mut report = RefreshReport {
            sources_total: urls.len(),
            ..Default::default()
        };

        for (index, url) in urls.iter().enumerate() {
            tracing::info!("Ingesting EPG source {}/{}: {}", index + 1, urls.len(), url);
            match ingest_document(self.inner.fetcher.as_ref(), url, &mut builder).await {
                Ok(errors) => report.parse_errors += errors,
                Err(e) => {
                    report.sources_failed += 1;
                    tracing::error!("EPG source {} failed: {}", url, e);
                }
            }
        }

        let nothing_parsed = builder.is_empty();
        let (guide, stats) = builder.finish();
        report.programmes = stats.accepted;
        report.dropped_programmes = stats.dropped;

        let all_failed = report.sources_total > 0 && report.sources_failed == report.sources_total;
        if all_failed && nothing_parsed {
            tracing::warn!("Every EPG source failed, keeping the previous guide");
        } else {
            let (channels, programmes) = (guide.channel_count(), guide.programme_count());
            self.install(guide);
            metrics::EPG_PROGRAMMES_INGESTED.inc_by(programmes as u64);
            tracing::info!(
                channels,
                programmes,
                dropped = report.dropped_programmes,
                "EPG guide installed"
            );
        }

        {
            let mut state = self.lock_state();
            state.last_refresh = Some(Utc::now());
            state.report = report;
        }

        let outcome = if report.degraded() { "degraded" } else { "ok" };
        metrics::EPG_REFRESHES.with_label_values(&[outcome]).inc();
        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            sources = report.sources_total,
            failed = report.sources_failed,
            parse_errors = report.parse_errors,
            "EPG refresh finished"
        );

        Some(report)
    }

    pub fn current_entry_at(&self, channel_id: &str, now: DateTime<Utc>) -> Option<ProgramGuideEntry> {
        self.guide()
            .current_at(&normalize_dotted(channel_id), now)
            .cloned()
    }

    pub fn upcoming_entries_at(&self, channel_id: &str, now: DateTime<Utc>) -> Vec<ProgramGuideEntry> {
        self.guide()
            .upcoming_at(&normalize_dotted(channel_id), now, UPCOMING_LIMIT)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn current_program(&self, channel_id: &str) -> Option<ProgramView> {
        self.current_program_at(channel_id, Utc::now())
    }

    pub fn current_program_at(&self, channel_id: &str, now: DateTime<Utc>) -> Option<ProgramView> {
        self.current_entry_at(channel_id, now)
            .map(|entry| to_view(&entry, self.inner.timezone))
    }

    pub fn upcoming_programs(&self, channel_id: &str) -> Vec<ProgramView> {
        self.upcoming_programs_at(channel_id, Utc::now())
    }

    pub fn upcoming_programs_at(&self, channel_id: &str, now: DateTime<Utc>) -> Vec<ProgramView> {
        self.upcoming_entries_at(channel_id, now)
            .iter()
            .map(|entry| to_view(entry, self.inner.timezone))
            .collect()
    }

    pub fn channel_icon(&self, channel_id: &str) -> Option<String> {
        self.guide()
            .icon(&normalize_dotted(channel_id))
            .map(String::from)
    }

    pub fn is_updating(&self) -> bool {
        self.inner.updating.load(Ordering::Acquire)
    }

    /// Guide loaded and no refresh running
    pub fn is_available(&self) -> bool {
        !self.guide().is_empty() && !self.is_updating()
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.lock_state().last_refresh
    }

    pub fn needs_update(&self) -> bool {
        self.needs_update_at(Utc::now())
    }

    pub fn needs_update_at(&self, now: DateTime<Utc>) -> bool {
        match self.last_refresh() {
            None => true,
            Some(at) => now - at >= ChronoDuration::hours(GUIDE_MAX_AGE_HOURS),
        }
    }

    pub fn status(&self) -> EpgStatus {
        let guide = self.guide();
        let (last_refresh, report) = {
            let state = self.lock_state();
            (state.last_refresh, state.report)
        };

        EpgStatus {
            is_updating: self.is_updating(),
            last_refresh: last_refresh
                .map(|at| format_full(at, self.inner.timezone))
                .unwrap_or_else(|| "never".to_string()),
            channels_count: guide.channel_count(),
            icons_count: guide.icon_count(),
            programs_count: guide.programme_count(),
            timezone: self.inner.timezone.name().to_string(),
            sources_total: report.sources_total,
            sources_failed: report.sources_failed,
            parse_errors: report.parse_errors,
            dropped_programmes: report.dropped_programmes,
            degraded: report.degraded(),
        }
    }

    /// Channels whose TV-guide id has no programmes in the current guide
    pub fn missing_epg<'a>(&self, channels: &'a [Channel]) -> Vec<&'a Channel> {
        let guide = self.guide();
        let missing: Vec<&Channel> = channels
            .iter()
            .filter(|c| match c.tvg_id.as_deref() {
                Some(tvg_id) => !guide.has_channel(&normalize_dotted(tvg_id)),
                None => false,
            })
            .collect();

        if !missing.is_empty() {
            tracing::info!("{} of {} channels have no EPG data", missing.len(), channels.len());
            for channel in &missing {
                tracing::debug!("No EPG for {}={}", channel.tvg_id.as_deref().unwrap_or(""), channel.name);
            }
        }

        missing
    }
}
