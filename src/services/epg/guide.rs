use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::state_machine::ParsedItem;
use crate::models::ProgramGuideEntry;

/// Per-channel programme lists plus the icon index, keyed by dotted id.
/// Built once per refresh and never patched afterwards.
#[derive(Debug, Default)]
pub struct ProgramGuide {
    programmes: HashMap<String, Vec<ProgramGuideEntry>>,
    icons: HashMap<String, String>,
}

impl ProgramGuide {
    pub fn is_empty(&self) -> bool {
        self.programmes.is_empty()
    }

    pub fn channel_count(&self) -> usize {
        self.programmes.len()
    }

    pub fn icon_count(&self) -> usize {
        self.icons.len()
    }

    pub fn programme_count(&self) -> usize {
        self.programmes.values().map(Vec::len).sum()
    }

    pub fn programmes(&self, key: &str) -> &[ProgramGuideEntry] {
        self.programmes.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn has_channel(&self, key: &str) -> bool {
        self.programmes.contains_key(key)
    }

    pub fn icon(&self, key: &str) -> Option<&str> {
        self.icons.get(key).map(String::as_str)
    }

    /// First entry, in start order, whose window contains `now`
    pub fn current_at(&self, key: &str, now: DateTime<Utc>) -> Option<&ProgramGuideEntry> {
        self.programmes(key).iter().find(|p| p.is_airing_at(now))
    }

    pub fn upcoming_at(&self, key: &str, now: DateTime<Utc>, limit: usize) -> Vec<&ProgramGuideEntry> {
        self.programmes(key)
            .iter()
            .filter(|p| p.start >= now)
            .take(limit)
            .collect()
    }
}

/// What one refresh accepted and threw away
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub accepted: usize,
    pub dropped: usize,
}

/// Staging area for a refresh. Sources append in resolve order; `finish`
/// sorts every channel by start time.
#[derive(Debug, Default)]
pub struct GuideBuilder {
    guide: ProgramGuide,
    stats: BuildStats,
}

impl GuideBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept(&mut self, item: ParsedItem) {
        match item {
            ParsedItem::Programme(raw) => match raw.into_entry() {
                Some(entry) => {
                    self.stats.accepted += 1;
                    self.guide
                        .programmes
                        .entry(entry.channel.clone())
                        .or_default()
                        .push(entry);
                }
                None => self.stats.dropped += 1,
            },
            ParsedItem::Channel(raw) => {
                if let Some((key, icon)) = raw.into_icon() {
                    self.guide.icons.entry(key).or_insert(icon);
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.guide.is_empty() && self.guide.icons.is_empty()
    }

    pub fn finish(mut self) -> (ProgramGuide, BuildStats) {
        for list in self.guide.programmes.values_mut() {
            list.sort_by_key(|p| p.start);
        }
        (self.guide, self.stats)
    }
}
