use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::services::metrics;

/// Default lifetime of a resolved stream entry
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Default upper bound on cached channels
pub const DEFAULT_CAPACITY: usize = 2048;

struct CacheEntry<T> {
    payload: T,
    expires_at: Instant,
}

/// Short-lived cache for expensively resolved stream URLs, keyed by channel id.
///
/// Reads are expiry-checked and never purge; an expired entry stays until it is
/// overwritten, evicted by the LRU bound, or removed by `purge_expired`.
pub struct ResolvedStreamCache<T> {
    entries: Mutex<LruCache<String, CacheEntry<T>>>,
    default_ttl: Duration,
}

impl<T: Clone> ResolvedStreamCache<T> {
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            default_ttl,
        }
    }

    fn entries(&self) -> MutexGuard<'_, LruCache<String, CacheEntry<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached payload for `key` if it has not expired yet
    pub fn get(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        let mut entries = self.entries();

        match entries.get(key) {
            Some(entry) if now < entry.expires_at => {
                tracing::debug!(channel = key, "resolved stream cache hit");
                metrics::STREAM_CACHE_HITS.inc();
                Some(entry.payload.clone())
            }
            _ => {
                metrics::STREAM_CACHE_MISSES.inc();
                None
            }
        }
    }

    /// Store `payload` under `key` with the default TTL
    pub fn set(&self, key: &str, payload: T) {
        self.set_with_ttl(key, payload, self.default_ttl);
    }

    /// Store `payload` under `key`, replacing any previous entry
    pub fn set_with_ttl(&self, key: &str, payload: T, ttl: Duration) {
        tracing::debug!(channel = key, ttl_ms = ttl.as_millis() as u64, "resolved stream cached");
        let entry = CacheEntry {
            payload,
            expires_at: Instant::now() + ttl,
        };
        self.entries().put(key.to_string(), entry);
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }
}

impl<T: Clone> Default for ResolvedStreamCache<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = ResolvedStreamCache::default();
        cache.set_with_ttl("ch1", "payload".to_string(), Duration::from_millis(1000));

        tokio::time::advance(Duration::from_millis(999)).await;
        assert_eq!(cache.get("ch1").as_deref(), Some("payload"));

        tokio::time::advance(Duration::from_millis(2)).await;
        assert_eq!(cache.get("ch1"), None);
        // Expired entries are left in place
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_ttl_is_five_minutes() {
        let cache = ResolvedStreamCache::default();
        cache.set("ch1", 7u32);

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(cache.get("ch1"), Some(7));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get("ch1"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_overwrites_and_refreshes_expiry() {
        let cache = ResolvedStreamCache::default();
        cache.set_with_ttl("ch1", 1u32, Duration::from_millis(100));
        tokio::time::advance(Duration::from_millis(200)).await;
        assert_eq!(cache.get("ch1"), None);

        cache.set_with_ttl("ch1", 2u32, Duration::from_millis(100));
        assert_eq!(cache.get("ch1"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent_and_purge() {
        let cache = ResolvedStreamCache::default();
        cache.set_with_ttl("a", 1u32, Duration::from_millis(100));
        cache.set_with_ttl("b", 2u32, Duration::from_secs(60));

        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_capacity_bound_evicts_least_recent() {
        let cache = ResolvedStreamCache::new(2, DEFAULT_TTL);
        cache.set("a", 1u32);
        cache.set("b", 2u32);
        cache.set("c", 3u32);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("c"), Some(3));
    }
}
