//! Response cache keyed by the fully built request URL.
//!
//! Entries expire a fixed [`CACHE_TTL`] after they were stored. Expired
//! entries are swept on every lookup, so the reported size never counts stale
//! documents. The cache is unbounded unless a capacity is given, in which case
//! the least recently used entry is evicted first.

use crate::metrics::MetricsCollector;
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Lifetime of a cached response.
pub const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: Value,
    stored_at: DateTime<Utc>,
}

/// Size and TTL of the cache at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseCacheStats {
    pub size: usize,
    pub ttl_ms: u64,
}

pub struct ResponseCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    metrics: Option<Arc<MetricsCollector>>,
}

impl ResponseCache {
    /// Unbounded cache, or an LRU bounded to `max_entries` when given.
    pub fn new(clock: Arc<dyn Clock>, max_entries: Option<NonZeroUsize>) -> Self {
        let entries = match max_entries {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };

        Self {
            entries: Mutex::new(entries),
            clock,
            ttl: CACHE_TTL,
            metrics: None,
        }
    }

    /// Report lookups and size changes to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Return the live entry for `key`, counting the lookup as a hit or miss.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = self.clock.now();
        let (payload, size) = {
            let mut entries = self.entries.lock();
            self.sweep(&mut entries, now);
            let payload = entries.get(key).map(|entry| entry.payload.clone());
            (payload, entries.len())
        };

        trace!(hit = payload.is_some(), size, "Cache lookup");

        if let Some(metrics) = &self.metrics {
            metrics.record_cache_lookup(payload.is_some());
            metrics.update_cache_metrics(size);
        }

        payload
    }

    pub fn put(&self, key: impl Into<String>, payload: Value) {
        let entry = CacheEntry {
            payload,
            stored_at: self.clock.now(),
        };

        let size = {
            let mut entries = self.entries.lock();
            entries.put(key.into(), entry);
            entries.len()
        };

        if let Some(metrics) = &self.metrics {
            metrics.update_cache_metrics(size);
        }
    }

    /// Drop every entry and zero the cache hit/miss counters.
    pub fn clear(&self) {
        self.entries.lock().clear();

        if let Some(metrics) = &self.metrics {
            metrics.reset_cache_counters();
            metrics.update_cache_metrics(0);
        }
    }

    /// Remove expired entries now, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        self.sweep(&mut entries, now)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> ResponseCacheStats {
        ResponseCacheStats {
            size: self.len(),
            ttl_ms: self.ttl.as_millis() as u64,
        }
    }

    fn sweep(&self, entries: &mut LruCache<String, CacheEntry>, now: DateTime<Utc>) -> usize {
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| self.is_expired(entry, now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            entries.pop(key);
        }

        expired.len()
    }

    fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        let age = (now - entry.stored_at).to_std().unwrap_or(Duration::ZERO);
        age >= self.ttl
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("size", &self.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsConfig;
    use bridge_traits::time::ManualClock;
    use serde_json::json;

    fn cache(clock: &ManualClock) -> ResponseCache {
        ResponseCache::new(Arc::new(clock.clone()), None)
    }

    #[test]
    fn test_put_then_get() {
        let clock = ManualClock::starting_now();
        let cache = cache(&clock);

        cache.put("k", json!({"entityUniqueId": "A"}));

        assert_eq!(cache.get("k"), Some(json!({"entityUniqueId": "A"})));
        assert_eq!(cache.get("other"), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_entry_expires_at_ttl() {
        let clock = ManualClock::starting_now();
        let cache = cache(&clock);
        cache.put("k", json!(1));

        clock.advance(CACHE_TTL - Duration::from_millis(1));
        assert_eq!(cache.get("k"), Some(json!(1)));

        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lookup_sweeps_all_expired_entries() {
        let clock = ManualClock::starting_now();
        let cache = cache(&clock);
        cache.put("old-1", json!(1));
        cache.put("old-2", json!(2));
        clock.advance(Duration::from_secs(200));
        cache.put("fresh", json!(3));
        clock.advance(Duration::from_secs(100));

        assert_eq!(cache.get("missing"), None);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("fresh"), Some(json!(3)));
    }

    #[test]
    fn test_purge_expired_reports_count() {
        let clock = ManualClock::starting_now();
        let cache = cache(&clock);
        cache.put("a", json!(1));
        cache.put("b", json!(2));
        clock.advance(CACHE_TTL);

        assert_eq!(cache.purge_expired(), 2);
        assert_eq!(cache.purge_expired(), 0);
    }

    #[test]
    fn test_bounded_cache_evicts_least_recent() {
        let clock = ManualClock::starting_now();
        let cache = ResponseCache::new(Arc::new(clock.clone()), NonZeroUsize::new(2));

        cache.put("a", json!(1));
        cache.put("b", json!(2));
        assert!(cache.get("a").is_some());
        cache.put("c", json!(3));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
    }

    #[test]
    fn test_metrics_track_lookups_and_clear() {
        let clock = ManualClock::starting_now();
        let metrics = MetricsCollector::new(MetricsConfig::default(), Arc::new(clock.clone()));
        let cache = cache(&clock).with_metrics(metrics.clone());

        cache.put("k", json!(1));
        cache.get("k");
        cache.get("nope");

        let summary = metrics.summary();
        assert_eq!(summary.counters.cache_hits, 1);
        assert_eq!(summary.counters.cache_misses, 1);
        assert_eq!(summary.cache.size, 1);

        cache.clear();
        let summary = metrics.summary();
        assert_eq!(summary.counters.cache_hits, 0);
        assert_eq!(summary.counters.cache_misses, 0);
        assert_eq!(summary.cache.size, 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_stats() {
        let clock = ManualClock::starting_now();
        let cache = cache(&clock);
        cache.put("k", json!(null));

        assert_eq!(
            cache.stats(),
            ResponseCacheStats {
                size: 1,
                ttl_ms: 300_000
            }
        );
    }
}
