//! # Metrics Collection
//!
//! Process-local counters and time series for lookups, errors, cache usage and
//! rate limiting.
//!
//! ## Overview
//!
//! The collector is append-only: every request attempt, surfaced error and
//! rate limiter delay is recorded with a timestamp taken from the injected
//! [`Clock`]. Summaries are derived on demand:
//!
//! - [`MetricsCollector::summary`]: lifetime counters, a trailing one hour
//!   window and derived rates
//! - [`MetricsCollector::detailed`]: requests grouped by hour, minute,
//!   platform or country
//! - [`MetricsCollector::export`]: both of the above plus the raw records
//!
//! Records are pruned by age (`retention`) and by count (`max_data_points`,
//! newest kept). Pruning runs on a background task that holds only a weak
//! reference to the collector and stops when the collector is dropped.
//!
//! A disabled collector ignores every recording call while still returning
//! zeroed, well formed summaries.

use crate::error::LinkError;
use bridge_traits::time::Clock;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const RECENT_WINDOW_MS: i64 = 60 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// How long records are kept
    pub retention: Duration,
    /// Upper bound on stored request and error records
    pub max_data_points: usize,
    /// Period of the background pruning task
    pub cleanup_interval: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention: Duration::from_secs(24 * 60 * 60),
            max_data_points: 10_000,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

impl MetricsConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// One request attempt as reported by the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestMetric {
    pub url: String,
    pub method: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub success: bool,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    /// Used when `ended_at` is absent
    pub response_time_ms: Option<u64>,
    pub platform: Option<String>,
    pub country: Option<String>,
    pub cache_hit: bool,
}

impl RequestMetric {
    pub fn new(url: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            started_at,
            ended_at: None,
            success: true,
            status_code: None,
            error: None,
            response_time_ms: None,
            platform: None,
            country: None,
            cache_hit: false,
        }
    }

    pub fn ended_at(mut self, ended_at: DateTime<Utc>) -> Self {
        self.ended_at = Some(ended_at);
        self
    }

    pub fn status_code(mut self, status: Option<u16>) -> Self {
        self.status_code = status;
        self
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    pub fn response_time_ms(mut self, response_time_ms: u64) -> Self {
        self.response_time_ms = Some(response_time_ms);
        self
    }

    pub fn platform(mut self, platform: Option<String>) -> Self {
        self.platform = platform;
        self
    }

    pub fn country(mut self, country: Option<String>) -> Self {
        self.country = country;
        self
    }

    pub fn cache_hit(mut self, hit: bool) -> Self {
        self.cache_hit = hit;
        self
    }
}

/// Stored form of a [`RequestMetric`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub timestamp: DateTime<Utc>,
    pub url: String,
    pub method: String,
    pub success: bool,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub response_time_ms: Option<u64>,
    pub platform: Option<String>,
    pub country: Option<String>,
    pub cache_hit: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub kind: String,
    pub context: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDelay {
    pub timestamp: DateTime<Utc>,
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsCounters {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub rate_limit_hits: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentMetrics {
    pub requests: usize,
    pub errors: usize,
    pub avg_response_time: u64,
    pub requests_per_minute: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsRates {
    pub success_rate: f64,
    pub cache_hit_rate: f64,
    pub error_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitMetrics {
    pub hits: u64,
    pub avg_delay: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    pub counters: MetricsCounters,
    pub recent: RecentMetrics,
    pub rates: MetricsRates,
    pub cache: CacheMetrics,
    pub rate_limits: RateLimitMetrics,
}

/// Grouping dimension for [`MetricsCollector::detailed`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    #[default]
    Hour,
    Minute,
    Platform,
    Country,
}

/// Time range and grouping for detailed metrics. Unset bounds default to
/// `[now - retention, now]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailedQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub group_by: GroupBy,
}

impl DetailedQuery {
    pub fn grouped_by(group_by: GroupBy) -> Self {
        Self {
            group_by,
            ..Self::default()
        }
    }

    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsBucket {
    pub requests: u64,
    pub errors: u64,
    pub total_response_time: u64,
    pub avg_response_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMetrics {
    pub requests: Vec<RequestRecord>,
    pub errors: Vec<ErrorRecord>,
    pub rate_limit_delays: Vec<RateLimitDelay>,
    pub counters: MetricsCounters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsExport {
    pub summary: MetricsSummary,
    pub detailed: BTreeMap<String, MetricsBucket>,
    pub raw: RawMetrics,
}

#[derive(Default)]
struct MetricsState {
    requests: Vec<RequestRecord>,
    errors: Vec<ErrorRecord>,
    delays: Vec<RateLimitDelay>,
    cache: CacheMetrics,
    counters: MetricsCounters,
}

pub struct MetricsCollector {
    config: MetricsConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<MetricsState>,
    shutdown: CancellationToken,
}

impl MetricsCollector {
    /// Creates a collector and, when enabled inside a Tokio runtime, starts
    /// the periodic cleanup task.
    pub fn new(config: MetricsConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        let collector = Arc::new(Self {
            config,
            clock,
            state: Mutex::new(MetricsState::default()),
            shutdown: CancellationToken::new(),
        });

        if collector.config.enabled {
            Self::spawn_cleanup(&collector);
        }

        collector
    }

    pub fn disabled(clock: Arc<dyn Clock>) -> Arc<Self> {
        Self::new(MetricsConfig::disabled(), clock)
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    fn spawn_cleanup(collector: &Arc<Self>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No Tokio runtime available, periodic metrics cleanup disabled");
            return;
        };

        let weak: Weak<Self> = Arc::downgrade(collector);
        let token = collector.shutdown.clone();
        let period = collector.config.cleanup_interval;

        handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(collector) = weak.upgrade() else {
                            break;
                        };
                        collector.cleanup();
                    }
                }
            }
        });
    }

    pub fn record_request(&self, metric: RequestMetric) {
        if !self.config.enabled {
            return;
        }

        let response_time_ms = match metric.ended_at {
            Some(ended) => Some(millis_between(metric.started_at, ended)),
            None => metric.response_time_ms,
        };

        let record = RequestRecord {
            timestamp: metric.started_at,
            url: metric.url,
            method: metric.method,
            success: metric.success,
            status_code: metric.status_code,
            error: metric.error,
            response_time_ms,
            platform: metric.platform,
            country: metric.country,
            cache_hit: metric.cache_hit,
        };

        let mut state = self.state.lock();
        state.counters.total_requests += 1;
        if record.success {
            state.counters.successful_requests += 1;
        } else {
            state.counters.failed_requests += 1;
        }
        state.requests.push(record);
    }

    /// Counts one cache lookup as a hit or a miss.
    pub fn record_cache_lookup(&self, hit: bool) {
        if !self.config.enabled {
            return;
        }

        let mut state = self.state.lock();
        if hit {
            state.counters.cache_hits += 1;
            state.cache.hits += 1;
        } else {
            state.counters.cache_misses += 1;
            state.cache.misses += 1;
        }
    }

    pub fn record_error(&self, error: &LinkError, context: BTreeMap<String, String>) {
        if !self.config.enabled {
            return;
        }

        let record = ErrorRecord {
            timestamp: self.clock.now(),
            message: error.to_string(),
            kind: error.name().to_string(),
            context,
        };
        self.state.lock().errors.push(record);
    }

    pub fn record_rate_limit(&self, delay_ms: u64) {
        if !self.config.enabled {
            return;
        }

        let timestamp = self.clock.now();
        let mut state = self.state.lock();
        state.counters.rate_limit_hits += 1;
        state.delays.push(RateLimitDelay {
            timestamp,
            delay_ms,
        });
    }

    pub fn update_cache_metrics(&self, size: usize) {
        if !self.config.enabled {
            return;
        }

        self.state.lock().cache.size = size;
    }

    /// Zeroes the cache hit/miss counters, leaving request counters intact.
    pub fn reset_cache_counters(&self) {
        let mut state = self.state.lock();
        state.counters.cache_hits = 0;
        state.counters.cache_misses = 0;
        state.cache.hits = 0;
        state.cache.misses = 0;
    }

    pub fn counters(&self) -> MetricsCounters {
        self.state.lock().counters.clone()
    }

    pub fn summary(&self) -> MetricsSummary {
        let now = self.clock.now();
        let state = self.state.lock();
        summarize(&state, now)
    }

    pub fn detailed(&self, query: &DetailedQuery) -> BTreeMap<String, MetricsBucket> {
        let now = self.clock.now();
        let state = self.state.lock();
        self.group(&state.requests, query, now)
    }

    fn group(
        &self,
        requests: &[RequestRecord],
        query: &DetailedQuery,
        now: DateTime<Utc>,
    ) -> BTreeMap<String, MetricsBucket> {
        let start = query.start.unwrap_or_else(|| now - self.retention());
        let end = query.end.unwrap_or(now);

        let mut groups: BTreeMap<String, MetricsBucket> = BTreeMap::new();
        for request in requests
            .iter()
            .filter(|r| r.timestamp >= start && r.timestamp <= end)
        {
            let key = match query.group_by {
                GroupBy::Hour => request.timestamp.format("%Y-%m-%dT%H:00:00.000Z").to_string(),
                GroupBy::Minute => request.timestamp.format("%Y-%m-%dT%H:%M:00.000Z").to_string(),
                GroupBy::Platform => request
                    .platform
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
                GroupBy::Country => request
                    .country
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
            };

            let bucket = groups.entry(key).or_default();
            bucket.requests += 1;
            if !request.success {
                bucket.errors += 1;
            }
            if let Some(rt) = request.response_time_ms.filter(|rt| *rt > 0) {
                bucket.total_response_time += rt;
                bucket.avg_response_time = bucket.total_response_time as f64 / bucket.requests as f64;
            }
        }

        groups
    }

    /// Drops records older than the retention window, then keeps only the
    /// newest `max_data_points` requests and errors.
    pub fn cleanup(&self) {
        let cutoff = self.clock.now() - self.retention();
        let max = self.config.max_data_points;

        let mut state = self.state.lock();
        state.requests.retain(|r| r.timestamp > cutoff);
        state.errors.retain(|e| e.timestamp > cutoff);
        state.delays.retain(|d| d.timestamp > cutoff);

        keep_newest(&mut state.requests, max);
        keep_newest(&mut state.errors, max);
    }

    pub fn reset(&self) {
        *self.state.lock() = MetricsState::default();
    }

    pub fn export(&self) -> MetricsExport {
        let now = self.clock.now();
        let state = self.state.lock();

        MetricsExport {
            summary: summarize(&state, now),
            detailed: self.group(&state.requests, &DetailedQuery::default(), now),
            raw: RawMetrics {
                requests: state.requests.clone(),
                errors: state.errors.clone(),
                rate_limit_delays: state.delays.clone(),
                counters: state.counters.clone(),
            },
        }
    }

    fn retention(&self) -> ChronoDuration {
        ChronoDuration::from_std(self.config.retention).unwrap_or_else(|_| ChronoDuration::days(36_500))
    }
}

impl Drop for MetricsCollector {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("config", &self.config)
            .field("counters", &self.counters())
            .finish()
    }
}

fn summarize(state: &MetricsState, now: DateTime<Utc>) -> MetricsSummary {
    let in_window = |ts: DateTime<Utc>| (now - ts).num_milliseconds() < RECENT_WINDOW_MS;

    let recent: Vec<&RequestRecord> = state
        .requests
        .iter()
        .filter(|r| in_window(r.timestamp))
        .collect();
    let recent_errors = state.errors.iter().filter(|e| in_window(e.timestamp)).count();

    let avg_response_time = if recent.is_empty() {
        0.0
    } else {
        recent
            .iter()
            .map(|r| r.response_time_ms.unwrap_or(0))
            .sum::<u64>() as f64
            / recent.len() as f64
    };

    let counters = &state.counters;
    let success_rate = if counters.total_requests > 0 {
        counters.successful_requests as f64 / counters.total_requests as f64
    } else {
        1.0
    };

    let cache_lookups = counters.cache_hits + counters.cache_misses;
    let cache_hit_rate = if cache_lookups > 0 {
        counters.cache_hits as f64 / cache_lookups as f64
    } else {
        0.0
    };

    let avg_delay = if state.delays.is_empty() {
        0
    } else {
        let total: u64 = state.delays.iter().map(|d| d.delay_ms).sum();
        (total as f64 / state.delays.len() as f64).round() as u64
    };

    MetricsSummary {
        counters: counters.clone(),
        recent: RecentMetrics {
            requests: recent.len(),
            errors: recent_errors,
            avg_response_time: avg_response_time.round() as u64,
            requests_per_minute: (recent.len() as f64 / 60.0).round() as u64,
        },
        rates: MetricsRates {
            success_rate: round2(success_rate),
            cache_hit_rate: round2(cache_hit_rate),
            error_rate: round2(1.0 - success_rate),
        },
        cache: state.cache.clone(),
        rate_limits: RateLimitMetrics {
            hits: counters.rate_limit_hits,
            avg_delay,
        },
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn millis_between(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    (end - start).num_milliseconds().max(0) as u64
}

fn keep_newest<T>(records: &mut Vec<T>, max: usize) {
    if records.len() > max {
        let excess = records.len() - max;
        records.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::time::ManualClock;
    use chrono::TimeZone;

    fn fixed_clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 10, 14, 25, 30).unwrap())
    }

    fn collector(clock: &ManualClock) -> Arc<MetricsCollector> {
        MetricsCollector::new(MetricsConfig::default(), Arc::new(clock.clone()))
    }

    fn request(clock: &ManualClock, response_ms: u64) -> RequestMetric {
        RequestMetric::new("https://api.song.link/v1-alpha.1/links?url=a", clock.now())
            .response_time_ms(response_ms)
    }

    #[test]
    fn test_empty_summary_is_well_formed() {
        let clock = fixed_clock();
        let summary = collector(&clock).summary();

        assert_eq!(summary.counters, MetricsCounters::default());
        assert_eq!(summary.recent, RecentMetrics::default());
        assert_eq!(summary.rates.success_rate, 1.0);
        assert_eq!(summary.rates.cache_hit_rate, 0.0);
        assert_eq!(summary.rates.error_rate, 0.0);
        assert_eq!(summary.rate_limits, RateLimitMetrics::default());
    }

    #[test]
    fn test_record_request_counters_and_rates() {
        let clock = fixed_clock();
        let metrics = collector(&clock);

        metrics.record_request(request(&clock, 100));
        metrics.record_request(request(&clock, 200));
        metrics.record_request(request(&clock, 301).failed("HTTP 500: Internal Server Error"));

        let summary = metrics.summary();
        assert_eq!(summary.counters.total_requests, 3);
        assert_eq!(summary.counters.successful_requests, 2);
        assert_eq!(summary.counters.failed_requests, 1);
        assert_eq!(summary.recent.requests, 3);
        assert_eq!(summary.recent.avg_response_time, 200);
        assert_eq!(summary.recent.requests_per_minute, 0);
        assert_eq!(summary.rates.success_rate, 0.67);
        assert_eq!(summary.rates.error_rate, 0.33);
    }

    #[test]
    fn test_response_time_from_end_timestamp() {
        let clock = fixed_clock();
        let metrics = collector(&clock);
        let started = clock.now();
        clock.advance(Duration::from_millis(250));

        metrics.record_request(RequestMetric::new("u", started).ended_at(clock.now()));

        let export = metrics.export();
        assert_eq!(export.raw.requests[0].response_time_ms, Some(250));
    }

    #[test]
    fn test_cache_lookup_counters() {
        let clock = fixed_clock();
        let metrics = collector(&clock);

        metrics.record_cache_lookup(true);
        metrics.record_cache_lookup(false);
        metrics.record_cache_lookup(false);
        metrics.record_request(request(&clock, 5).cache_hit(true));
        metrics.update_cache_metrics(7);

        let summary = metrics.summary();
        assert_eq!(summary.counters.cache_hits, 1);
        assert_eq!(summary.counters.cache_misses, 2);
        assert_eq!(summary.rates.cache_hit_rate, 0.33);
        assert_eq!(
            summary.cache,
            CacheMetrics {
                hits: 1,
                misses: 2,
                size: 7
            }
        );

        metrics.reset_cache_counters();
        let summary = metrics.summary();
        assert_eq!(summary.counters.cache_hits, 0);
        assert_eq!(summary.counters.total_requests, 1);
    }

    #[test]
    fn test_recent_window_excludes_old_requests() {
        let clock = fixed_clock();
        let metrics = collector(&clock);

        metrics.record_request(request(&clock, 10));
        clock.advance(Duration::from_secs(61 * 60));
        metrics.record_request(request(&clock, 30));

        let summary = metrics.summary();
        assert_eq!(summary.counters.total_requests, 2);
        assert_eq!(summary.recent.requests, 1);
        assert_eq!(summary.recent.avg_response_time, 30);
    }

    #[test]
    fn test_rate_limit_average_delay() {
        let clock = fixed_clock();
        let metrics = collector(&clock);

        metrics.record_rate_limit(1000);
        metrics.record_rate_limit(2001);

        let summary = metrics.summary();
        assert_eq!(summary.counters.rate_limit_hits, 2);
        assert_eq!(summary.rate_limits.avg_delay, 1501);
    }

    #[test]
    fn test_record_error_uses_taxonomy_name() {
        let clock = fixed_clock();
        let metrics = collector(&clock);
        let context = BTreeMap::from([("platform".to_string(), "spotify".to_string())]);

        metrics.record_error(&LinkError::Timeout { timeout_ms: 50 }, context);

        let export = metrics.export();
        assert_eq!(export.summary.recent.errors, 1);
        assert_eq!(export.raw.errors[0].kind, "TimeoutError");
        assert_eq!(export.raw.errors[0].message, "Request timeout after 50ms");
        assert_eq!(
            export.raw.errors[0].context.get("platform"),
            Some(&"spotify".to_string())
        );
    }

    #[test]
    fn test_detailed_grouping_keys() {
        let clock = fixed_clock();
        let metrics = collector(&clock);

        metrics.record_request(
            request(&clock, 100)
                .platform(Some("spotify".into()))
                .country(Some("US".into())),
        );
        metrics.record_request(request(&clock, 300).failed("boom"));

        let by_hour = metrics.detailed(&DetailedQuery::default());
        let bucket = &by_hour["2024-03-10T14:00:00.000Z"];
        assert_eq!(bucket.requests, 2);
        assert_eq!(bucket.errors, 1);
        assert_eq!(bucket.total_response_time, 400);
        assert_eq!(bucket.avg_response_time, 200.0);

        let by_minute = metrics.detailed(&DetailedQuery::grouped_by(GroupBy::Minute));
        assert!(by_minute.contains_key("2024-03-10T14:25:00.000Z"));

        let by_platform = metrics.detailed(&DetailedQuery::grouped_by(GroupBy::Platform));
        assert_eq!(by_platform["spotify"].requests, 1);
        assert_eq!(by_platform["unknown"].requests, 1);

        let by_country = metrics.detailed(&DetailedQuery::grouped_by(GroupBy::Country));
        assert_eq!(by_country["US"].requests, 1);
    }

    #[test]
    fn test_detailed_respects_range() {
        let clock = fixed_clock();
        let metrics = collector(&clock);
        let start = clock.now();

        metrics.record_request(request(&clock, 1));
        clock.advance(Duration::from_secs(3600));
        metrics.record_request(request(&clock, 1));

        let query = DetailedQuery::grouped_by(GroupBy::Platform)
            .between(start, start + ChronoDuration::minutes(30));
        assert_eq!(metrics.detailed(&query)["unknown"].requests, 1);
    }

    #[test]
    fn test_cleanup_prunes_by_age_and_count() {
        let clock = fixed_clock();
        let metrics = MetricsCollector::new(
            MetricsConfig {
                retention: Duration::from_secs(60),
                max_data_points: 2,
                ..MetricsConfig::default()
            },
            Arc::new(clock.clone()),
        );

        metrics.record_request(request(&clock, 1));
        clock.advance(Duration::from_secs(120));
        for ms in [2, 3, 4] {
            metrics.record_request(request(&clock, ms));
        }

        metrics.cleanup();

        let raw = metrics.export().raw;
        let kept: Vec<_> = raw.requests.iter().map(|r| r.response_time_ms).collect();
        assert_eq!(kept, vec![Some(3), Some(4)]);
        // Counters are lifetime totals and survive pruning.
        assert_eq!(raw.counters.total_requests, 4);
    }

    #[test]
    fn test_reset() {
        let clock = fixed_clock();
        let metrics = collector(&clock);
        metrics.record_request(request(&clock, 1));
        metrics.record_rate_limit(10);

        metrics.reset();

        let export = metrics.export();
        assert!(export.raw.requests.is_empty());
        assert!(export.raw.rate_limit_delays.is_empty());
        assert_eq!(export.raw.counters, MetricsCounters::default());
    }

    #[test]
    fn test_disabled_collector_ignores_records() {
        let clock = fixed_clock();
        let metrics = MetricsCollector::disabled(Arc::new(clock.clone()));

        metrics.record_request(request(&clock, 1));
        metrics.record_cache_lookup(true);
        metrics.record_rate_limit(100);
        metrics.record_error(&LinkError::MalformedResponse, BTreeMap::new());
        metrics.update_cache_metrics(3);

        let summary = metrics.summary();
        assert!(!metrics.is_enabled());
        assert_eq!(summary.counters, MetricsCounters::default());
        assert_eq!(summary.cache.size, 0);
        assert_eq!(summary.rates.success_rate, 1.0);
    }

    #[test]
    fn test_export_serializes() {
        let clock = fixed_clock();
        let metrics = collector(&clock);
        metrics.record_request(request(&clock, 12));

        let json = serde_json::to_value(metrics.export()).unwrap();
        assert_eq!(json["summary"]["counters"]["totalRequests"], 1);
        assert_eq!(json["raw"]["requests"][0]["responseTimeMs"], 12);
        assert!(json["detailed"]["2024-03-10T14:00:00.000Z"].is_object());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_cleanup_runs_and_stops_on_drop() {
        let clock = fixed_clock();
        let metrics = MetricsCollector::new(
            MetricsConfig {
                retention: Duration::from_secs(30),
                cleanup_interval: Duration::from_secs(60),
                ..MetricsConfig::default()
            },
            Arc::new(clock.clone()),
        );

        metrics.record_request(request(&clock, 1));
        clock.advance(Duration::from_secs(45));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(metrics.export().raw.requests.is_empty());

        let weak = Arc::downgrade(&metrics);
        drop(metrics);
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(weak.upgrade().is_none());
    }
}
