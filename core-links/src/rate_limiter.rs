//! # Client-side Rate Limiting
//!
//! Throttles outbound lookups before they reach the upstream quota.
//!
//! Three strategies are available:
//!
//! - **Token bucket**: `max_requests` tokens, refilled in whole-window steps.
//!   Bursts up to the capacity are admitted immediately.
//! - **Sliding window**: at most `max_requests` admissions in any trailing
//!   `window`.
//! - **Leaky bucket**: a constant minimum spacing of `window / max_requests`
//!   between admissions.
//!
//! Waiters pass through a FIFO admission gate, so concurrent callers are
//! admitted in arrival order whichever strategy is in use. All waiting goes
//! through the injected [`Sleeper`] and all time reads through the injected
//! [`Clock`].

use crate::error::{LinkError, Result};
use crate::metrics::MetricsCollector;
use bridge_traits::time::{Clock, Sleeper};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Cool-down applied after an upstream 429 when no retry hint is given.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RateLimitStrategy {
    #[default]
    TokenBucket,
    SlidingWindow,
    LeakyBucket,
}

impl RateLimitStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitStrategy::TokenBucket => "token-bucket",
            RateLimitStrategy::SlidingWindow => "sliding-window",
            RateLimitStrategy::LeakyBucket => "leaky-bucket",
        }
    }
}

impl fmt::Display for RateLimitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RateLimitStrategy {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "token-bucket" => Ok(RateLimitStrategy::TokenBucket),
            "sliding-window" => Ok(RateLimitStrategy::SlidingWindow),
            "leaky-bucket" => Ok(RateLimitStrategy::LeakyBucket),
            other => Err(LinkError::validation(format!(
                "Unknown rate limit strategy: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterConfig {
    pub max_requests: u32,
    pub window: Duration,
    pub strategy: RateLimitStrategy,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window: Duration::from_secs(60),
            strategy: RateLimitStrategy::TokenBucket,
        }
    }
}

impl RateLimiterConfig {
    pub fn new(max_requests: u32, window: Duration, strategy: RateLimitStrategy) -> Self {
        Self {
            max_requests,
            window,
            strategy,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_requests == 0 {
            return Err(LinkError::validation("max_requests must be at least 1"));
        }
        if self.window < Duration::from_millis(1) {
            return Err(LinkError::validation("window must be at least 1ms"));
        }
        Ok(())
    }
}

/// Strategy specific snapshot returned by [`RateLimiter::status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum RateLimiterStatus {
    #[serde(rename_all = "camelCase")]
    TokenBucket {
        available: u32,
        max: u32,
        used: u32,
        /// Tokens per second
        refill_rate: f64,
    },
    #[serde(rename_all = "camelCase")]
    SlidingWindow { used: usize, max: u32, window_ms: u64 },
    #[serde(rename_all = "camelCase")]
    LeakyBucket {
        queued: usize,
        processing: bool,
        max: u32,
    },
}

#[derive(Debug)]
enum LimiterState {
    TokenBucket {
        tokens: u32,
        last_refill: DateTime<Utc>,
    },
    SlidingWindow {
        admitted: VecDeque<DateTime<Utc>>,
    },
    LeakyBucket {
        next_release: Option<DateTime<Utc>>,
    },
}

pub struct RateLimiter {
    config: RateLimiterConfig,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    gate: tokio::sync::Mutex<()>,
    state: Mutex<LimiterState>,
    queued: AtomicUsize,
    metrics: Option<Arc<MetricsCollector>>,
}

impl RateLimiter {
    pub fn new(
        config: RateLimiterConfig,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self> {
        config.validate()?;

        let state = match config.strategy {
            RateLimitStrategy::TokenBucket => LimiterState::TokenBucket {
                tokens: config.max_requests,
                last_refill: clock.now(),
            },
            RateLimitStrategy::SlidingWindow => LimiterState::SlidingWindow {
                admitted: VecDeque::with_capacity(config.max_requests as usize),
            },
            RateLimitStrategy::LeakyBucket => LimiterState::LeakyBucket { next_release: None },
        };

        Ok(Self {
            config,
            clock,
            sleeper,
            gate: tokio::sync::Mutex::new(()),
            state: Mutex::new(state),
            queued: AtomicUsize::new(0),
            metrics: None,
        })
    }

    /// Record every throttling delay on `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    pub fn strategy(&self) -> RateLimitStrategy {
        self.config.strategy
    }

    /// Suspend until the strategy admits one more request.
    ///
    /// Returns how long the caller was held back (zero when admitted
    /// immediately).
    pub async fn wait_for_slot(&self) -> Duration {
        let _queued = QueuedGuard::enter(&self.queued);
        let _gate = self.gate.lock().await;

        let mut waited = Duration::ZERO;
        loop {
            let now = self.clock.now();
            match self.try_admit(now) {
                Ok(()) => break,
                Err(wait) => {
                    debug!(
                        strategy = %self.config.strategy,
                        wait_ms = wait.as_millis() as u64,
                        "Rate limit reached, waiting for slot"
                    );
                    self.sleeper.sleep(wait).await;
                    waited += wait;
                }
            }
        }

        if !waited.is_zero() {
            if let Some(metrics) = &self.metrics {
                metrics.record_rate_limit(waited.as_millis() as u64);
            }
        }

        waited
    }

    /// Cool down after the upstream answered 429.
    ///
    /// Sleeps `retry_after_secs` (60 s when absent) regardless of strategy and
    /// returns the delay applied.
    pub async fn handle_rate_limit_response(&self, retry_after_secs: Option<u64>) -> Duration {
        let delay =
            Duration::from_secs(retry_after_secs.unwrap_or(DEFAULT_RETRY_AFTER_SECS));
        warn!(delay_ms = delay.as_millis() as u64, "Upstream rate limited, cooling down");

        self.sleeper.sleep(delay).await;

        if let Some(metrics) = &self.metrics {
            metrics.record_rate_limit(delay.as_millis() as u64);
        }
        delay
    }

    pub fn status(&self) -> RateLimiterStatus {
        let now = self.clock.now();
        let max = self.config.max_requests;
        let mut state = self.state.lock();

        match &mut *state {
            LimiterState::TokenBucket { tokens, .. } => RateLimiterStatus::TokenBucket {
                available: *tokens,
                max,
                used: max - *tokens,
                refill_rate: max as f64 / self.config.window.as_secs_f64(),
            },
            LimiterState::SlidingWindow { admitted } => {
                prune(admitted, now, self.window());
                RateLimiterStatus::SlidingWindow {
                    used: admitted.len(),
                    max,
                    window_ms: self.config.window.as_millis() as u64,
                }
            }
            LimiterState::LeakyBucket { next_release } => {
                let queued = self.queued.load(Ordering::SeqCst);
                RateLimiterStatus::LeakyBucket {
                    queued,
                    processing: queued > 0 || next_release.is_some_and(|at| at > now),
                    max,
                }
            }
        }
    }

    /// Admit now, or report how long until the next admission is possible.
    fn try_admit(&self, now: DateTime<Utc>) -> std::result::Result<(), Duration> {
        let max = self.config.max_requests;
        let window = self.window();
        let mut state = self.state.lock();

        match &mut *state {
            LimiterState::TokenBucket {
                tokens,
                last_refill,
            } => {
                let elapsed = (now - *last_refill).max(chrono::Duration::zero());
                let window_us = window.num_microseconds().unwrap_or(i64::MAX).max(1);
                let windows = elapsed.num_microseconds().unwrap_or(i64::MAX) / window_us;
                if windows > 0 {
                    let added = u32::try_from(windows)
                        .unwrap_or(u32::MAX)
                        .saturating_mul(max);
                    *tokens = tokens.saturating_add(added).min(max);
                    *last_refill += chrono::Duration::microseconds(windows * window_us);
                }

                if *tokens >= 1 {
                    *tokens -= 1;
                    return Ok(());
                }

                let into_window = now - *last_refill;
                Err(positive(window - into_window))
            }
            LimiterState::SlidingWindow { admitted } => {
                prune(admitted, now, window);

                if admitted.len() < max as usize {
                    admitted.push_back(now);
                    return Ok(());
                }

                match admitted.front() {
                    Some(oldest) => Err(positive(*oldest + window - now)),
                    None => Ok(()),
                }
            }
            LimiterState::LeakyBucket { next_release } => match *next_release {
                Some(at) if at > now => Err(positive(at - now)),
                _ => {
                    *next_release = Some(now + self.spacing());
                    Ok(())
                }
            },
        }
    }

    /// Leaky bucket gap between two admissions.
    fn spacing(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.window / self.config.max_requests)
            .unwrap_or_else(|_| self.window())
    }

    fn window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.window)
            .unwrap_or_else(|_| chrono::Duration::days(1))
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("status", &self.status())
            .finish()
    }
}

fn prune(admitted: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>, window: chrono::Duration) {
    let window_start = now - window;
    while admitted.front().is_some_and(|ts| *ts <= window_start) {
        admitted.pop_front();
    }
}

/// Never ask the sleeper for less than a millisecond, so a wait always moves
/// time forward.
fn positive(wait: chrono::Duration) -> Duration {
    wait.to_std()
        .unwrap_or(Duration::ZERO)
        .max(Duration::from_millis(1))
}

/// Counts callers between arrival and admission, including cancelled ones.
struct QueuedGuard<'a>(&'a AtomicUsize);

impl<'a> QueuedGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for QueuedGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsConfig;
    use bridge_traits::time::{ManualClock, ManualSleeper};

    fn limiter(
        max: u32,
        window: Duration,
        strategy: RateLimitStrategy,
    ) -> (RateLimiter, ManualClock, ManualSleeper) {
        let clock = ManualClock::starting_now();
        let sleeper = ManualSleeper::new(clock.clone());
        let limiter = RateLimiter::new(
            RateLimiterConfig::new(max, window, strategy),
            Arc::new(clock.clone()),
            Arc::new(sleeper.clone()),
        )
        .unwrap();
        (limiter, clock, sleeper)
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!(
            "sliding-window".parse::<RateLimitStrategy>().unwrap(),
            RateLimitStrategy::SlidingWindow
        );
        assert_eq!(
            RateLimitStrategy::LeakyBucket.to_string(),
            "leaky-bucket"
        );
        assert!("fixed-window".parse::<RateLimitStrategy>().is_err());
    }

    #[test]
    fn test_config_validation() {
        let clock = ManualClock::starting_now();
        let sleeper = ManualSleeper::new(clock.clone());
        let result = RateLimiter::new(
            RateLimiterConfig::new(0, Duration::from_secs(1), RateLimitStrategy::TokenBucket),
            Arc::new(clock),
            Arc::new(sleeper),
        );
        assert!(result.is_err());
        assert!(RateLimiterConfig::default().validate().is_ok());

        let sub_millisecond =
            RateLimiterConfig::new(1, Duration::from_micros(500), RateLimitStrategy::TokenBucket);
        assert_eq!(
            sub_millisecond.validate().unwrap_err().to_string(),
            "window must be at least 1ms"
        );
    }

    #[tokio::test]
    async fn test_token_bucket_fractional_millisecond_window() {
        let (limiter, clock, _sleeper) =
            limiter(1, Duration::from_micros(1500), RateLimitStrategy::TokenBucket);

        assert_eq!(limiter.wait_for_slot().await, Duration::ZERO);
        clock.advance(Duration::from_micros(3100));
        // Two whole windows elapsed; 100us of the third is kept.
        assert_eq!(limiter.wait_for_slot().await, Duration::ZERO);
        assert_eq!(limiter.wait_for_slot().await, Duration::from_micros(1400));
    }

    #[tokio::test]
    async fn test_leaky_bucket_spacing_with_huge_max() {
        let (limiter, _clock, sleeper) =
            limiter(u32::MAX, Duration::from_secs(60), RateLimitStrategy::LeakyBucket);

        assert_eq!(limiter.wait_for_slot().await, Duration::ZERO);
        // The gap is a few nanoseconds, rounded up to the minimum wait.
        assert_eq!(limiter.wait_for_slot().await, Duration::from_millis(1));
        assert_eq!(sleeper.sleeps(), vec![Duration::from_millis(1)]);
    }

    #[tokio::test]
    async fn test_token_bucket_burst_then_wait_for_window() {
        let (limiter, _clock, sleeper) =
            limiter(2, Duration::from_secs(60), RateLimitStrategy::TokenBucket);

        assert_eq!(limiter.wait_for_slot().await, Duration::ZERO);
        assert_eq!(limiter.wait_for_slot().await, Duration::ZERO);
        assert_eq!(limiter.wait_for_slot().await, Duration::from_secs(60));
        assert_eq!(sleeper.sleeps(), vec![Duration::from_secs(60)]);

        match limiter.status() {
            RateLimiterStatus::TokenBucket {
                available,
                max,
                used,
                refill_rate,
            } => {
                assert_eq!(available, 1);
                assert_eq!(max, 2);
                assert_eq!(used, 1);
                assert!((refill_rate - 2.0 / 60.0).abs() < f64::EPSILON);
            }
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_token_bucket_keeps_partial_window_progress() {
        let (limiter, clock, sleeper) =
            limiter(1, Duration::from_secs(10), RateLimitStrategy::TokenBucket);

        limiter.wait_for_slot().await;
        clock.advance(Duration::from_secs(15));
        // One full window elapsed: refilled, boundary moves to +10s.
        assert_eq!(limiter.wait_for_slot().await, Duration::ZERO);
        // Next boundary is 5s away, not a full window.
        assert_eq!(limiter.wait_for_slot().await, Duration::from_secs(5));
        assert_eq!(sleeper.total_slept(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_sliding_window_waits_for_oldest_to_expire() {
        let (limiter, clock, _sleeper) =
            limiter(2, Duration::from_secs(10), RateLimitStrategy::SlidingWindow);

        limiter.wait_for_slot().await;
        clock.advance(Duration::from_secs(3));
        limiter.wait_for_slot().await;

        assert_eq!(limiter.wait_for_slot().await, Duration::from_secs(7));
        assert_eq!(
            limiter.status(),
            RateLimiterStatus::SlidingWindow {
                used: 2,
                max: 2,
                window_ms: 10_000
            }
        );
    }

    #[tokio::test]
    async fn test_sliding_window_never_exceeds_max_in_window() {
        let (limiter, clock, _sleeper) =
            limiter(3, Duration::from_secs(1), RateLimitStrategy::SlidingWindow);
        let mut admissions = Vec::new();

        for _ in 0..10 {
            limiter.wait_for_slot().await;
            admissions.push(clock.now());
        }

        for (i, at) in admissions.iter().enumerate() {
            let in_window = admissions[i..]
                .iter()
                .filter(|later| (**later - *at).num_milliseconds() < 1000)
                .count();
            assert!(in_window <= 3, "window starting at #{} admitted {}", i, in_window);
        }
    }

    #[tokio::test]
    async fn test_leaky_bucket_spacing() {
        let (limiter, _clock, sleeper) =
            limiter(4, Duration::from_secs(1), RateLimitStrategy::LeakyBucket);

        assert_eq!(limiter.wait_for_slot().await, Duration::ZERO);
        assert_eq!(limiter.wait_for_slot().await, Duration::from_millis(250));
        assert_eq!(limiter.wait_for_slot().await, Duration::from_millis(250));
        assert_eq!(sleeper.total_slept(), Duration::from_millis(500));

        match limiter.status() {
            RateLimiterStatus::LeakyBucket {
                queued,
                processing,
                max,
            } => {
                assert_eq!(queued, 0);
                assert!(processing);
                assert_eq!(max, 4);
            }
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_leaky_bucket_idle_after_spacing_elapses() {
        let (limiter, clock, _sleeper) =
            limiter(2, Duration::from_secs(1), RateLimitStrategy::LeakyBucket);

        limiter.wait_for_slot().await;
        clock.advance(Duration::from_millis(500));

        assert_eq!(
            limiter.status(),
            RateLimiterStatus::LeakyBucket {
                queued: 0,
                processing: false,
                max: 2
            }
        );
    }

    #[tokio::test]
    async fn test_concurrent_waiters_admitted_in_arrival_order() {
        let (limiter, _clock, _sleeper) =
            limiter(1, Duration::from_secs(1), RateLimitStrategy::SlidingWindow);
        let order = Mutex::new(Vec::new());

        let waiters = (0..4).map(|i| {
            let limiter = &limiter;
            let order = &order;
            async move {
                limiter.wait_for_slot().await;
                order.lock().push(i);
            }
        });
        futures::future::join_all(waiters).await;

        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_delays_recorded_on_metrics() {
        let clock = ManualClock::starting_now();
        let sleeper = ManualSleeper::new(clock.clone());
        let metrics = MetricsCollector::new(MetricsConfig::default(), Arc::new(clock.clone()));
        let limiter = RateLimiter::new(
            RateLimiterConfig::new(1, Duration::from_secs(2), RateLimitStrategy::LeakyBucket),
            Arc::new(clock.clone()),
            Arc::new(sleeper.clone()),
        )
        .unwrap()
        .with_metrics(metrics.clone());

        limiter.wait_for_slot().await;
        limiter.wait_for_slot().await;
        limiter.handle_rate_limit_response(None).await;

        let summary = metrics.summary();
        assert_eq!(summary.counters.rate_limit_hits, 2);
        assert_eq!(summary.rate_limits.avg_delay, 31_000);
    }

    #[tokio::test]
    async fn test_handle_rate_limit_response_uses_hint() {
        let (limiter, _clock, sleeper) =
            limiter(5, Duration::from_secs(60), RateLimitStrategy::TokenBucket);

        assert_eq!(
            limiter.handle_rate_limit_response(Some(3)).await,
            Duration::from_secs(3)
        );
        assert_eq!(
            limiter.handle_rate_limit_response(None).await,
            Duration::from_secs(60)
        );
        assert_eq!(
            sleeper.sleeps(),
            vec![Duration::from_secs(3), Duration::from_secs(60)]
        );
    }

    #[test]
    fn test_status_serializes_with_strategy_tag() {
        let status = RateLimiterStatus::SlidingWindow {
            used: 1,
            max: 10,
            window_ms: 60_000,
        };
        let json = serde_json::to_value(status).unwrap();
        assert_eq!(json["strategy"], "sliding-window");
        assert_eq!(json["windowMs"], 60_000);
    }
}
