//! # Core Links
//!
//! Resolves a song or album into its links on every supported streaming
//! platform through the song.link lookup API.
//!
//! ## Components
//!
//! - [`LinkClient`](client::LinkClient): lookups by URL, by platform ID and
//!   by entity ID, plus batch lookups
//! - [`RequestExecutor`](executor::RequestExecutor): caching, throttling,
//!   timeouts and retries around a single lookup request
//! - [`ResponseCache`](cache::ResponseCache): TTL cache of raw responses
//! - [`RateLimiter`](rate_limiter::RateLimiter): token bucket, sliding window
//!   and leaky bucket throttling
//! - [`MetricsCollector`](metrics::MetricsCollector): request, error, cache and
//!   rate limit statistics
//! - [`BatchOrchestrator`](batch::BatchOrchestrator): chunked fan-out with
//!   per-item failure records
//!
//! Host capabilities (HTTP, clock, sleep) come from `bridge-traits` and are
//! wired through [`core_runtime::config::CoreConfig`].

pub mod batch;
pub mod cache;
pub mod client;
pub mod country;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod normalize;
pub mod platform;
pub mod rate_limiter;
pub mod types;

pub use batch::BatchOrchestrator;
pub use cache::{ResponseCache, ResponseCacheStats, CACHE_TTL};
pub use client::LinkClient;
pub use error::{ErrorKind, LinkError, Result};
pub use executor::{RequestExecutor, RequestOptions};
pub use metrics::{
    DetailedQuery, GroupBy, MetricsCollector, MetricsConfig, MetricsExport, MetricsSummary,
    RequestMetric,
};
pub use platform::{detect_platform, extract_id, Platform};
pub use rate_limiter::{RateLimitStrategy, RateLimiter, RateLimiterConfig, RateLimiterStatus};
pub use types::{
    BatchFailure, BatchItemResult, CacheStats, EntityData, EntityType, FetchOptions,
    LookupResult, NormalizedResult, PlatformLink, DEFAULT_CONCURRENCY, DEFAULT_COUNTRY,
};
