//! # Link Client
//!
//! Public entry point for resolving a song or album into links on every
//! supported platform.
//!
//! ## Usage
//!
//! ```ignore
//! use core_links::{FetchOptions, LinkClient};
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder().build()?;
//! let client = LinkClient::new(config);
//!
//! let result = client
//!     .fetch(
//!         "https://open.spotify.com/track/4Km5HrUvYTaSUfiSGPJeQR",
//!         &FetchOptions::default().with_country("GB"),
//!     )
//!     .await?;
//!
//! if let Some(song) = result.found() {
//!     println!("{:?} by {:?}", song.title, song.artist);
//! }
//! ```
//!
//! ## Lookups
//!
//! - [`LinkClient::fetch`]: by share URL
//! - [`LinkClient::get_by_params`]: by platform, entity type and platform ID
//! - [`LinkClient::get_by_id`]: by entity ID (`SPOTIFY_SONG::<id>`)
//! - [`LinkClient::fetch_batch`]: many share URLs, one result per input
//!
//! Empty inputs are always rejected. Format checks on URLs, countries,
//! platforms and entity types run when `validate_params` is enabled.

use crate::batch::BatchOrchestrator;
use crate::cache::{ResponseCache, CACHE_TTL};
use crate::country::{is_supported_country, supported_countries};
use crate::error::{LinkError, Result};
use crate::executor::{RequestExecutor, RequestOptions};
use crate::metrics::{MetricsCollector, MetricsConfig, MetricsSummary};
use crate::normalize::normalize;
use crate::platform::{self, Platform};
use crate::rate_limiter::RateLimiter;
use crate::types::{BatchItemResult, CacheStats, EntityType, FetchOptions, LookupResult};
use bridge_traits::time::Clock;
use core_runtime::config::{CoreConfig, FeatureFlags};
use core_runtime::events::EventBus;
use once_cell::sync::Lazy;
use regex::Regex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, instrument};
use url::Url;

const ENTITY_ID_FORMAT_MESSAGE: &str =
    "Provided Entity ID Does not match format. `<PLATFORM>_<SONG|ALBUM>::<UNIQUEID>`";

static ENTITY_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\w+_\w+::[\w.\-]+$").expect("valid regex"));

pub struct LinkClient {
    executor: RequestExecutor,
    cache: Option<Arc<ResponseCache>>,
    metrics: Arc<MetricsCollector>,
    features: FeatureFlags,
    clock: Arc<dyn Clock>,
}

impl LinkClient {
    /// Build a client with its own metrics collector, enabled per
    /// `features.enable_metrics`.
    pub fn new(config: CoreConfig) -> Self {
        let metrics_config = if config.features.enable_metrics {
            MetricsConfig::default()
        } else {
            MetricsConfig::disabled()
        };
        let metrics = MetricsCollector::new(metrics_config, config.clock.clone());
        Self::with_metrics(config, metrics)
    }

    /// Build a client reporting into a caller supplied collector.
    pub fn with_metrics(config: CoreConfig, metrics: Arc<MetricsCollector>) -> Self {
        let CoreConfig {
            http_client,
            clock,
            sleeper,
            lookup_api,
            features,
            cache_max_entries,
            ..
        } = config;

        let cache = features.enable_cache.then(|| {
            Arc::new(
                ResponseCache::new(clock.clone(), cache_max_entries.and_then(NonZeroUsize::new))
                    .with_metrics(metrics.clone()),
            )
        });

        let mut executor = RequestExecutor::new(
            http_client,
            clock.clone(),
            sleeper,
            lookup_api,
            metrics.clone(),
        );
        if let Some(cache) = &cache {
            executor = executor.with_cache(cache.clone());
        }

        Self {
            executor,
            cache,
            metrics,
            features,
            clock,
        }
    }

    /// Publish request lifecycle events on `events`.
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.executor = self.executor.with_event_bus(events);
        self
    }

    /// Throttle every outbound request through `limiter`. The limiter may be
    /// shared between clients hitting the same quota.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.executor = self.executor.with_rate_limiter(limiter);
        self
    }

    /// Look up a song or album by its share URL on any supported platform.
    #[instrument(skip(self, options), fields(country = %options.country))]
    pub async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<LookupResult> {
        let url = url.trim();
        if url.is_empty() {
            return Err(LinkError::validation("No URL was provided to fetch()"));
        }

        if self.features.validate_params {
            validate_url(url)?;
            validate_country(&options.country)?;
        }

        let platform = platform::detect_platform(url).map(|p| p.as_str().to_string());
        debug!(platform = ?platform, "Fetching links by URL");

        let path = format!(
            "links?url={}&userCountry={}",
            urlencoding::encode(url),
            urlencoding::encode(&options.country)
        );
        let payload = self
            .executor
            .execute(&path, &self.request_options(options, platform))
            .await?;

        Ok(normalize(payload))
    }

    /// Look up many share URLs, `options.concurrency` at a time.
    ///
    /// Never fails as a whole: every input yields either a success or a
    /// [`BatchFailure`](crate::types::BatchFailure), in input order.
    pub async fn fetch_batch<S: AsRef<str>>(
        &self,
        urls: &[S],
        options: &FetchOptions,
    ) -> Vec<BatchItemResult> {
        BatchOrchestrator::new(self.clock.clone(), options.concurrency)
            .run(urls, |url| async move { self.fetch(&url, options).await })
            .await
    }

    /// Look up an entity by platform, entity type and platform specific ID.
    ///
    /// A full entity ID (`SPOTIFY_SONG::abc`) is accepted as `id`; only the
    /// part after the last `::` is sent.
    #[instrument(skip(self, options), fields(country = %options.country))]
    pub async fn get_by_params(
        &self,
        platform: &str,
        entity_type: &str,
        id: &str,
        options: &FetchOptions,
    ) -> Result<LookupResult> {
        if platform.is_empty() {
            return Err(LinkError::validation(
                "No `platform` was provided to get_by_params()",
            ));
        }
        if entity_type.is_empty() {
            return Err(LinkError::validation(
                "No `type` was provided to get_by_params()",
            ));
        }
        if id.is_empty() {
            return Err(LinkError::validation(
                "No `id` was provided to get_by_params()",
            ));
        }

        let (platform, entity_type) = if self.features.validate_params {
            let platform = platform.parse::<Platform>()?;
            let entity_type = entity_type.parse::<EntityType>()?;
            validate_country(&options.country)?;
            (platform.as_str().to_string(), entity_type.as_str().to_string())
        } else {
            (platform.to_string(), entity_type.to_string())
        };

        let unique_id = id.rsplit_once("::").map_or(id, |(_, unique)| unique);
        self.lookup_by_params(&platform, &entity_type, unique_id, options)
            .await
    }

    /// Look up an entity by its `<PLATFORM>_<TYPE>::<UNIQUEID>` identifier.
    #[instrument(skip(self, options), fields(country = %options.country))]
    pub async fn get_by_id(&self, entity_id: &str, options: &FetchOptions) -> Result<LookupResult> {
        if entity_id.is_empty() {
            return Err(LinkError::validation(
                "No `id` was provided to get_by_id()",
            ));
        }
        let (platform, entity_type, unique_id) =
            parse_entity_id(entity_id).ok_or_else(|| LinkError::validation(ENTITY_ID_FORMAT_MESSAGE))?;

        if self.features.validate_params {
            validate_country(&options.country)?;
        }

        self.lookup_by_params(&platform, &entity_type, unique_id, options)
            .await
    }

    async fn lookup_by_params(
        &self,
        platform: &str,
        entity_type: &str,
        unique_id: &str,
        options: &FetchOptions,
    ) -> Result<LookupResult> {
        debug!(platform, entity_type, unique_id, "Fetching links by entity");

        let path = format!(
            "links?platform={}&type={}&id={}&userCountry={}",
            urlencoding::encode(platform),
            urlencoding::encode(entity_type),
            urlencoding::encode(unique_id),
            urlencoding::encode(&options.country)
        );
        let payload = self
            .executor
            .execute(&path, &self.request_options(options, Some(platform.to_string())))
            .await?;

        Ok(normalize(payload))
    }

    fn request_options(&self, options: &FetchOptions, platform: Option<String>) -> RequestOptions {
        RequestOptions {
            skip_cache: options.skip_cache,
            timeout_ms: options.timeout_ms,
            platform,
            country: Some(options.country.clone()),
        }
    }

    /// Drop every cached response and zero the cache counters.
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    /// Cache size and TTL merged with the hit/miss counters.
    pub fn cache_stats(&self) -> CacheStats {
        let (size, ttl) = match &self.cache {
            Some(cache) => {
                cache.purge_expired();
                let stats = cache.stats();
                (stats.size, stats.ttl_ms)
            }
            None => (0, CACHE_TTL.as_millis() as u64),
        };

        let counters = self.metrics.counters();
        let lookups = counters.cache_hits + counters.cache_misses;
        let hit_rate = if lookups > 0 {
            (counters.cache_hits as f64 / lookups as f64 * 100.0).round() / 100.0
        } else {
            0.0
        };

        CacheStats {
            size,
            ttl,
            hit_count: counters.cache_hits,
            miss_count: counters.cache_misses,
            hit_rate,
            total_requests: counters.total_requests,
        }
    }

    pub fn metrics(&self) -> MetricsSummary {
        self.metrics.summary()
    }

    pub fn metrics_collector(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.executor.rate_limiter()
    }

    pub fn detect_platform(&self, url: &str) -> Option<Platform> {
        platform::detect_platform(url)
    }

    pub fn extract_id(&self, url: &str) -> Option<String> {
        platform::extract_id(url)
    }

    pub fn supported_platforms(&self) -> &'static [Platform] {
        &Platform::ALL
    }

    pub fn supported_countries(&self) -> &'static [&'static str] {
        supported_countries()
    }

    /// The `User-Agent` sent with every request.
    pub fn user_agent(&self) -> String {
        self.executor.api_config().user_agent()
    }
}

impl std::fmt::Debug for LinkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkClient")
            .field("executor", &self.executor)
            .field("features", &self.features)
            .finish()
    }
}

fn validate_url(url: &str) -> Result<()> {
    match Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        _ => Err(LinkError::validation(format!("Invalid URL: {}", url))),
    }
}

fn validate_country(country: &str) -> Result<()> {
    if is_supported_country(country) {
        Ok(())
    } else {
        Err(LinkError::validation(format!(
            "Invalid country code: {}",
            country
        )))
    }
}

/// Split an entity ID into lowercased platform, lowercased type and the
/// unique ID. Known platforms are returned under their service name.
fn parse_entity_id(entity_id: &str) -> Option<(String, String, &str)> {
    if !ENTITY_ID.is_match(entity_id) {
        return None;
    }

    let (prefix, unique_id) = entity_id.rsplit_once("::")?;
    let (platform, _) = prefix.split_once('_')?;
    let (_, entity_type) = prefix.rsplit_once('_')?;

    let platform = Platform::from_name_ignore_case(platform)
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| platform.to_lowercase());

    Some((platform, entity_type.to_lowercase(), unique_id))
}
