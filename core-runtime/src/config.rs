//! # Core Configuration Module
//!
//! Provides configuration management for the link lookup client.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds the injected bridges (HTTP transport, clock, sleeper)
//! and the lookup API settings. It enforces fail-fast validation so a client
//! is never constructed with a missing transport or nonsensical limits.
//!
//! ## Dependencies
//!
//! - `HttpClient` - Required. Desktop default (reqwest) is injected when the
//!   `desktop-shims` feature is enabled.
//! - `Clock` - Optional, defaults to `SystemClock`.
//! - `Sleeper` - Optional, defaults to `TokioSleeper`.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, LookupApiConfig};
//!
//! let config = CoreConfig::builder()
//!     .lookup_api(
//!         LookupApiConfig::new()
//!             .with_api_key("your-api-key")
//!             .with_timeout_ms(5_000),
//!     )
//!     .cache_enabled(true)
//!     .build()
//!     .expect("Failed to build config");
//! ```
//!
//! ## Error Handling
//!
//! Without the `desktop-shims` feature and without an explicit HTTP client the
//! builder fails with an actionable [`Error::CapabilityMissing`].

use crate::error::{Error, Result};
use crate::logging::redact_if_sensitive;
use bridge_traits::{Clock, HttpClient, RetryPolicy, Sleeper, SystemClock, TokioSleeper};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Upstream API version used when none is configured.
pub const DEFAULT_API_VERSION: &str = "v1-alpha.1";

/// Canonical lookup host.
pub const DEFAULT_BASE_URL: &str = "https://api.song.link";

/// Per-attempt request timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Total attempts per request, including the first one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base backoff delay, doubled on every retry.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

/// Upper bound for any single backoff sleep.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// `User-Agent` sent when the caller does not provide one.
pub const DEFAULT_USER_AGENT: &str = concat!("songlink-rs/", env!("CARGO_PKG_VERSION"));

const MAX_TIMEOUT_MS: u64 = 5 * 60 * 1000;

/// Settings for the upstream lookup service.
///
/// # Example
///
/// ```no_run
/// use core_runtime::config::LookupApiConfig;
///
/// let config = LookupApiConfig::new()
///     .with_api_key("your-api-key")
///     .with_max_retries(5)
///     .with_header("X-Client", "my-app/1.0");
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct LookupApiConfig {
    /// Optional key appended to every request as `&key=`.
    ///
    /// Without a key the upstream allows 10 requests per minute.
    pub api_key: Option<String>,

    /// API version path segment
    pub version: String,

    /// Scheme and host of the lookup service, without a trailing slash
    pub base_url: String,

    /// Per-attempt timeout in milliseconds
    pub timeout_ms: u64,

    /// Total attempts per request
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds
    pub retry_delay_ms: u64,

    /// Extra headers sent with every request; these win over the defaults
    pub headers: HashMap<String, String>,
}

impl Default for LookupApiConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LookupApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LookupApiConfig")
            .field(
                "api_key",
                &self
                    .api_key
                    .as_deref()
                    .map(|key| redact_if_sensitive("api_key", key)),
            )
            .field("version", &self.version)
            .field("base_url", &self.base_url)
            .field("timeout_ms", &self.timeout_ms)
            .field("max_retries", &self.max_retries)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("headers", &self.headers)
            .finish()
    }
}

impl LookupApiConfig {
    /// Creates a config pointing at the public service with default limits
    pub fn new() -> Self {
        Self {
            api_key: None,
            version: DEFAULT_API_VERSION.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            headers: HashMap::new(),
        }
    }

    /// Sets the API key. Empty strings are treated as "no key".
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let key = api_key.into();
        self.api_key = if key.is_empty() { None } else { Some(key) };
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay_ms(mut self, retry_delay_ms: u64) -> Self {
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(Error::Config("API version cannot be empty".to_string()));
        }

        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "Base URL must start with http:// or https://, got '{}'",
                self.base_url
            )));
        }

        if self.timeout_ms == 0 {
            return Err(Error::Config(
                "Request timeout must be greater than 0ms".to_string(),
            ));
        }

        if self.timeout_ms > MAX_TIMEOUT_MS {
            return Err(Error::Config(
                "Request timeout exceeds maximum of 5 minutes (300,000ms)".to_string(),
            ));
        }

        if self.max_retries == 0 {
            return Err(Error::Config(
                "max_retries must allow at least one attempt".to_string(),
            ));
        }

        Ok(())
    }

    /// Checks if an API key is configured
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Per-attempt timeout as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Backoff schedule derived from `max_retries` and `retry_delay_ms`
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            base_delay: Duration::from_millis(self.retry_delay_ms),
            max_delay: MAX_RETRY_DELAY,
            use_exponential_backoff: true,
        }
    }

    /// The `User-Agent` actually sent: a caller supplied header wins.
    pub fn user_agent(&self) -> String {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("user-agent"))
            .map(|(_, value)| value.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }
}

/// Feature flags control optional behavior of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Cache successful responses for five minutes
    pub enable_cache: bool,

    /// Validate URLs, platforms, types and country codes before any request
    pub validate_params: bool,

    /// Record request, error and cache metrics
    pub enable_metrics: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_cache: true,
            validate_params: true,
            enable_metrics: true,
        }
    }
}

/// Core configuration for the link lookup client.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// HTTP transport
    pub http_client: Arc<dyn HttpClient>,

    /// Time source for cache expiry, metrics and rate limiting
    pub clock: Arc<dyn Clock>,

    /// Suspension primitive for backoff and throttling
    pub sleeper: Arc<dyn Sleeper>,

    /// Upstream service settings
    pub lookup_api: LookupApiConfig,

    /// Features flags
    pub features: FeatureFlags,

    /// Optional upper bound on cached responses; `None` keeps the cache unbounded
    pub cache_max_entries: Option<usize>,

    /// Buffer size for the lookup event bus
    pub event_buffer_size: usize,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("http_client", &"HttpClient { ... }")
            .field("clock", &"Clock { ... }")
            .field("sleeper", &"Sleeper { ... }")
            .field("lookup_api", &self.lookup_api)
            .field("features", &self.features)
            .field("cache_max_entries", &self.cache_max_entries)
            .field("event_buffer_size", &self.event_buffer_size)
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        self.lookup_api.validate()?;

        if self.cache_max_entries == Some(0) {
            return Err(Error::Config(
                "Cache capacity must be greater than 0 entries. \
                 Leave it unset for an unbounded cache or disable caching."
                    .to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client = ReqwestHttpClient::new().map_err(|e| {
        Error::Internal(format!("Failed to initialize default HttpClient: {}", e))
    })?;
    let client: Arc<dyn HttpClient> = Arc::new(client);
    Ok(client)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "No HTTP client implementation provided. \
                 Desktop: enable the 'desktop-shims' feature to use the default ReqwestHttpClient. \
                 Tests and embedded hosts: inject an HttpClient with `.http_client(...)`."
            .to_string(),
    })
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    http_client: Option<Arc<dyn HttpClient>>,
    clock: Option<Arc<dyn Clock>>,
    sleeper: Option<Arc<dyn Sleeper>>,
    lookup_api: Option<LookupApiConfig>,
    features: Option<FeatureFlags>,
    cache_max_entries: Option<usize>,
    event_buffer_size: Option<usize>,
}

impl CoreConfigBuilder {
    /// Sets the HTTP client implementation.
    ///
    /// If not provided, the desktop default (reqwest-based) will be used when
    /// the `desktop-shims` feature is enabled.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the time source (default: `SystemClock`).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the sleep primitive (default: `TokioSleeper`).
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    /// Sets the upstream service configuration.
    pub fn lookup_api(mut self, config: LookupApiConfig) -> Self {
        self.lookup_api = Some(config);
        self
    }

    /// Replaces all feature flags at once.
    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = Some(features);
        self
    }

    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.features.get_or_insert_with(FeatureFlags::default).enable_cache = enabled;
        self
    }

    pub fn validate_params(mut self, enabled: bool) -> Self {
        self.features.get_or_insert_with(FeatureFlags::default).validate_params = enabled;
        self
    }

    pub fn metrics_enabled(mut self, enabled: bool) -> Self {
        self.features.get_or_insert_with(FeatureFlags::default).enable_metrics = enabled;
        self
    }

    /// Bounds the response cache; least recently used entries are evicted.
    pub fn cache_max_entries(mut self, max_entries: usize) -> Self {
        self.cache_max_entries = Some(max_entries);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Builds the final `CoreConfig`, validating all settings.
    ///
    /// # Errors
    ///
    /// - `Error::CapabilityMissing` when no HTTP client is available
    /// - `Error::Config` when any setting is out of range
    pub fn build(self) -> Result<CoreConfig> {
        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let config = CoreConfig {
            http_client,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            sleeper: self.sleeper.unwrap_or_else(|| Arc::new(TokioSleeper)),
            lookup_api: self.lookup_api.unwrap_or_default(),
            features: self.features.unwrap_or_default(),
            cache_max_entries: self.cache_max_entries,
            event_buffer_size: self
                .event_buffer_size
                .unwrap_or(crate::events::DEFAULT_EVENT_BUFFER_SIZE),
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::http::{HttpRequest, HttpResponse};

    struct StaticHttpClient;

    #[async_trait]
    impl HttpClient for StaticHttpClient {
        async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
            Ok(HttpResponse::new(200, "{}"))
        }
    }

    fn builder_with_client() -> CoreConfigBuilder {
        CoreConfig::builder().http_client(Arc::new(StaticHttpClient))
    }

    #[test]
    fn test_lookup_api_defaults() {
        let config = LookupApiConfig::default();

        assert_eq!(config.api_key, None);
        assert_eq!(config.version, "v1-alpha.1");
        assert_eq!(config.base_url, "https://api.song.link");
        assert_eq!(config.timeout_ms, 10_000);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay_ms, 1_000);
        assert!(config.headers.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_lookup_api_builder_methods() {
        let config = LookupApiConfig::new()
            .with_api_key("abc")
            .with_version("v2")
            .with_base_url("http://localhost:8080/")
            .with_timeout_ms(2_500)
            .with_max_retries(5)
            .with_retry_delay_ms(10)
            .with_header("X-Custom", "1");

        assert!(config.has_api_key());
        assert_eq!(config.version, "v2");
        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(config.timeout(), Duration::from_millis(2_500));
        assert_eq!(config.headers.get("X-Custom"), Some(&"1".to_string()));
    }

    #[test]
    fn test_empty_api_key_means_no_key() {
        let config = LookupApiConfig::new().with_api_key("");
        assert!(!config.has_api_key());
    }

    #[test]
    fn test_retry_policy_from_config() {
        let policy = LookupApiConfig::new()
            .with_max_retries(4)
            .with_retry_delay_ms(200)
            .retry_policy();

        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(policy.max_delay, MAX_RETRY_DELAY);
    }

    #[test]
    fn test_user_agent_header_override_wins() {
        let config = LookupApiConfig::new();
        assert_eq!(config.user_agent(), DEFAULT_USER_AGENT);

        let config = config.with_header("user-agent", "CustomUserAgent/1.0");
        assert_eq!(config.user_agent(), "CustomUserAgent/1.0");
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let config = LookupApiConfig::new().with_api_key("super-secret");
        let rendered = format!("{:?}", config);

        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let cases = vec![
            (LookupApiConfig::new().with_version(" "), "version"),
            (LookupApiConfig::new().with_base_url("api.song.link"), "Base URL"),
            (LookupApiConfig::new().with_timeout_ms(0), "greater than 0ms"),
            (LookupApiConfig::new().with_timeout_ms(300_001), "maximum"),
            (LookupApiConfig::new().with_max_retries(0), "at least one attempt"),
        ];

        for (config, expected) in cases {
            let err = config.validate().unwrap_err();
            assert!(
                err.to_string().contains(expected),
                "expected '{}' in '{}'",
                expected,
                err
            );
        }
    }

    #[test]
    fn test_feature_flags_default() {
        let flags = FeatureFlags::default();
        assert!(flags.enable_cache);
        assert!(flags.validate_params);
        assert!(flags.enable_metrics);
    }

    #[test]
    fn test_builder_with_injected_client() {
        let config = builder_with_client().build().unwrap();

        assert_eq!(config.lookup_api, LookupApiConfig::default());
        assert_eq!(config.features, FeatureFlags::default());
        assert_eq!(config.cache_max_entries, None);
        assert_eq!(config.event_buffer_size, 100);
    }

    #[test]
    fn test_builder_feature_toggles() {
        let config = builder_with_client()
            .cache_enabled(false)
            .validate_params(false)
            .metrics_enabled(false)
            .build()
            .unwrap();

        assert!(!config.features.enable_cache);
        assert!(!config.features.validate_params);
        assert!(!config.features.enable_metrics);
    }

    #[test]
    fn test_builder_rejects_zero_capacity_cache() {
        let result = builder_with_client().cache_max_entries(0).build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_builder_rejects_invalid_lookup_api() {
        let result = builder_with_client()
            .lookup_api(LookupApiConfig::new().with_max_retries(0))
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_builder_requires_http_client() {
        let result = CoreConfig::builder().build();

        match result {
            Err(Error::CapabilityMissing { capability, message }) => {
                assert_eq!(capability, "HttpClient");
                assert!(message.contains("desktop-shims"));
            }
            other => panic!("expected CapabilityMissing, got {:?}", other),
        }
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_build_with_desktop_defaults() {
        let config = CoreConfig::builder().build().unwrap();
        assert_eq!(config.lookup_api.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_config_is_cloneable() {
        let config = builder_with_client().cache_max_entries(50).build().unwrap();
        let cloned = config.clone();

        assert_eq!(cloned.cache_max_entries, Some(50));
        assert!(Arc::ptr_eq(&config.http_client, &cloned.http_client));
    }
}
