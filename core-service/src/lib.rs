//! Core service façade and bootstrap helpers.
//!
//! This crate wires a [`CoreConfig`] into a ready-to-use [`LinkClient`] and
//! the [`EventBus`] its request lifecycle is published on. Desktop and server
//! hosts typically enable the `desktop-shims` feature (which depends on
//! `bridge-desktop`) and call [`bootstrap_desktop`]; everyone else injects
//! their own `HttpClient` through the config builder.

pub mod error;

pub use error::{CoreError, Result};

use std::sync::Arc;

use core_links::{LinkClient, RateLimiter, RateLimiterConfig, RateLimiterStatus};
use core_runtime::config::CoreConfig;
use core_runtime::events::{EventBus, EventStream};
use tracing::info;

#[cfg(feature = "desktop-shims")]
use core_runtime::config::LookupApiConfig;

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    client: Arc<LinkClient>,
    events: EventBus,
}

impl CoreService {
    /// Create a new service from the provided configuration.
    pub fn new(config: CoreConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Create a service whose requests are throttled by a dedicated limiter.
    pub fn with_rate_limit(config: CoreConfig, limits: RateLimiterConfig) -> Result<Self> {
        Self::build(config, Some(limits))
    }

    fn build(config: CoreConfig, limits: Option<RateLimiterConfig>) -> Result<Self> {
        config.validate()?;

        let events = EventBus::new(config.event_buffer_size);
        let clock = config.clock.clone();
        let sleeper = config.sleeper.clone();

        let mut client = LinkClient::new(config).with_event_bus(events.clone());
        if let Some(limits) = limits {
            let limiter = RateLimiter::new(limits, clock, sleeper)?
                .with_metrics(client.metrics_collector().clone());
            client = client.with_rate_limiter(Arc::new(limiter));
        }

        info!(
            rate_limited = client.rate_limiter().is_some(),
            "Core service initialized"
        );

        Ok(Self {
            client: Arc::new(client),
            events,
        })
    }

    /// The lookup client.
    pub fn client(&self) -> Arc<LinkClient> {
        Arc::clone(&self.client)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to lookup lifecycle events emitted from now on.
    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.events.subscribe())
    }

    /// Snapshot of the configured limiter, if any.
    pub fn rate_limiter_status(&self) -> Option<RateLimiterStatus> {
        self.client.rate_limiter().map(|limiter| limiter.status())
    }
}

impl std::fmt::Debug for CoreService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreService")
            .field("client", &self.client)
            .field("subscribers", &self.events.subscriber_count())
            .finish()
    }
}

/// Convenience bootstrapper for desktop and server hosts, backed by the
/// reqwest transport from `bridge-desktop`.
///
/// ```no_run
/// # async fn example() -> core_service::Result<()> {
/// use core_runtime::config::LookupApiConfig;
/// use core_service::bootstrap_desktop;
///
/// let core = bootstrap_desktop(LookupApiConfig::new()).await?;
/// let links = core
///     .client()
///     .fetch("https://open.spotify.com/track/4Km5HrUvYTaSUfiSGPJeQR", &Default::default())
///     .await?;
/// # Ok(())
/// # }
/// ```
#[cfg(feature = "desktop-shims")]
pub async fn bootstrap_desktop(lookup_api: LookupApiConfig) -> Result<CoreService> {
    use bridge_desktop::ReqwestHttpClient;

    let http = ReqwestHttpClient::with_timeout(lookup_api.timeout())?;
    let config = CoreConfig::builder()
        .http_client(Arc::new(http))
        .lookup_api(lookup_api)
        .build()
        .map_err(|err| CoreError::InitializationFailed(err.to_string()))?;

    CoreService::new(config)
}
