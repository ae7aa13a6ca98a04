//! # Request Executor
//!
//! Turns a lookup path into a JSON document: cache lookup, client-side rate
//! limiting, the HTTP round trip with a per-attempt timeout, upstream
//! envelope interpretation and retries with exponential backoff.
//!
//! ## Failure handling
//!
//! | Condition | Retried | Error |
//! |---|---|---|
//! | transport error | yes | [`LinkError::Network`] |
//! | attempt timeout | yes | [`LinkError::Timeout`] |
//! | non-2xx HTTP status | yes | [`LinkError::HttpStatus`] |
//! | body is not JSON | no | [`LinkError::MalformedResponse`] |
//! | envelope `statusCode` 429 | no | [`LinkError::RateLimited`] |
//! | envelope `statusCode` 4xx | no | [`LinkError::Client`] |
//! | envelope `statusCode` 5xx | no | [`LinkError::Server`] |
//! | envelope `statusCode` 200 | no | `Ok(None)` (nothing matched) |
//!
//! Every attempt, retries included, waits for a rate limiter slot.
//!
//! The envelope is the upstream's own error report inside a successful HTTP
//! response, so it is treated as a verdict on the request. A failing HTTP
//! status on the other hand says nothing about the request and is retried.

use crate::cache::ResponseCache;
use crate::error::{LinkError, Result};
use crate::metrics::{MetricsCollector, RequestMetric};
use crate::rate_limiter::RateLimiter;
use bridge_traits::error::BridgeError;
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use bridge_traits::time::{Clock, Sleeper};
use core_runtime::config::{LookupApiConfig, DEFAULT_USER_AGENT};
use core_runtime::events::{CoreEvent, EventBus, LookupEvent};
use core_runtime::logging::redact_url;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Per-call overrides and metric labels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Do not consult the cache (a successful response is still stored)
    pub skip_cache: bool,
    /// Per-attempt timeout override
    pub timeout_ms: Option<u64>,
    /// Platform label for metrics
    pub platform: Option<String>,
    /// Country label for metrics
    pub country: Option<String>,
}

pub struct RequestExecutor {
    http_client: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    api: LookupApiConfig,
    metrics: Arc<MetricsCollector>,
    cache: Option<Arc<ResponseCache>>,
    rate_limiter: Option<Arc<RateLimiter>>,
    events: Option<EventBus>,
}

impl RequestExecutor {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
        api: LookupApiConfig,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            http_client,
            clock,
            sleeper,
            api,
            metrics,
            cache: None,
            rate_limiter: None,
            events: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn api_config(&self) -> &LookupApiConfig {
        &self.api
    }

    pub fn cache(&self) -> Option<&Arc<ResponseCache>> {
        self.cache.as_ref()
    }

    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.rate_limiter.as_ref()
    }

    /// Absolute request URL for `path`; doubles as the cache key.
    pub fn build_url(&self, path: &str) -> String {
        let mut url = format!(
            "{}/{}/{}",
            self.api.base_url,
            self.api.version,
            path.trim_start_matches('/')
        );
        if let Some(key) = &self.api.api_key {
            url.push_str("&key=");
            url.push_str(key);
        }
        url
    }

    /// Resolve `path`, returning `Ok(None)` when the upstream matched nothing.
    #[instrument(skip(self, options), fields(path = %path))]
    pub async fn execute(&self, path: &str, options: &RequestOptions) -> Result<Option<Value>> {
        let url = self.build_url(path);
        let log_url = redact_url(&url);

        if let Some(cache) = &self.cache {
            if !options.skip_cache {
                if let Some(payload) = cache.get(&url) {
                    debug!(url = %log_url, "Cache hit");
                    self.emit(LookupEvent::CacheHit {
                        url: log_url.clone(),
                    });
                    let now = self.clock.now();
                    self.metrics.record_request(
                        RequestMetric::new(log_url, now)
                            .ended_at(now)
                            .platform(options.platform.clone())
                            .country(options.country.clone())
                            .cache_hit(true),
                    );
                    return Ok(Some(payload));
                }
                self.emit(LookupEvent::CacheMiss {
                    url: log_url.clone(),
                });
            }
        }

        let request_id = Uuid::new_v4().to_string();
        let started = self.clock.now();
        self.emit(LookupEvent::BeforeRequest {
            request_id: request_id.clone(),
            url: log_url.clone(),
        });

        let timeout_ms = options.timeout_ms.unwrap_or(self.api.timeout_ms);
        let policy = self.api.retry_policy();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            // Retries spend quota too.
            if let Some(limiter) = &self.rate_limiter {
                let waited = limiter.wait_for_slot().await;
                if !waited.is_zero() {
                    self.emit(LookupEvent::RateLimited {
                        delay_ms: waited.as_millis() as u64,
                    });
                }
            }

            let attempt_started = self.clock.now();
            let (outcome, status) = self.attempt(&url, timeout_ms).await;

            let mut metric = RequestMetric::new(log_url.clone(), attempt_started)
                .ended_at(self.clock.now())
                .status_code(status)
                .platform(options.platform.clone())
                .country(options.country.clone());
            if let Err(e) = &outcome {
                metric = metric.failed(e.to_string());
            }
            self.metrics.record_request(metric);

            match outcome {
                Ok(payload) => {
                    if let (Some(cache), Some(payload)) = (&self.cache, &payload) {
                        cache.put(url.clone(), payload.clone());
                    }

                    let duration_ms = (self.clock.now() - started).num_milliseconds().max(0) as u64;
                    debug!(
                        url = %log_url,
                        attempt,
                        duration_ms,
                        found = payload.is_some(),
                        "Lookup request completed"
                    );
                    self.emit(LookupEvent::AfterRequest {
                        request_id,
                        url: log_url,
                        status: status.unwrap_or(200),
                        duration_ms,
                    });
                    return Ok(payload);
                }
                Err(e) if e.is_retryable() && policy.should_retry(attempt) => {
                    let delay = policy.delay_for_attempt(attempt);
                    warn!(
                        url = %log_url,
                        attempt,
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Lookup attempt failed, retrying"
                    );
                    self.sleeper.sleep(delay).await;
                }
                Err(e) => {
                    warn!(url = %log_url, attempt, error = %e, "Lookup request failed");

                    let mut context = BTreeMap::new();
                    context.insert("url".to_string(), log_url);
                    context.insert("attempts".to_string(), attempt.to_string());
                    if let Some(platform) = &options.platform {
                        context.insert("platform".to_string(), platform.clone());
                    }
                    if let Some(country) = &options.country {
                        context.insert("country".to_string(), country.clone());
                    }
                    self.metrics.record_error(&e, context);

                    self.emit(LookupEvent::Error {
                        request_id,
                        message: e.to_string(),
                        retryable: e.is_transient(),
                    });
                    return Err(e);
                }
            }
        }
    }

    /// One round trip. Also returns the HTTP status when a response arrived.
    async fn attempt(&self, url: &str, timeout_ms: u64) -> (Result<Option<Value>>, Option<u16>) {
        let timeout = Duration::from_millis(timeout_ms);
        let request = HttpRequest::get(url)
            .header("User-Agent", DEFAULT_USER_AGENT)
            .header("Accept", "application/json")
            .headers(self.api.headers.clone())
            .timeout(timeout);

        let response = match tokio::time::timeout(timeout, self.http_client.execute(request)).await
        {
            Err(_) | Ok(Err(BridgeError::TimedOut(_))) => {
                return (Err(LinkError::Timeout { timeout_ms }), None)
            }
            Ok(Err(e)) => return (Err(LinkError::Network(e)), None),
            Ok(Ok(response)) => response,
        };

        let status = Some(response.status);
        (interpret(&response), status)
    }

    fn emit(&self, event: LookupEvent) {
        if let Some(events) = &self.events {
            // No subscribers is not an error.
            let _ = events.emit(CoreEvent::Lookup(event));
        }
    }
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("api", &self.api)
            .field("cache", &self.cache.is_some())
            .field("rate_limiter", &self.rate_limiter.is_some())
            .field("events", &self.events.is_some())
            .finish()
    }
}

/// Map an HTTP response onto the lookup outcome.
fn interpret(response: &HttpResponse) -> Result<Option<Value>> {
    if !response.is_success() {
        let reason = if response.status_text.is_empty() {
            "Request failed".to_string()
        } else {
            response.status_text.clone()
        };
        return Err(LinkError::HttpStatus {
            status: response.status,
            reason,
        });
    }

    let payload: Value = response
        .json()
        .map_err(|_| LinkError::MalformedResponse)?;

    interpret_envelope(payload)
}

fn interpret_envelope(payload: Value) -> Result<Option<Value>> {
    let status = match payload.get("statusCode") {
        Some(Value::Number(n)) => n.as_i64(),
        _ => None,
    };

    let Some(status) = status.filter(|s| *s != 0) else {
        return Ok(Some(payload));
    };

    let code = payload
        .get("code")
        .and_then(Value::as_str)
        .unwrap_or("UNKNOWN")
        .to_string();

    match status {
        200 => Ok(None),
        429 => Err(LinkError::RateLimited { code }),
        400..=499 => Err(LinkError::Client {
            status: status as u16,
            code,
        }),
        500..=599 => Err(LinkError::Server {
            status: status as u16,
            code,
        }),
        _ => Err(LinkError::UnexpectedStatus { status, code }),
    }
}
