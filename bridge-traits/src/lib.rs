//! # Host Bridge Traits
//!
//! Platform abstraction traits that the link lookup core depends on.
//!
//! ## Overview
//!
//! This crate defines the contract between the lookup core and the host. Each
//! trait represents a capability the core requires but that is provided
//! differently per environment (reqwest on desktop, a scripted fake in tests).
//!
//! ## Traits
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Single-attempt async HTTP transport
//! - [`RetryPolicy`](http::RetryPolicy) - Pure exponential backoff schedule
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`Sleeper`](time::Sleeper) - Injectable suspension for backoff and throttling
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Transport
//! implementations should:
//!
//! - Report timeouts as `BridgeError::TimedOut`
//! - Report connection failures as `BridgeError::ConnectionFailed`
//! - Return non-2xx statuses as ordinary responses, never as errors
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds so one client can be shared
//! across concurrently running lookups.
//!
//! ## Examples
//!
//! ### Implementing HttpClient
//!
//! ```ignore
//! use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
//! use bridge_traits::error::Result;
//! use async_trait::async_trait;
//!
//! pub struct MyHttpClient {
//!     client: reqwest::Client,
//! }
//!
//! #[async_trait]
//! impl HttpClient for MyHttpClient {
//!     async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
//!         // Implementation
//!         todo!()
//!     }
//! }
//! ```

pub mod error;
pub mod http;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use time::{
    Clock, ConsoleLogger, LogEntry, LogLevel, LoggerSink, ManualClock, ManualSleeper, Sleeper,
    SystemClock, TokioSleeper,
};
