//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the link lookup client:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Lookup event bus
//!
//! ## Overview
//!
//! This crate contains the runtime utilities the lookup core depends on. It
//! owns the configuration builder that wires host bridges (HTTP, clock,
//! sleeper) together, the logging conventions, and the broadcast channel used
//! to observe request lifecycles.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{CoreConfig, CoreConfigBuilder, FeatureFlags, LookupApiConfig};
pub use error::{Error, Result};
