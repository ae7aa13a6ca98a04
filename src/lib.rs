//! Workspace umbrella crate.
//!
//! Exposes the `desktop-shims` feature and re-exports [`core_service`] so host
//! applications can depend on `songlink-workspace` without wiring each crate
//! individually.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
