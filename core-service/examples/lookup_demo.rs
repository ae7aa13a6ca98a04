//! Link lookup demonstration
//!
//! Resolves each URL given on the command line and prints the platforms it is
//! available on. With no arguments a well known track is used.
//!
//! Run with:
//! ```bash
//! cargo run -p core-service --example lookup_demo -- https://open.spotify.com/track/4Km5HrUvYTaSUfiSGPJeQR
//!
//! # With an API key and debug logs
//! SONGLINK_API_KEY=... RUST_LOG=core_links=debug cargo run -p core-service --example lookup_demo
//! ```

use bridge_traits::time::LogLevel;
use core_links::{BatchItemResult, FetchOptions};
use core_runtime::config::LookupApiConfig;
use core_runtime::events::{CoreEvent, LookupEvent};
use core_runtime::logging::{init_logging, LoggingConfig};
use core_service::bootstrap_desktop;
use std::env;
use tracing::info;

const DEFAULT_URL: &str = "https://open.spotify.com/track/4Km5HrUvYTaSUfiSGPJeQR";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut logging = LoggingConfig::default().with_level(LogLevel::Info);
    if let Ok(filter) = env::var("RUST_LOG") {
        logging = logging.with_filter(filter);
    }
    init_logging(logging)?;

    let mut api = LookupApiConfig::new();
    if let Ok(key) = env::var("SONGLINK_API_KEY") {
        api = api.with_api_key(key);
    }

    let core = bootstrap_desktop(api).await?;
    let mut events = core.subscribe();

    let mut urls: Vec<String> = env::args().skip(1).collect();
    if urls.is_empty() {
        urls.push(DEFAULT_URL.to_string());
    }

    let client = core.client();
    let results = client.fetch_batch(&urls, &FetchOptions::default()).await;

    for item in &results {
        match item {
            BatchItemResult::Success(result) => {
                println!(
                    "{} by {}",
                    result.title.as_deref().unwrap_or("<untitled>"),
                    result.artist.join(", ")
                );
                for (platform, link) in &result.links_by_platform {
                    println!("  {:<14} {}", platform, link.url);
                }
            }
            BatchItemResult::Failure(failure) => {
                println!("{} failed: {}", failure.url, failure.error);
                println!("  {}", failure.suggestion);
            }
        }
    }

    while let Some(Ok(CoreEvent::Lookup(event))) = events.try_recv() {
        if let LookupEvent::AfterRequest { duration_ms, .. } = event {
            info!(duration_ms, "Upstream request");
        }
    }

    let stats = client.cache_stats();
    let summary = client.metrics();
    info!(
        cache_size = stats.size,
        hit_rate = stats.hit_rate,
        total_requests = summary.counters.total_requests,
        "Done"
    );

    Ok(())
}
