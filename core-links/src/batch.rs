//! Chunked fan-out for batch lookups.
//!
//! URLs are processed in chunks of `concurrency`: every lookup of a chunk runs
//! concurrently and the whole chunk completes before the next starts. Results
//! keep input order, and a failing item is turned into a [`BatchFailure`]
//! without affecting its siblings.

use crate::error::{ErrorKind, LinkError};
use crate::platform::{detect_platform, extract_id};
use crate::types::{BatchFailure, BatchItemResult, LookupResult};
use bridge_traits::time::Clock;
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

const NOT_FOUND_MESSAGE: &str = "No results found for URL";

pub struct BatchOrchestrator {
    clock: Arc<dyn Clock>,
    concurrency: usize,
}

impl BatchOrchestrator {
    /// A `concurrency` of zero is treated as one.
    pub fn new(clock: Arc<dyn Clock>, concurrency: usize) -> Self {
        Self {
            clock,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `lookup` for every URL, returning one result per input in order.
    pub async fn run<S, F, Fut>(&self, urls: &[S], lookup: F) -> Vec<BatchItemResult>
    where
        S: AsRef<str>,
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<LookupResult, LinkError>>,
    {
        info!(
            total = urls.len(),
            concurrency = self.concurrency,
            "Starting batch lookup"
        );

        let mut results = Vec::with_capacity(urls.len());

        for (index, chunk) in urls.chunks(self.concurrency).enumerate() {
            debug!(chunk = index, size = chunk.len(), "Processing batch chunk");

            let outcomes = join_all(chunk.iter().map(|url| {
                let url = url.as_ref().to_string();
                let pending = lookup(url.clone());
                async move { (url, pending.await) }
            }))
            .await;

            results.extend(
                outcomes
                    .into_iter()
                    .map(|(url, outcome)| self.to_item(url, outcome)),
            );
        }

        let failed = results.iter().filter(|r| !r.is_success()).count();
        info!(total = results.len(), failed, "Batch lookup finished");

        results
    }

    fn to_item(&self, url: String, outcome: Result<LookupResult, LinkError>) -> BatchItemResult {
        match outcome {
            Ok(LookupResult::Found(result)) => BatchItemResult::Success(result),
            Ok(LookupResult::Empty(_)) => BatchItemResult::Failure(self.failure(
                url,
                NOT_FOUND_MESSAGE.to_string(),
                ErrorKind::NotFound,
                false,
            )),
            Err(e) => {
                let message = e.to_string();
                BatchItemResult::Failure(self.failure(url, message, e.kind(), e.is_transient()))
            }
        }
    }

    fn failure(&self, url: String, error: String, kind: ErrorKind, retryable: bool) -> BatchFailure {
        BatchFailure {
            platform: detect_platform(&url).map(|p| p.as_str().to_string()),
            extracted_id: extract_id(&url),
            url,
            error,
            error_kind: kind,
            retryable,
            suggestion: kind.suggestion().to_string(),
            timestamp: self.clock.now(),
        }
    }
}

impl std::fmt::Debug for BatchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOrchestrator")
            .field("concurrency", &self.concurrency)
            .finish()
    }
}
