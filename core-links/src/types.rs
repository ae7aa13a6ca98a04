//! Public data types shared by the lookup operations.

use crate::error::{ErrorKind, LinkError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Country used when the caller does not pick one.
pub const DEFAULT_COUNTRY: &str = "US";

/// Chunk size used by batch lookups when the caller does not pick one.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Kind of entity a lookup by platform ID refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Song,
    Album,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Song => "song",
            EntityType::Album => "album",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "song" => Ok(EntityType::Song),
            "album" => Ok(EntityType::Album),
            _ => Err(LinkError::validation(format!(
                "Invalid type: {}. Expected 'song' or 'album'",
                s
            ))),
        }
    }
}

/// Per-call options shared by every lookup operation.
///
/// ```
/// use core_links::FetchOptions;
///
/// let options = FetchOptions::default()
///     .with_country("GB")
///     .with_skip_cache(true)
///     .with_concurrency(3);
/// assert_eq!(options.country, "GB");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    /// ISO 3166-1 alpha-2 country for region specific results
    pub country: String,
    /// Bypass the response cache for this call (the result is still stored)
    pub skip_cache: bool,
    /// Per-attempt timeout override in milliseconds
    pub timeout_ms: Option<u64>,
    /// Chunk size for batch lookups
    pub concurrency: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            country: DEFAULT_COUNTRY.to_string(),
            skip_cache: false,
            timeout_ms: None,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl FetchOptions {
    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = country.into();
        self
    }

    pub fn with_skip_cache(mut self, skip: bool) -> Self {
        self.skip_cache = skip;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }
}

/// A platform specific representation of the looked up song or album.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityData {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    /// Upstream sends a comma separated string; it is split into names.
    #[serde(default, deserialize_with = "artist_names")]
    pub artist_name: Vec<String>,
    #[serde(default, rename = "type")]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Link to the entity on one platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformLink {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_app_uri_mobile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_app_uri_desktop: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_unique_id: Option<String>,
}

/// Upstream document with the primary entity's fields hoisted to the top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedResult {
    pub entity_unique_id: String,
    #[serde(default)]
    pub user_country: Option<String>,
    #[serde(default)]
    pub page_url: Option<String>,
    pub entities_by_unique_id: BTreeMap<String, EntityData>,
    #[serde(default)]
    pub links_by_platform: BTreeMap<String, PlatformLink>,
    pub id: Option<String>,
    pub title: Option<String>,
    pub artist: Vec<String>,
    #[serde(rename = "type")]
    pub entity_type: Option<String>,
    pub thumbnail: Option<String>,
}

impl NormalizedResult {
    /// The entity the lookup resolved to.
    pub fn primary_entity(&self) -> Option<&EntityData> {
        self.entities_by_unique_id.get(&self.entity_unique_id)
    }

    pub fn link_for(&self, platform: &str) -> Option<&PlatformLink> {
        self.links_by_platform.get(platform)
    }
}

/// Outcome of a single lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupResult {
    Found(Box<NormalizedResult>),
    /// Nothing matched, or the document lacked a resolvable primary entity.
    /// Carries the upstream document unchanged (an empty object when absent).
    Empty(Value),
}

impl LookupResult {
    pub fn is_found(&self) -> bool {
        matches!(self, LookupResult::Found(_))
    }

    pub fn found(&self) -> Option<&NormalizedResult> {
        match self {
            LookupResult::Found(result) => Some(result),
            LookupResult::Empty(_) => None,
        }
    }

    pub fn into_found(self) -> Option<NormalizedResult> {
        match self {
            LookupResult::Found(result) => Some(*result),
            LookupResult::Empty(_) => None,
        }
    }
}

/// Diagnostic record for one failed batch item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailure {
    pub url: String,
    pub error: String,
    pub platform: Option<String>,
    pub extracted_id: Option<String>,
    pub error_kind: ErrorKind,
    pub retryable: bool,
    pub suggestion: String,
    pub timestamp: DateTime<Utc>,
}

/// Result for one input URL of a batch, in input order.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchItemResult {
    Success(Box<NormalizedResult>),
    Failure(BatchFailure),
}

impl BatchItemResult {
    pub fn is_success(&self) -> bool {
        matches!(self, BatchItemResult::Success(_))
    }

    pub fn failure(&self) -> Option<&BatchFailure> {
        match self {
            BatchItemResult::Failure(failure) => Some(failure),
            BatchItemResult::Success(_) => None,
        }
    }
}

/// Cache statistics merged with the cache counters from metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    /// TTL in milliseconds
    pub ttl: u64,
    pub hit_count: u64,
    pub miss_count: u64,
    pub hit_rate: f64,
    pub total_requests: u64,
}

fn artist_names<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Artists {
        Joined(String),
        List(Vec<String>),
    }

    Ok(match Option::<Artists>::deserialize(deserializer)? {
        Some(Artists::Joined(joined)) if !joined.is_empty() => {
            joined.split(", ").map(str::to_string).collect()
        }
        Some(Artists::List(list)) => list,
        _ => Vec::new(),
    })
}
