//! Shapes raw lookup documents into [`LookupResult`]s.
//!
//! The primary entity (`entitiesByUniqueId[entityUniqueId]`) has its id,
//! title, artists, type and thumbnail hoisted to the top level. Documents
//! without a resolvable primary entity are passed through unchanged. Sibling
//! entities and platform links that do not parse are dropped individually.

use crate::types::{EntityData, LookupResult, NormalizedResult, PlatformLink};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::debug;

pub fn normalize(payload: Option<Value>) -> LookupResult {
    let Some(payload) = payload else {
        return LookupResult::Empty(json!({}));
    };

    let Some(entity_unique_id) = payload.get("entityUniqueId").and_then(Value::as_str) else {
        return LookupResult::Empty(payload);
    };
    let entities = payload.get("entitiesByUniqueId");
    let Some(raw_primary) = entities.and_then(|e| e.get(entity_unique_id)) else {
        return LookupResult::Empty(payload);
    };

    let primary: EntityData = match serde_json::from_value(raw_primary.clone()) {
        Ok(primary) => primary,
        Err(e) => {
            debug!(error = %e, entity = entity_unique_id, "Primary entity did not match the expected shape");
            return LookupResult::Empty(payload);
        }
    };

    let mut entities_by_unique_id: BTreeMap<String, EntityData> = parse_map(entities);
    entities_by_unique_id.insert(entity_unique_id.to_string(), primary.clone());

    LookupResult::Found(Box::new(NormalizedResult {
        entity_unique_id: entity_unique_id.to_string(),
        user_country: string_field(&payload, "userCountry"),
        page_url: string_field(&payload, "pageUrl"),
        entities_by_unique_id,
        links_by_platform: parse_map::<PlatformLink>(payload.get("linksByPlatform")),
        id: primary.id,
        title: primary.title,
        artist: primary.artist_name,
        entity_type: primary.entity_type,
        thumbnail: primary.thumbnail_url,
    }))
}

fn string_field(payload: &Value, key: &str) -> Option<String> {
    payload.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Parse every value of a JSON object, skipping entries that do not fit `T`.
fn parse_map<T: DeserializeOwned>(value: Option<&Value>) -> BTreeMap<String, T> {
    let Some(object) = value.and_then(Value::as_object) else {
        return BTreeMap::new();
    };

    object
        .iter()
        .filter_map(|(key, raw)| match serde_json::from_value(raw.clone()) {
            Ok(parsed) => Some((key.clone(), parsed)),
            Err(e) => {
                debug!(key = %key, error = %e, "Skipping malformed entry");
                None
            }
        })
        .collect()
}
