//! Server-rendering boundary
//!
//! A server router loads a location and [`Router::dehydrate`]s its matches
//! into a serializable snapshot. The client router receives it and calls
//! [`Router::hydrate`] before its first load, so restored matches show the
//! server's loader data without running their loaders again.
//!
//! Loader data that plain JSON cannot carry faithfully goes through the
//! router's [`SerializationAdapter`]s: a value accepted by an adapter is
//! written as `{"$adapter": key, "value": ...}` and turned back on hydrate.

use crate::error::RouteError;
use crate::route_match::{MatchStatus, RouteMatch};
use crate::router::Router;
use crate::store::Pool;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

const ADAPTER_KEY: &str = "$adapter";
const VALUE_KEY: &str = "value";

pub type AdapterTestFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;
pub type AdapterMapFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Custom (de)serialization for a kind of loader payload
#[derive(Clone)]
pub struct SerializationAdapter {
    pub key: String,
    /// Whether this adapter handles a value
    pub test: AdapterTestFn,
    pub to_serializable: AdapterMapFn,
    pub from_serializable: AdapterMapFn,
}

impl SerializationAdapter {
    pub fn new<T, S, D>(key: impl Into<String>, test: T, to_serializable: S, from_serializable: D) -> Self
    where
        T: Fn(&Value) -> bool + Send + Sync + 'static,
        S: Fn(&Value) -> Value + Send + Sync + 'static,
        D: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        Self {
            key: key.into(),
            test: Arc::new(test),
            to_serializable: Arc::new(to_serializable),
            from_serializable: Arc::new(from_serializable),
        }
    }
}

impl fmt::Debug for SerializationAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializationAdapter")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// One match as shipped from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DehydratedMatch {
    pub id: String,
    pub status: MatchStatus,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loader_data: Option<Value>,
    /// Display form of the match error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The router snapshot shipped from server to client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DehydratedRouter {
    pub matches: Vec<DehydratedMatch>,
}

// ============================================================================
// Adapter encoding
// ============================================================================

/// Wrap every value some adapter accepts, depth first
pub fn encode_with_adapters(value: &Value, adapters: &[SerializationAdapter]) -> Value {
    if let Some(adapter) = adapters.iter().find(|adapter| (adapter.test)(value)) {
        let mut wrapped = Map::new();
        wrapped.insert(ADAPTER_KEY.to_string(), Value::String(adapter.key.clone()));
        wrapped.insert(VALUE_KEY.to_string(), (adapter.to_serializable)(value));
        return Value::Object(wrapped);
    }

    match value {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| encode_with_adapters(item, adapters))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), encode_with_adapters(v, adapters)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Reverse [`encode_with_adapters`]; wrappers naming an unknown adapter are kept
pub fn decode_with_adapters(value: &Value, adapters: &[SerializationAdapter]) -> Value {
    match value {
        Value::Object(map) if map.len() == 2 && map.contains_key(VALUE_KEY) => {
            let key = map.get(ADAPTER_KEY).and_then(Value::as_str);
            let adapter = key.and_then(|key| adapters.iter().find(|adapter| adapter.key == key));
            match (key, adapter, map.get(VALUE_KEY)) {
                (Some(_), Some(adapter), Some(inner)) => (adapter.from_serializable)(inner),
                (Some(key), None, _) => {
                    warn!("no serialization adapter registered for `{}`", key);
                    value.clone()
                }
                _ => decode_object(map, adapters),
            }
        }
        Value::Object(map) => decode_object(map, adapters),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| decode_with_adapters(item, adapters))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn decode_object(map: &Map<String, Value>, adapters: &[SerializationAdapter]) -> Value {
    Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), decode_with_adapters(v, adapters)))
            .collect(),
    )
}

// ============================================================================
// Router integration
// ============================================================================

impl Router {
    /// Snapshot the committed matches for a client
    pub fn dehydrate(&self) -> DehydratedRouter {
        let adapters = &self.inner.adapters;
        let matches = self
            .state()
            .matches
            .iter()
            .map(|m| DehydratedMatch {
                id: m.id.clone(),
                status: m.status,
                updated_at: m.updated_at,
                loader_data: m
                    .loader_data
                    .as_ref()
                    .map(|data| encode_with_adapters(data, adapters)),
                error: m.error.as_ref().map(|err| err.to_string()),
            })
            .collect::<Vec<_>>();

        debug!("Dehydrated {} matches", matches.len());
        DehydratedRouter { matches }
    }

    /// Restore a server snapshot onto the current history entry
    ///
    /// Matches whose id appears in the snapshot take its status, data and
    /// error and skip their loader on the next load. The result becomes the
    /// committed state.
    pub async fn hydrate(&self, dehydrated: DehydratedRouter) {
        let location = self.read_history_location().await;
        let adapters = &self.inner.adapters;
        let by_id: HashMap<&str, &DehydratedMatch> = dehydrated
            .matches
            .iter()
            .map(|m| (m.id.as_str(), m))
            .collect();

        let mut restored = 0;
        let matches: Vec<Arc<RouteMatch>> = self
            .match_routes(&location)
            .into_iter()
            .map(|m| match by_id.get(m.id.as_str()) {
                Some(snapshot) => {
                    restored += 1;
                    RouteMatch {
                        status: snapshot.status,
                        updated_at: snapshot.updated_at,
                        loader_data: snapshot
                            .loader_data
                            .as_ref()
                            .map(|data| decode_with_adapters(data, adapters)),
                        error: snapshot.error.clone().map(RouteError::msg),
                        dehydrated: true,
                        ..m
                    }
                }
                None => m,
            })
            .map(Arc::new)
            .collect();

        if restored < dehydrated.matches.len() {
            warn!(
                "{} dehydrated matches do not belong to {}",
                dehydrated.matches.len() - restored,
                location.href
            );
        }

        self.inner.store.update(|s| {
            s.set_pool(Pool::Active, matches);
            s.location = location.clone();
            s.resolved_location = Some(location.clone());
            s.status_code = if by_id.values().any(|m| m.status == MatchStatus::NotFound) {
                404
            } else {
                200
            };
        });
        info!("Hydrated {} matches at {}", restored, location.href);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn date_adapter() -> SerializationAdapter {
        SerializationAdapter::new(
            "date",
            |value| value.get("$date").is_some(),
            |value| value["$date"].clone(),
            |value| json!({ "$date": value }),
        )
    }

    #[test]
    fn test_adapter_wraps_nested_values() {
        let data = json!({ "post": { "created": { "$date": 1700000000 } }, "tags": ["a"] });
        let encoded = encode_with_adapters(&data, &[date_adapter()]);
        assert_eq!(
            encoded,
            json!({
                "post": { "created": { "$adapter": "date", "value": 1700000000 } },
                "tags": ["a"]
            })
        );
        assert_eq!(decode_with_adapters(&encoded, &[date_adapter()]), data);
    }

    #[test]
    fn test_unknown_adapter_is_kept() {
        let encoded = json!({ "$adapter": "bigint", "value": "12345678901234567890" });
        assert_eq!(decode_with_adapters(&encoded, &[date_adapter()]), encoded);
    }

    #[test]
    fn test_dehydrated_shape() {
        let snapshot = DehydratedRouter {
            matches: vec![DehydratedMatch {
                id: "/posts".to_string(),
                status: MatchStatus::Success,
                updated_at: DateTime::from_timestamp(0, 0).unwrap_or_default(),
                loader_data: Some(json!([1, 2])),
                error: None,
            }],
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["matches"][0]["status"], json!("success"));
        assert_eq!(value["matches"][0]["loaderData"], json!([1, 2]));
        assert!(value["matches"][0].get("error").is_none());

        let back: DehydratedRouter = serde_json::from_value(value).unwrap();
        assert_eq!(back, snapshot);
    }
}
