// File: src/location.rs
// Purpose: The immutable Location value and conversion from history entries

use crate::path::join_paths;
use crate::search::SearchCodec;
use crate::sharing::replace_equal;
use crate::SearchMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use trailhead_history::{HistoryLocation, HistoryState};

/// History state key holding the real location behind a masked entry
pub const TEMP_LOCATION_KEY: &str = "__tempLocation";
/// History state key tying a masked entry to the router that wrote it
pub const TEMP_KEY: &str = "__tempKey";

/// A resolved location
///
/// `pathname` is router-relative (no basepath). `href` is
/// `pathname + search_str + #hash`; `public_href` is the same with the
/// basepath in front and is what gets written to history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub href: String,
    pub public_href: String,
    pub pathname: String,
    pub search: Arc<SearchMap>,
    /// Serialized search, `?...` or empty
    pub search_str: String,
    /// Without the leading `#`
    pub hash: String,
    pub state: Arc<HistoryState>,
    /// What the address bar shows while this location drives matching
    pub masked_location: Option<Box<Location>>,
    pub unmask_on_reload: bool,
    /// `href` points outside the router
    pub external: bool,
}

impl Location {
    /// Assemble a location, deriving `href` and `public_href`
    pub fn new(
        basepath: &str,
        pathname: String,
        search: Arc<SearchMap>,
        search_str: String,
        hash: String,
        state: Arc<HistoryState>,
    ) -> Self {
        let href = format_href(&pathname, &search_str, &hash);
        let public_href = format_href(&with_basepath(basepath, &pathname), &search_str, &hash);
        Self {
            href,
            public_href,
            pathname,
            search,
            search_str,
            hash,
            state,
            masked_location: None,
            unmask_on_reload: false,
            external: false,
        }
    }

    /// A location pointing outside the router
    pub fn external(href: impl Into<String>) -> Self {
        let href = href.into();
        Self {
            public_href: href.clone(),
            href,
            pathname: String::new(),
            search: Arc::default(),
            search_str: String::new(),
            hash: String::new(),
            state: Arc::default(),
            masked_location: None,
            unmask_on_reload: false,
            external: true,
        }
    }

    /// The root location, before any history entry was read
    pub fn root() -> Self {
        Self::new("/", "/".to_string(), Arc::default(), String::new(), String::new(), Arc::default())
    }

    /// The location history should show: the mask if any, else this one
    pub fn visible(&self) -> &Location {
        self.masked_location.as_deref().unwrap_or(self)
    }

    /// The history state without router and backend bookkeeping keys
    pub fn user_state(&self) -> HistoryState {
        strip_internal_state(&self.state)
    }
}

/// Drop history-internal keys (`__*` and `key`) from a state bag
pub fn strip_internal_state(state: &HistoryState) -> HistoryState {
    state
        .iter()
        .filter(|(key, _)| !key.starts_with("__") && key.as_str() != "key")
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn format_href(pathname: &str, search_str: &str, hash: &str) -> String {
    if hash.is_empty() {
        format!("{}{}", pathname, search_str)
    } else {
        format!("{}{}#{}", pathname, search_str, hash)
    }
}

/// Prefix a router pathname with the basepath
pub fn with_basepath(basepath: &str, pathname: &str) -> String {
    if basepath.is_empty() || basepath == "/" {
        pathname.to_string()
    } else {
        join_paths([basepath, pathname])
    }
}

/// Strip the basepath from a public pathname
///
/// A pathname outside the basepath is returned unchanged.
pub fn strip_basepath(basepath: &str, pathname: &str) -> String {
    let basepath = basepath.trim_end_matches('/');
    if basepath.is_empty() {
        return pathname.to_string();
    }

    match pathname.strip_prefix(basepath) {
        Some("") => "/".to_string(),
        Some(rest) if rest.starts_with('/') => rest.to_string(),
        _ => pathname.to_string(),
    }
}

/// Turn a history entry into a [`Location`]
///
/// Search and state reuse the `previous` location's `Arc`s when unchanged.
/// An entry written for a masked location carries the real location in its
/// state; it is restored when the entry has no key or the key is
/// `temp_key`, and the entry itself becomes the mask.
pub fn parse_location(
    entry: &HistoryLocation,
    previous: Option<&Location>,
    codec: &SearchCodec,
    basepath: &str,
    temp_key: &str,
) -> Location {
    let location = parse_entry(entry, previous, codec, basepath);

    let Some(real) = entry.state.get(TEMP_LOCATION_KEY) else {
        return location;
    };
    let key_matches = match entry.state.get(TEMP_KEY) {
        None | Some(Value::Null) => true,
        Some(Value::String(key)) => key == temp_key,
        Some(_) => false,
    };
    if !key_matches {
        return location;
    }

    match serde_json::from_value::<HistoryLocation>(real.clone()) {
        Ok(mut real) => {
            real.state.remove(TEMP_LOCATION_KEY);
            real.state.remove(TEMP_KEY);
            for key in ["key", trailhead_history::location::INDEX_STATE_KEY] {
                if let Some(value) = entry.state.get(key) {
                    real.state.insert(key.to_string(), value.clone());
                }
            }
            let mut unmasked = parse_entry(&real, previous, codec, basepath);
            unmasked.masked_location = Some(Box::new(location));
            unmasked
        }
        Err(err) => {
            tracing::warn!("ignoring malformed {} in history state: {}", TEMP_LOCATION_KEY, err);
            location
        }
    }
}

fn parse_entry(
    entry: &HistoryLocation,
    previous: Option<&Location>,
    codec: &SearchCodec,
    basepath: &str,
) -> Location {
    let search = codec.parse(&entry.search);
    let search_str = codec.stringify(&search);
    let search = replace_equal(previous.map(|p| &p.search), search);
    let state = replace_equal(previous.map(|p| &p.state), entry.state.clone());

    Location::new(
        basepath,
        strip_basepath(basepath, &entry.pathname),
        search,
        search_str,
        entry.hash.trim_start_matches('#').to_string(),
        state,
    )
}

/// The history entry a location is committed as
///
/// A masked location is written as its mask with the real location stashed
/// in the state; `temp_key` is recorded only when the mask should not
/// survive a reload.
pub(crate) fn to_history_entry(location: &Location, temp_key: &str) -> (String, HistoryState) {
    let Some(mask) = location.masked_location.as_deref() else {
        return (location.public_href.clone(), (*location.state).clone());
    };

    let mut real_state = (*location.state).clone();
    real_state.remove(TEMP_LOCATION_KEY);
    real_state.remove(TEMP_KEY);
    real_state.remove("key");
    let real = HistoryLocation {
        pathname: with_basepath_from_public(location),
        search: location.search_str.clone(),
        hash: if location.hash.is_empty() {
            String::new()
        } else {
            format!("#{}", location.hash)
        },
        state: real_state,
    };

    let mut state = (*mask.state).clone();
    state.remove(TEMP_KEY);
    if let Ok(real) = serde_json::to_value(real) {
        state.insert(TEMP_LOCATION_KEY.to_string(), real);
    }
    if location.unmask_on_reload || mask.unmask_on_reload {
        state.insert(TEMP_KEY.to_string(), Value::String(temp_key.to_string()));
    }

    (mask.public_href.clone(), state)
}

fn with_basepath_from_public(location: &Location) -> String {
    let end = location
        .public_href
        .find(['?', '#'])
        .unwrap_or(location.public_href.len());
    location.public_href[..end].to_string()
}
