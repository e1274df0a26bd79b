// File: src/search.rs
// Purpose: Query string (de)serialization and the search middleware chain

use crate::updater::Updater;
use crate::SearchMap;
use serde_json::Value;
use std::sync::Arc;

/// Turns a raw query string (with or without `?`) into a search object
pub type SearchParser = Arc<dyn Fn(&str) -> SearchMap + Send + Sync>;
/// Turns a search object into a query string (`?a=1` or empty)
pub type SearchStringifier = Arc<dyn Fn(&SearchMap) -> String + Send + Sync>;
/// Legacy pre/post search filter
pub type SearchFilter = Arc<dyn Fn(SearchMap) -> SearchMap + Send + Sync>;
/// One link of the search chain: receives the incoming search and the rest
/// of the chain, returns the outgoing search
pub type SearchMiddleware =
    Arc<dyn Fn(SearchMap, &dyn Fn(SearchMap) -> SearchMap) -> SearchMap + Send + Sync>;

/// Parse a query string into a search object
///
/// Pairs are form-urlencoded. Values that parse as JSON become JSON values;
/// anything else stays a string. Repeated keys collect into an array.
///
/// # Examples
///
/// ```
/// use trailhead_router::search::default_parse_search;
/// use serde_json::json;
///
/// let search = default_parse_search("?page=2&q=rust+lang&tags=%5B%22a%22%5D");
/// assert_eq!(search["page"], json!(2));
/// assert_eq!(search["q"], json!("rust lang"));
/// assert_eq!(search["tags"], json!(["a"]));
/// ```
pub fn default_parse_search(search_str: &str) -> SearchMap {
    let query = search_str.strip_prefix('?').unwrap_or(search_str);
    let mut search = SearchMap::new();

    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        let key = key.into_owned();
        let value = Value::String(value.into_owned());

        match search.get_mut(&key) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                search.insert(key, value);
            }
        }
    }

    for value in search.values_mut() {
        if let Value::String(raw) = value {
            if let Ok(parsed) = serde_json::from_str::<Value>(raw) {
                *value = parsed;
            }
        }
    }

    search
}

/// Serialize a search object into `?key=value&...`, or `""` when empty
///
/// Non-string values are written as JSON. Strings that would read back as
/// JSON are quoted so parsing returns the same string.
///
/// # Examples
///
/// ```
/// use trailhead_router::search::{default_parse_search, default_stringify_search};
/// use serde_json::json;
///
/// let search = json!({"page": 2, "id": "2", "filter": {"tag": "rust"}});
/// let search = search.as_object().unwrap().clone();
///
/// let search_str = default_stringify_search(&search);
/// assert_eq!(default_parse_search(&search_str), search);
/// assert_eq!(default_stringify_search(&Default::default()), "");
/// ```
pub fn default_stringify_search(search: &SearchMap) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    let mut empty = true;

    for (key, value) in search {
        let encoded = match value {
            Value::String(s) if serde_json::from_str::<Value>(s).is_err() => s.clone(),
            other => other.to_string(),
        };
        serializer.append_pair(key, &encoded);
        empty = false;
    }

    if empty {
        String::new()
    } else {
        format!("?{}", serializer.finish())
    }
}

/// The parse/stringify pair a router uses for query strings
#[derive(Clone)]
pub struct SearchCodec {
    pub parse: SearchParser,
    pub stringify: SearchStringifier,
}

impl SearchCodec {
    pub fn new(parse: SearchParser, stringify: SearchStringifier) -> Self {
        Self { parse, stringify }
    }

    pub fn parse(&self, search_str: &str) -> SearchMap {
        (self.parse)(search_str)
    }

    pub fn stringify(&self, search: &SearchMap) -> String {
        (self.stringify)(search)
    }
}

impl Default for SearchCodec {
    fn default() -> Self {
        Self {
            parse: Arc::new(default_parse_search),
            stringify: Arc::new(default_stringify_search),
        }
    }
}

impl std::fmt::Debug for SearchCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchCodec").finish_non_exhaustive()
    }
}

// ============================================================================
// Middleware chain
// ============================================================================

/// Run `search` through `middlewares`, ending with the destination instruction
///
/// The final link returns an empty search when there is no instruction,
/// the incoming search for [`Updater::Preserve`] and the applied value
/// otherwise.
pub fn apply_search_middleware(
    search: SearchMap,
    middlewares: &[SearchMiddleware],
    dest: Option<&Updater<SearchMap>>,
) -> SearchMap {
    fn run(
        index: usize,
        search: SearchMap,
        middlewares: &[SearchMiddleware],
        dest: Option<&Updater<SearchMap>>,
    ) -> SearchMap {
        match middlewares.get(index) {
            Some(middleware) => middleware(search, &|next| run(index + 1, next, middlewares, dest)),
            None => match dest {
                None => SearchMap::new(),
                Some(updater) => updater.apply(&search),
            },
        }
    }

    run(0, search, middlewares, dest)
}

/// Keys a middleware applies to
#[derive(Debug, Clone, PartialEq)]
pub enum SearchKeys {
    All,
    Keys(Vec<String>),
}

/// What [`strip_search_params`] removes
#[derive(Debug, Clone, PartialEq)]
pub enum StripSearch {
    /// Drop every search param
    All,
    /// Drop these keys
    Keys(Vec<String>),
    /// Drop keys whose value equals the given default
    Defaults(SearchMap),
}

/// Middleware carrying current search params into links that do not set them
///
/// # Examples
///
/// ```
/// use trailhead_router::search::{apply_search_middleware, retain_search_params, SearchKeys};
/// use trailhead_router::Updater;
/// use serde_json::json;
///
/// let current = json!({"lang": "en", "page": 3}).as_object().unwrap().clone();
/// let next = json!({"page": 1}).as_object().unwrap().clone();
///
/// let chain = [retain_search_params(SearchKeys::Keys(vec!["lang".into()]))];
/// let search = apply_search_middleware(current, &chain, Some(&Updater::Literal(next)));
/// assert_eq!(search, json!({"page": 1, "lang": "en"}).as_object().unwrap().clone());
/// ```
pub fn retain_search_params(keys: SearchKeys) -> SearchMiddleware {
    Arc::new(move |search: SearchMap, next: &dyn Fn(SearchMap) -> SearchMap| {
        let mut result = next(search.clone());
        match &keys {
            SearchKeys::All => {
                let mut merged = search;
                merged.extend(result);
                merged
            }
            SearchKeys::Keys(keys) => {
                for key in keys {
                    if !result.contains_key(key) {
                        if let Some(value) = search.get(key) {
                            result.insert(key.clone(), value.clone());
                        }
                    }
                }
                result
            }
        }
    })
}

/// Middleware removing search params from generated links
pub fn strip_search_params(input: StripSearch) -> SearchMiddleware {
    Arc::new(move |search: SearchMap, next: &dyn Fn(SearchMap) -> SearchMap| {
        if input == StripSearch::All {
            return SearchMap::new();
        }

        let mut result = next(search);
        match &input {
            StripSearch::All => {}
            StripSearch::Keys(keys) => {
                for key in keys {
                    result.shift_remove(key);
                }
            }
            StripSearch::Defaults(defaults) => {
                for (key, default) in defaults {
                    if result.get(key) == Some(default) {
                        result.shift_remove(key);
                    }
                }
            }
        }
        result
    })
}

/// Wrap legacy pre/post filters as one middleware
pub(crate) fn filter_middleware(pre: Vec<SearchFilter>, post: Vec<SearchFilter>) -> SearchMiddleware {
    Arc::new(move |search: SearchMap, next: &dyn Fn(SearchMap) -> SearchMap| {
        let search = pre.iter().fold(search, |acc, filter| filter(acc));
        let result = next(search);
        post.iter().fold(result, |acc, filter| filter(acc))
    })
}
