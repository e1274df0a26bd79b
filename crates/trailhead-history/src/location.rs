//! History entries and href parsing

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Arbitrary state attached to a history entry
pub type HistoryState = Map<String, Value>;

/// Key under which backends record an entry's position in the stack
pub const INDEX_STATE_KEY: &str = "__index";

/// One entry of the session history.
///
/// `search` keeps its leading `?` and `hash` its leading `#` (both empty
/// when absent), so `href()` is a plain concatenation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryLocation {
    pub pathname: String,
    pub search: String,
    pub hash: String,
    #[serde(default)]
    pub state: HistoryState,
}

impl HistoryLocation {
    pub fn href(&self) -> String {
        format!("{}{}{}", self.pathname, self.search, self.hash)
    }
}

impl Default for HistoryLocation {
    fn default() -> Self {
        Self {
            pathname: "/".to_string(),
            search: String::new(),
            hash: String::new(),
            state: HistoryState::new(),
        }
    }
}

/// What produced a history change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryAction {
    Push,
    Replace,
    /// Traversal through existing entries (`go`, `back`, `forward`)
    Pop,
}

impl std::fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HistoryAction::Push => write!(f, "push"),
            HistoryAction::Replace => write!(f, "replace"),
            HistoryAction::Pop => write!(f, "pop"),
        }
    }
}

/// Broadcast to subscribers after every stack change
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEvent {
    pub action: HistoryAction,
    pub location: HistoryLocation,
}

/// Split an href into its pathname, search and hash parts.
///
/// **Pure function**: an empty pathname becomes `/`.
///
/// # Examples
///
/// ```
/// use trailhead_history::{parse_href, HistoryState};
///
/// let loc = parse_href("/posts?page=2#top", HistoryState::new());
/// assert_eq!(loc.pathname, "/posts");
/// assert_eq!(loc.search, "?page=2");
/// assert_eq!(loc.hash, "#top");
/// ```
pub fn parse_href(href: &str, state: HistoryState) -> HistoryLocation {
    let (rest, hash) = match href.find('#') {
        Some(index) => href.split_at(index),
        None => (href, ""),
    };
    let (pathname, search) = match rest.find('?') {
        Some(index) => rest.split_at(index),
        None => (rest, ""),
    };

    HistoryLocation {
        pathname: if pathname.is_empty() {
            "/".to_string()
        } else {
            pathname.to_string()
        },
        search: search.to_string(),
        hash: hash.to_string(),
        state,
    }
}
