// File: src/route_match.rs
// Purpose: A route instantiated against a concrete pathname

use crate::error::RouteError;
use crate::{Context, Params, SearchMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use trailhead_history::HistoryState;

/// Where a match is in its load lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchStatus {
    Pending,
    Success,
    Error,
    Redirected,
    NotFound,
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchStatus::Pending => write!(f, "pending"),
            MatchStatus::Success => write!(f, "success"),
            MatchStatus::Error => write!(f, "error"),
            MatchStatus::Redirected => write!(f, "redirected"),
            MatchStatus::NotFound => write!(f, "notFound"),
        }
    }
}

/// Which hook is currently running for a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FetchPhase {
    #[default]
    Idle,
    BeforeLoad,
    Loader,
}

/// Why a match is part of a load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchCause {
    /// The route was not active before this navigation
    Enter,
    /// The route was already active
    Stay,
    /// Loaded ahead of a navigation
    Preload,
}

/// One route's instantiation against a pathname
///
/// Records are immutable once published: the load pipeline replaces a
/// match with an updated copy instead of mutating it in place.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// Interpolated route id plus serialized loader deps; the dedup key
    pub id: String,
    pub route_id: String,
    pub full_path: String,
    /// Position in the matched chain, root is 0
    pub index: usize,
    /// Interpolated full path of this route
    pub pathname: String,

    /// Accumulated parsed params, shared by the whole chain
    pub params: Arc<Params>,
    /// Params this route itself contributes
    pub strict_params: Params,
    /// Merged search: parent search plus this route's validated search
    pub search: Arc<SearchMap>,
    /// This route's validated search only
    pub strict_search: SearchMap,
    /// History state after this route's validator
    pub state: HistoryState,

    pub status: MatchStatus,
    pub fetch_phase: FetchPhase,
    pub invalid: bool,
    /// Loaded by a preload and not yet shown
    pub preload: bool,
    pub cause: MatchCause,
    /// This match renders the not-found state for an unmatched pathname
    pub global_not_found: bool,

    pub loader_deps: Value,
    /// Parent context, this route's context function and before-load result
    pub context: Context,
    /// Result of the route's `context` function
    pub route_context: Context,
    pub before_load_context: Context,

    pub loader_data: Option<Value>,
    pub error: Option<RouteError>,
    pub params_error: Option<RouteError>,
    pub search_error: Option<RouteError>,
    pub state_error: Option<RouteError>,

    /// Last successful load, or creation time before the first one
    pub updated_at: DateTime<Utc>,
    pub fetch_count: u32,
    /// Cancelled when the navigation owning this match is abandoned
    pub abort: CancellationToken,
    /// Loader data was restored from a server snapshot
    pub dehydrated: bool,
}

impl RouteMatch {
    pub fn is_fetching(&self) -> bool {
        self.fetch_phase != FetchPhase::Idle
    }

    /// Time since the last successful load
    pub fn age(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.updated_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// The match has finished loading, successfully or not
    pub fn is_settled(&self) -> bool {
        self.status != MatchStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display_and_serde() {
        assert_eq!(MatchStatus::NotFound.to_string(), "notFound");
        assert_eq!(
            serde_json::to_value(MatchStatus::NotFound).unwrap(),
            serde_json::json!("notFound")
        );
        let status: MatchStatus = serde_json::from_str("\"success\"").unwrap();
        assert_eq!(status, MatchStatus::Success);
    }

    #[test]
    fn test_fetch_phase_default_is_idle() {
        assert_eq!(FetchPhase::default(), FetchPhase::Idle);
    }
}
