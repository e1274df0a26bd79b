//! # Trailhead Router
//!
//! The engine of a client-side router for single-page applications:
//! - Path patterns with params (`$id`), optional params (`{-$slug}`),
//!   affixed params (`user-{$id}.json`) and splats (`$`)
//! - A ranked, deterministic route list compiled once from a route tree
//! - Location building with relative paths, param/search/hash/state
//!   instructions, search middlewares and route masks
//! - Match chains with parsed params, validated search and merged context
//! - A load pipeline running `before_load` hooks serially and loaders in
//!   parallel, with stale-while-revalidate caching and preloading
//!
//! ## State Model
//!
//! Matches live in one store tagged with a pool: **active** (committed),
//! **pending** (target of the running navigation) and **cached** (left
//! behind or preloaded). Every change publishes an immutable
//! [`RouterState`] snapshot; subscribers never observe a half-applied
//! transition.
//!
//! ## Example
//!
//! ```
//! use serde_json::json;
//! use trailhead_history::MemoryHistory;
//! use trailhead_router::{NavigateOptions, Route, Router, RouterOptions};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), trailhead_router::RouterError> {
//! let routes = Route::root().with_children([
//!     Route::new("/"),
//!     Route::new("posts").with_child(
//!         Route::new("$postId").with_loader(|ctx| async move {
//!             Ok(json!({ "id": ctx.params.get("postId").cloned() }))
//!         }),
//!     ),
//! ]);
//!
//! let router = Router::new(RouterOptions::new(routes, MemoryHistory::default())).await?;
//! router.load().await?;
//! router.navigate(NavigateOptions::to("/posts/42")).await?;
//!
//! let state = router.state();
//! let leaf = state.matches.last().unwrap();
//! assert_eq!(leaf.route_id, "/posts/$postId");
//! assert_eq!(leaf.loader_data, Some(json!({ "id": "42" })));
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod builder;
pub mod config;
pub mod error;
pub mod events;
mod load;
pub mod location;
pub mod matching;
pub mod path;
pub mod route;
pub mod route_match;
mod router;
pub mod search;
pub mod sharing;
pub mod ssr;
pub mod store;
pub mod updater;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::{BuildLocationOptions, NavigateOptions, RouteMask};
pub use config::{NotFoundMode, RouterConfig, RouterTomlConfig};
pub use error::{NotFound, Redirect, RouteError, RouterError, TreeError};
pub use events::{LocationChange, RouterEvent};
pub use location::Location;
pub use path::TrailingSlash;
pub use route::{
    BeforeLoadContext, LoaderContext, ParentLoader, Route, RouteContextArgs, RouteOptions, RouteTree,
    ShouldReload, ROOT_ROUTE_ID,
};
pub use route_match::{FetchPhase, MatchCause, MatchStatus, RouteMatch};
pub use router::{MatchRouteOptions, Router, RouterOptions};
pub use search::{retain_search_params, strip_search_params, SearchCodec, SearchKeys, StripSearch};
pub use ssr::{DehydratedMatch, DehydratedRouter, SerializationAdapter};
pub use store::{Pool, RouterState, RouterStatus};
pub use updater::Updater;

// ============================================================================
// Core Types
// ============================================================================

/// Path params after parsing, keyed by param name
pub type Params = serde_json::Map<String, serde_json::Value>;

/// Parsed search params
pub type SearchMap = serde_json::Map<String, serde_json::Value>;

/// Context handed down the match chain
pub type Context = serde_json::Map<String, serde_json::Value>;
