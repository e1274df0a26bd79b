/// Route definitions and the compiled route tree
///
/// A [`Route`] is a declarative node: a path pattern, children and an
/// option bag of hooks. [`tree::RouteTree`] compiles a root route once
/// into id/path indices and the ranked flat list used for matching.
pub mod rank;
pub mod tree;

pub use rank::{compare_routes, RouteScore};
pub use tree::{Ancestors, NodeId, RouteNode, RouteTree, ROOT_ROUTE_ID};

use crate::error::RouteError;
use crate::location::Location;
use crate::route_match::{MatchCause, RouteMatch};
use crate::router::Router;
use crate::search::{SearchFilter, SearchMiddleware};
use crate::{Context, Params, SearchMap};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Hook Signatures
// ============================================================================

pub type ParseParamsFn = Arc<dyn Fn(&Params) -> anyhow::Result<Params> + Send + Sync>;
pub type StringifyParamsFn = Arc<dyn Fn(&Params) -> Params + Send + Sync>;
/// Validator for search params and history state
pub type ValidateFn =
    Arc<dyn Fn(&Map<String, Value>) -> anyhow::Result<Map<String, Value>> + Send + Sync>;
pub type LoaderDepsFn = Arc<dyn Fn(&SearchMap) -> Value + Send + Sync>;
pub type ContextFn = Arc<dyn Fn(&RouteContextArgs) -> Context + Send + Sync>;
pub type BeforeLoadFn = Arc<
    dyn Fn(BeforeLoadContext) -> BoxFuture<'static, Result<Option<Context>, RouteError>>
        + Send
        + Sync,
>;
pub type LoaderFn =
    Arc<dyn Fn(LoaderContext) -> BoxFuture<'static, Result<Value, RouteError>> + Send + Sync>;
pub type ShouldReloadFn = Arc<dyn Fn(&LoaderContext) -> bool + Send + Sync>;
/// Error hook; returning an error replaces the original one
pub type OnErrorFn = Arc<dyn Fn(&RouteError) -> Option<RouteError> + Send + Sync>;
pub type MatchHookFn = Arc<dyn Fn(&RouteMatch) + Send + Sync>;

/// Override for the loader staleness check
#[derive(Clone)]
pub enum ShouldReload {
    Always(bool),
    Dynamic(ShouldReloadFn),
}

impl fmt::Debug for ShouldReload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShouldReload::Always(value) => f.debug_tuple("Always").field(value).finish(),
            ShouldReload::Dynamic(_) => write!(f, "Dynamic(..)"),
        }
    }
}

// ============================================================================
// Hook Arguments
// ============================================================================

/// Arguments of a route's `context` function
#[derive(Debug, Clone)]
pub struct RouteContextArgs {
    pub params: Arc<Params>,
    pub deps: Value,
    /// Merged context of the parent match
    pub context: Context,
    pub location: Location,
    pub cause: MatchCause,
    pub preload: bool,
}

/// Arguments of a route's `before_load` hook
#[derive(Clone)]
pub struct BeforeLoadContext {
    pub route_id: String,
    pub match_id: String,
    pub params: Arc<Params>,
    pub search: Arc<SearchMap>,
    /// Parent context plus this route's `context` result
    pub context: Context,
    pub location: Location,
    pub cause: MatchCause,
    pub preload: bool,
    /// Cancelled when the navigation owning this match is abandoned
    pub signal: CancellationToken,
    pub router: Router,
}

/// Arguments of a route's `loader`
#[derive(Clone)]
pub struct LoaderContext {
    pub route_id: String,
    pub match_id: String,
    pub params: Arc<Params>,
    pub deps: Value,
    pub context: Context,
    pub location: Location,
    pub cause: MatchCause,
    pub preload: bool,
    pub signal: CancellationToken,
    /// Handle on the parent match's loader
    pub parent: ParentLoader,
    pub router: Router,
}

/// Awaitable handle on the parent match's loader data
#[derive(Clone, Default)]
pub struct ParentLoader {
    pub(crate) pending: Option<Shared<BoxFuture<'static, Option<Value>>>>,
}

impl ParentLoader {
    pub(crate) fn new(pending: Shared<BoxFuture<'static, Option<Value>>>) -> Self {
        Self {
            pending: Some(pending),
        }
    }

    /// Wait for the parent's loader to settle and return its data
    pub async fn data(&self) -> Option<Value> {
        match &self.pending {
            Some(pending) => pending.clone().await,
            None => None,
        }
    }
}

impl fmt::Debug for BeforeLoadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeforeLoadContext")
            .field("route_id", &self.route_id)
            .field("match_id", &self.match_id)
            .field("cause", &self.cause)
            .field("preload", &self.preload)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for LoaderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderContext")
            .field("route_id", &self.route_id)
            .field("match_id", &self.match_id)
            .field("deps", &self.deps)
            .field("cause", &self.cause)
            .field("preload", &self.preload)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Route Options
// ============================================================================

/// Per-route behavior, all optional
#[derive(Clone, Default)]
pub struct RouteOptions {
    pub parse_params: Option<ParseParamsFn>,
    pub stringify_params: Option<StringifyParamsFn>,
    /// Parse params while matching and fall through to the next candidate on failure
    pub skip_route_on_parse_error: bool,
    pub validate_search: Option<ValidateFn>,
    pub validate_state: Option<ValidateFn>,
    pub search_middlewares: Option<Vec<SearchMiddleware>>,
    pub pre_search_filters: Vec<SearchFilter>,
    pub post_search_filters: Vec<SearchFilter>,
    pub loader_deps: Option<LoaderDepsFn>,
    pub context: Option<ContextFn>,
    pub before_load: Option<BeforeLoadFn>,
    pub loader: Option<LoaderFn>,
    pub stale_time: Option<Duration>,
    pub preload_stale_time: Option<Duration>,
    pub gc_time: Option<Duration>,
    pub preload_gc_time: Option<Duration>,
    pub should_reload: Option<ShouldReload>,
    /// `false` opts the route out of preloading
    pub preload: Option<bool>,
    pub on_error: Option<OnErrorFn>,
    pub on_enter: Option<MatchHookFn>,
    pub on_leave: Option<MatchHookFn>,
    pub on_stay: Option<MatchHookFn>,
    pub case_sensitive: Option<bool>,
    /// The route renders not-found states for its subtree
    pub not_found_boundary: bool,
}

impl fmt::Debug for RouteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteOptions")
            .field("parse_params", &self.parse_params.is_some())
            .field("skip_route_on_parse_error", &self.skip_route_on_parse_error)
            .field("validate_search", &self.validate_search.is_some())
            .field("before_load", &self.before_load.is_some())
            .field("loader", &self.loader.is_some())
            .field("stale_time", &self.stale_time)
            .field("gc_time", &self.gc_time)
            .field("case_sensitive", &self.case_sensitive)
            .field("not_found_boundary", &self.not_found_boundary)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Route
// ============================================================================

/// A node of the declared route tree
///
/// # Examples
///
/// ```
/// use trailhead_router::{Route, RouteTree};
///
/// let root = Route::root().with_children([
///     Route::new("/"),
///     Route::new("posts").with_child(Route::new("$postId")),
///     Route::layout("_auth").with_child(Route::new("settings")),
/// ]);
///
/// let tree = RouteTree::build(root).unwrap();
/// assert!(tree.by_id("/posts/$postId").is_some());
/// assert!(tree.by_id("/_auth/settings").is_some());
/// assert_eq!(tree.node(tree.by_id("/_auth/settings").unwrap()).full_path, "/settings");
/// ```
#[derive(Debug, Clone)]
pub struct Route {
    pub(crate) path: Option<String>,
    pub(crate) custom_id: Option<String>,
    pub(crate) children: Vec<Route>,
    pub(crate) options: RouteOptions,
}

impl Route {
    /// The root route (`__root__`, full path `/`)
    pub fn root() -> Self {
        Self {
            path: None,
            custom_id: None,
            children: Vec::new(),
            options: RouteOptions::default(),
        }
    }

    /// A route matching `path` relative to its parent
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::root()
        }
    }

    /// A pathless layout route identified by `id`
    pub fn layout(id: impl Into<String>) -> Self {
        Self {
            custom_id: Some(id.into()),
            ..Self::root()
        }
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn options(&self) -> &RouteOptions {
        &self.options
    }

    pub fn children(&self) -> &[Route] {
        &self.children
    }

    /// Use `id` instead of the path when deriving this route's id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.custom_id = Some(id.into());
        self
    }

    pub fn with_child(mut self, route: Route) -> Self {
        self.children.push(route);
        self
    }

    pub fn with_children<I>(mut self, routes: I) -> Self
    where
        I: IntoIterator<Item = Route>,
    {
        self.children.extend(routes);
        self
    }

    pub fn with_options(mut self, options: RouteOptions) -> Self {
        self.options = options;
        self
    }

    // ========================================================================
    // Params
    // ========================================================================

    pub fn with_params_parse<F>(mut self, parse: F) -> Self
    where
        F: Fn(&Params) -> anyhow::Result<Params> + Send + Sync + 'static,
    {
        self.options.parse_params = Some(Arc::new(parse));
        self
    }

    pub fn with_params_stringify<F>(mut self, stringify: F) -> Self
    where
        F: Fn(&Params) -> Params + Send + Sync + 'static,
    {
        self.options.stringify_params = Some(Arc::new(stringify));
        self
    }

    pub fn with_skip_route_on_parse_error(mut self, skip: bool) -> Self {
        self.options.skip_route_on_parse_error = skip;
        self
    }

    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.options.case_sensitive = Some(case_sensitive);
        self
    }

    // ========================================================================
    // Search & State
    // ========================================================================

    pub fn with_validate_search<F>(mut self, validate: F) -> Self
    where
        F: Fn(&SearchMap) -> anyhow::Result<SearchMap> + Send + Sync + 'static,
    {
        self.options.validate_search = Some(Arc::new(validate));
        self
    }

    pub fn with_validate_state<F>(mut self, validate: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> anyhow::Result<Map<String, Value>> + Send + Sync + 'static,
    {
        self.options.validate_state = Some(Arc::new(validate));
        self
    }

    pub fn with_search_middleware(mut self, middleware: SearchMiddleware) -> Self {
        self.options
            .search_middlewares
            .get_or_insert_with(Vec::new)
            .push(middleware);
        self
    }

    pub fn with_pre_search_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(SearchMap) -> SearchMap + Send + Sync + 'static,
    {
        self.options.pre_search_filters.push(Arc::new(filter));
        self
    }

    pub fn with_post_search_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(SearchMap) -> SearchMap + Send + Sync + 'static,
    {
        self.options.post_search_filters.push(Arc::new(filter));
        self
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn with_loader_deps<F>(mut self, deps: F) -> Self
    where
        F: Fn(&SearchMap) -> Value + Send + Sync + 'static,
    {
        self.options.loader_deps = Some(Arc::new(deps));
        self
    }

    /// Context contributed when the match is first created
    pub fn with_context<F>(mut self, context: F) -> Self
    where
        F: Fn(&RouteContextArgs) -> Context + Send + Sync + 'static,
    {
        self.options.context = Some(Arc::new(context));
        self
    }

    pub fn with_before_load<F, Fut>(mut self, before_load: F) -> Self
    where
        F: Fn(BeforeLoadContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Context>, RouteError>> + Send + 'static,
    {
        self.options.before_load = Some(Arc::new(
            move |ctx| -> BoxFuture<'static, Result<Option<Context>, RouteError>> {
                before_load(ctx).boxed()
            },
        ));
        self
    }

    pub fn with_loader<F, Fut>(mut self, loader: F) -> Self
    where
        F: Fn(LoaderContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RouteError>> + Send + 'static,
    {
        self.options.loader = Some(Arc::new(
            move |ctx| -> BoxFuture<'static, Result<Value, RouteError>> { loader(ctx).boxed() },
        ));
        self
    }

    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.options.stale_time = Some(stale_time);
        self
    }

    pub fn with_preload_stale_time(mut self, stale_time: Duration) -> Self {
        self.options.preload_stale_time = Some(stale_time);
        self
    }

    pub fn with_gc_time(mut self, gc_time: Duration) -> Self {
        self.options.gc_time = Some(gc_time);
        self
    }

    pub fn with_preload_gc_time(mut self, gc_time: Duration) -> Self {
        self.options.preload_gc_time = Some(gc_time);
        self
    }

    pub fn with_should_reload(mut self, should_reload: ShouldReload) -> Self {
        self.options.should_reload = Some(should_reload);
        self
    }

    pub fn with_preload(mut self, preload: bool) -> Self {
        self.options.preload = Some(preload);
        self
    }

    pub fn with_on_error<F>(mut self, on_error: F) -> Self
    where
        F: Fn(&RouteError) -> Option<RouteError> + Send + Sync + 'static,
    {
        self.options.on_error = Some(Arc::new(on_error));
        self
    }

    pub fn with_on_enter<F>(mut self, hook: F) -> Self
    where
        F: Fn(&RouteMatch) + Send + Sync + 'static,
    {
        self.options.on_enter = Some(Arc::new(hook));
        self
    }

    pub fn with_on_leave<F>(mut self, hook: F) -> Self
    where
        F: Fn(&RouteMatch) + Send + Sync + 'static,
    {
        self.options.on_leave = Some(Arc::new(hook));
        self
    }

    pub fn with_on_stay<F>(mut self, hook: F) -> Self
    where
        F: Fn(&RouteMatch) + Send + Sync + 'static,
    {
        self.options.on_stay = Some(Arc::new(hook));
        self
    }

    /// Mark this route as the one rendering not-found states for its subtree
    pub fn with_not_found_boundary(mut self) -> Self {
        self.options.not_found_boundary = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_fill_options() {
        let route = Route::new("posts")
            .with_stale_time(Duration::from_secs(10))
            .with_skip_route_on_parse_error(true)
            .with_loader(|_ctx| async { Ok(Value::Null) })
            .with_on_error(|_err| None);

        assert_eq!(route.path(), Some("posts"));
        assert_eq!(route.options().stale_time, Some(Duration::from_secs(10)));
        assert!(route.options().skip_route_on_parse_error);
        assert!(route.options().loader.is_some());
        assert!(route.options().before_load.is_none());
    }

    #[test]
    fn test_layout_has_no_path() {
        let route = Route::layout("_auth");
        assert!(route.path().is_none());
        assert_eq!(route.custom_id.as_deref(), Some("_auth"));
    }

    #[tokio::test]
    async fn test_parent_loader_without_parent_is_none() {
        assert_eq!(ParentLoader::default().data().await, None);
    }
}
