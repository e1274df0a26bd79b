// File: src/router.rs
// Purpose: Router facade: navigation, loading, preloading, cache and history wiring

use crate::builder::{self, BuildEnv, BuildLocationOptions, NavigateOptions, RouteMask};
use crate::config::RouterConfig;
use crate::error::{Redirect, RouteError, RouterError};
use crate::events::{LocationChange, RouterEvent};
use crate::load::{InFlight, LoadRun};
use crate::location::{parse_location, strip_basepath, strip_internal_state, to_history_entry, Location};
use crate::matching::{self, raw_to_params, MatchEnv, MatchRoutesOptions};
use crate::path::matcher::{match_pathname, MatchOptions};
use crate::path::{trim_path_right, ParseCache};
use crate::route::{Route, RouteTree};
use crate::route_match::{MatchStatus, RouteMatch};
use crate::search::SearchCodec;
use crate::sharing::partial_deep_equal;
use crate::ssr::SerializationAdapter;
use crate::store::{MatchStore, Pool, RouterState, RouterStatus};
use crate::updater::Updater;
use crate::{Context, Params};
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use trailhead_history::{parse_href, History, HistoryAction, HistoryState};

/// A load shared between every caller waiting on the same location
type SharedLoad = Shared<BoxFuture<'static, Result<Option<Redirect>, RouterError>>>;

const EVENT_CAPACITY: usize = 64;

// ============================================================================
// Options
// ============================================================================

/// Everything a router is constructed from
#[derive(Clone)]
pub struct RouterOptions {
    pub routes: Route,
    pub history: Arc<dyn History>,
    pub config: RouterConfig,
    /// Root of every match's context
    pub context: Context,
    pub route_masks: Vec<RouteMask>,
    pub search: SearchCodec,
    /// Running on a server: redirects are recorded instead of followed
    pub is_server: bool,
    pub adapters: Vec<SerializationAdapter>,
}

impl RouterOptions {
    pub fn new<H>(routes: Route, history: H) -> Self
    where
        H: History + 'static,
    {
        Self::with_history(routes, Arc::new(history))
    }

    pub fn with_history(routes: Route, history: Arc<dyn History>) -> Self {
        Self {
            routes,
            history,
            config: RouterConfig::default(),
            context: Context::new(),
            route_masks: Vec::new(),
            search: SearchCodec::default(),
            is_server: false,
            adapters: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    pub fn with_route_mask(mut self, mask: RouteMask) -> Self {
        self.route_masks.push(mask);
        self
    }

    pub fn with_search_codec(mut self, codec: SearchCodec) -> Self {
        self.search = codec;
        self
    }

    pub fn with_server(mut self, is_server: bool) -> Self {
        self.is_server = is_server;
        self
    }

    pub fn with_adapter(mut self, adapter: SerializationAdapter) -> Self {
        self.adapters.push(adapter);
        self
    }
}

/// Options of [`Router::match_route`]
#[derive(Debug, Clone, Copy)]
pub struct MatchRouteOptions {
    /// Test the location being loaded instead of the resolved one;
    /// `None` picks the pending location while a load is running
    pub pending: Option<bool>,
    /// Also require the target's search to be contained in the current one
    pub include_search: bool,
    pub fuzzy: bool,
    pub case_sensitive: bool,
}

impl Default for MatchRouteOptions {
    fn default() -> Self {
        Self {
            pending: None,
            include_search: true,
            fuzzy: false,
            case_sensitive: false,
        }
    }
}

// ============================================================================
// Router
// ============================================================================

pub(crate) struct RouterInner {
    pub tree: RouteTree,
    pub config: RouterConfig,
    pub history: Arc<dyn History>,
    pub codec: SearchCodec,
    pub route_masks: Vec<RouteMask>,
    pub context: Context,
    pub parse_cache: ParseCache,
    pub store: MatchStore,
    pub in_flight: Mutex<HashMap<String, InFlight>>,
    pub is_server: bool,
    pub adapters: Vec<SerializationAdapter>,
    pub temp_key: String,
    events: broadcast::Sender<RouterEvent>,
    latest_location: RwLock<Location>,
    latest_load: Mutex<Option<(u64, SharedLoad)>>,
    load_generation: AtomicU64,
    redirects: mpsc::UnboundedSender<Redirect>,
    redirect_rx: Mutex<Option<mpsc::UnboundedReceiver<Redirect>>>,
}

/// A client-side router
///
/// Cheap to clone; clones share the same state.
///
/// # Examples
///
/// ```
/// use trailhead_history::MemoryHistory;
/// use trailhead_router::{NavigateOptions, Route, Router, RouterOptions};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), trailhead_router::RouterError> {
/// let routes = Route::root().with_children([Route::new("/"), Route::new("posts")]);
/// let router = Router::new(RouterOptions::new(routes, MemoryHistory::default())).await?;
///
/// router.load().await?;
/// router.navigate(NavigateOptions::to("/posts")).await?;
/// assert_eq!(router.state().location.pathname, "/posts");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Router {
    pub(crate) inner: Arc<RouterInner>,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.inner.tree.len())
            .field("history", &self.inner.history.name())
            .field("basepath", &self.inner.config.basepath)
            .field("is_server", &self.inner.is_server)
            .finish_non_exhaustive()
    }
}

impl Router {
    /// Build the route tree and read the current history entry
    pub async fn new(options: RouterOptions) -> Result<Self, RouterError> {
        let tree = RouteTree::build(options.routes)?;
        let temp_key = uuid::Uuid::new_v4().simple().to_string();
        let entry = options.history.location().await;
        let location = parse_location(
            &entry,
            None,
            &options.search,
            &options.config.basepath,
            &temp_key,
        );

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (redirects, redirect_rx) = mpsc::unbounded_channel();

        info!(
            "Router created with {} routes on {} history at {}",
            tree.len(),
            options.history.name(),
            location.href
        );

        Ok(Self {
            inner: Arc::new(RouterInner {
                tree,
                config: options.config,
                history: options.history,
                codec: options.search,
                route_masks: options.route_masks,
                context: options.context,
                parse_cache: ParseCache::default(),
                store: MatchStore::new(location.clone()),
                in_flight: Mutex::new(HashMap::new()),
                is_server: options.is_server,
                adapters: options.adapters,
                temp_key,
                events,
                latest_location: RwLock::new(location),
                latest_load: Mutex::new(None),
                load_generation: AtomicU64::new(0),
                redirects,
                redirect_rx: Mutex::new(Some(redirect_rx)),
            }),
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn tree(&self) -> &RouteTree {
        &self.inner.tree
    }

    pub fn config(&self) -> &RouterConfig {
        &self.inner.config
    }

    pub fn history(&self) -> &Arc<dyn History> {
        &self.inner.history
    }

    /// Current snapshot
    pub fn state(&self) -> Arc<RouterState> {
        self.inner.store.state()
    }

    /// Receive a new snapshot after every change
    pub fn watch(&self) -> watch::Receiver<Arc<RouterState>> {
        self.inner.store.watch()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RouterEvent> {
        self.inner.events.subscribe()
    }

    /// A match from any pool: cached, then pending, then active
    pub fn get_match(&self, id: &str) -> Option<Arc<RouteMatch>> {
        self.inner.store.get_match(id)
    }

    /// HTTP status of the last load
    pub fn status_code(&self) -> u16 {
        self.inner.store.read(|s| s.status_code)
    }

    /// The location most recently read from history
    pub fn latest_location(&self) -> Location {
        self.inner.latest_location.read().clone()
    }

    /// The href the history backend exposes for `location`
    pub fn create_href(&self, location: &Location) -> String {
        self.inner.history.create_href(&location.public_href)
    }

    // ========================================================================
    // Matching & building
    // ========================================================================

    /// Build a location relative to the latest one
    pub fn build_location(&self, options: &BuildLocationOptions) -> Result<Location, RouterError> {
        let latest = self.latest_location();
        let from_matches: Vec<Arc<RouteMatch>> = self
            .match_routes_with(
                &latest,
                MatchRoutesOptions {
                    build_location: true,
                    ..Default::default()
                },
            )
            .into_iter()
            .map(Arc::new)
            .collect();
        let pending_search = self.inner.store.read(|s| {
            s.has_pending()
                .then(|| s.view(Pool::Pending).last().map(|m| Arc::clone(&m.search)))
                .flatten()
        });

        let env = BuildEnv {
            tree: &self.inner.tree,
            config: &self.inner.config,
            parse_cache: &self.inner.parse_cache,
            codec: &self.inner.codec,
            route_masks: &self.inner.route_masks,
            latest: &latest,
            from_matches: &from_matches,
            pending_search,
        };
        builder::build_location(&env, options)
    }

    /// Match `location` against the tree without touching router state
    pub fn match_routes(&self, location: &Location) -> Vec<RouteMatch> {
        self.match_routes_with(location, MatchRoutesOptions::default())
    }

    pub(crate) fn match_routes_with(&self, location: &Location, opts: MatchRoutesOptions) -> Vec<RouteMatch> {
        let state = self.inner.store.state();
        let lookup = |id: &str| state.get_match(id).cloned();
        let env = MatchEnv {
            tree: &self.inner.tree,
            config: &self.inner.config,
            parse_cache: &self.inner.parse_cache,
            router_context: &self.inner.context,
            lookup: &lookup,
            active: &state.matches,
        };
        matching::match_routes(&env, location, opts)
    }

    /// Test whether the current location matches a target
    ///
    /// Returns the target's raw params on a match. Params given in
    /// `location` must be contained in the captured ones, and with
    /// `include_search` so must the target's search in the current search.
    pub fn match_route(
        &self,
        location: &BuildLocationOptions,
        options: MatchRouteOptions,
    ) -> Result<Option<Params>, RouterError> {
        let mut target = location.clone();
        target.leave_params = true;
        if target.params.is_none() {
            target.params = Some(Updater::Literal(Params::new()));
        }
        let next = self.build_location(&target)?;

        let (status, is_loading, resolved) = self
            .inner
            .store
            .read(|s| (s.status, s.is_loading, s.resolved_location.clone().unwrap_or_else(|| s.location.clone())));
        if options.pending == Some(true) && status != RouterStatus::Pending {
            return Ok(None);
        }
        let base = if options.pending.unwrap_or(is_loading) {
            self.latest_location()
        } else {
            resolved
        };

        let Some(raw) = match_pathname(
            &base.pathname,
            MatchOptions::new(&next.pathname)
                .with_fuzzy(options.fuzzy)
                .with_case_sensitive(options.case_sensitive),
        ) else {
            return Ok(None);
        };
        let captured = raw_to_params(&raw);

        if let Some(Updater::Literal(expected)) = location.params.as_ref() {
            if !partial_deep_equal(&captured, expected) {
                return Ok(None);
            }
        }
        if options.include_search && !partial_deep_equal(&base.search, &next.search) {
            return Ok(None);
        }
        Ok(Some(captured))
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    /// Commit a new location to history and load it
    pub async fn navigate(&self, options: impl Into<NavigateOptions>) -> Result<(), RouterError> {
        let options = options.into();
        let mut target = options.location.clone();

        if let Some(href) = options.href.as_deref() {
            if options.reload_document || builder::is_external(href) {
                self.emit(RouterEvent::ReloadDocument {
                    href: href.to_string(),
                    replace: options.replace,
                });
                return Ok(());
            }
            let parsed = parse_href(href, HistoryState::new());
            target.to = Some(strip_basepath(&self.inner.config.basepath, &parsed.pathname));
            target.search = Some(Updater::Literal(self.inner.codec.parse(&parsed.search)));
            target.hash = Some(Updater::Literal(parsed.hash.trim_start_matches('#').to_string()));
        }

        let next = self.build_location(&target.with_validated_search())?;
        if next.external || options.reload_document {
            self.emit(RouterEvent::ReloadDocument {
                href: next.public_href.clone(),
                replace: options.replace,
            });
            return Ok(());
        }

        self.commit_location(&next, options.replace).await?;
        self.load().await
    }

    /// Write `next` to history unless it is already the current entry
    async fn commit_location(&self, next: &Location, replace: bool) -> Result<(), RouterError> {
        let latest = self.latest_location();
        let same_url = trim_path_right(&latest.href) == trim_path_right(&next.href)
            && latest.masked_location.as_ref().map(|m| &m.href)
                == next.masked_location.as_ref().map(|m| &m.href);
        let same_state = strip_internal_state(&latest.state) == strip_internal_state(&next.state);
        if same_url && same_state {
            debug!("{} is already the current entry", next.href);
            return Ok(());
        }

        let (href, mut state) = to_history_entry(next, &self.inner.temp_key);
        state.insert(
            "key".to_string(),
            Value::String(uuid::Uuid::new_v4().simple().to_string()[..8].to_string()),
        );

        if replace {
            self.inner.history.replace(&href, state).await?;
        } else {
            self.inner.history.push(&href, state).await?;
        }
        Ok(())
    }

    /// Load the current history entry
    ///
    /// Resolves once the location (and any redirect it led to) has settled.
    /// Stale successful matches are revalidated in the background.
    pub async fn load(&self) -> Result<(), RouterError> {
        self.load_with(false).await
    }

    /// Like [`Router::load`]; with `sync` stale matches are reloaded before
    /// the load resolves
    pub async fn load_with(&self, sync: bool) -> Result<(), RouterError> {
        let max = self.inner.config.max_redirects;
        let mut hops = 0;

        while let Some(redirect) = self.load_latest(sync).await? {
            if self.inner.is_server {
                debug!("server load stopped at redirect {:?}", redirect.href);
                break;
            }
            hops += 1;
            if hops > max {
                warn!("redirect limit of {} exceeded", max);
                return Err(RouterError::TooManyRedirects(max));
            }
            if !self.follow_redirect(&redirect).await? {
                break;
            }
        }
        Ok(())
    }

    /// Move history to a redirect target; `false` when the host takes over
    async fn follow_redirect(&self, redirect: &Redirect) -> Result<bool, RouterError> {
        if redirect.reload_document {
            self.emit(RouterEvent::ReloadDocument {
                href: redirect.href.clone().unwrap_or_default(),
                replace: true,
            });
            return Ok(false);
        }

        let next = self.build_location(&redirect.location)?;
        info!("Redirecting to {}", next.href);
        self.commit_location(&next, true).await?;
        Ok(true)
    }

    /// Load the latest history entry, joining loads started meanwhile
    async fn load_latest(&self, sync: bool) -> Result<Option<Redirect>, RouterError> {
        let next = self.read_history_location().await;

        let own = self.inner.load_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let router = self.clone();
        let load: SharedLoad = async move { router.run_load(next, sync, own).await }
            .boxed()
            .shared();
        *self.inner.latest_load.lock() = Some((own, load.clone()));

        let mut generation = own;
        let mut result = load.await;
        loop {
            let newer = self
                .inner
                .latest_load
                .lock()
                .as_ref()
                .filter(|(g, _)| *g > generation)
                .map(|(g, load)| (*g, load.clone()));
            match newer {
                Some((g, load)) => {
                    generation = g;
                    result = load.await;
                }
                None => break,
            }
        }

        // A newer load's redirect belongs to its own caller
        if generation != own {
            return result.map(|_| None);
        }
        result
    }

    fn is_latest(&self, generation: u64) -> bool {
        self.inner.load_generation.load(Ordering::SeqCst) == generation
    }

    async fn run_load(&self, next: Location, sync: bool, generation: u64) -> Result<Option<Redirect>, RouterError> {
        let store = &self.inner.store;
        let (previous, redirect_hop) = store.read(|s| (s.resolved_location.clone(), s.redirect.is_some()));
        let change = LocationChange::new(previous.as_ref(), &next);

        self.cancel_pending();
        let matches: Vec<Arc<RouteMatch>> = self.match_routes(&next).into_iter().map(Arc::new).collect();
        let ids: HashSet<String> = matches.iter().map(|m| m.id.clone()).collect();

        store.update(|s| {
            s.status = RouterStatus::Pending;
            s.is_loading = true;
            s.location = next.clone();
            s.redirect = None;
            s.set_pool(Pool::Pending, matches.iter().cloned());
            s.retain(Pool::Cached, |m| !ids.contains(&m.id));
        });

        if !redirect_hop {
            self.emit(RouterEvent::BeforeNavigate(change.clone()));
        }
        self.emit(RouterEvent::BeforeLoad(change.clone()));
        debug!("Loading {} ({} matches)", next.href, matches.len());

        let run = Arc::new(LoadRun::new(self.clone(), next.clone(), &matches, false, sync));
        let outcome = run.run().await;

        if !self.is_latest(generation) {
            debug!("Load of {} superseded", next.href);
            return Ok(None);
        }

        let redirect = match outcome {
            Err(RouteError::Redirect(redirect)) => Some(*redirect),
            _ => None,
        };
        if redirect.is_none() {
            self.commit_matches(&change);
        }

        let status_code = match &redirect {
            Some(redirect) => redirect.status_code,
            None => self.settled_status_code(),
        };
        store.update(|s| {
            if redirect.is_some() {
                s.clear_pending();
            } else {
                s.resolved_location = Some(next.clone());
            }
            s.status = RouterStatus::Idle;
            s.is_loading = false;
            s.status_code = status_code;
            s.redirect = redirect.clone();
        });

        {
            let mut latest_load = self.inner.latest_load.lock();
            if latest_load.as_ref().is_some_and(|(g, _)| *g == generation) {
                *latest_load = None;
            }
        }

        if redirect.is_none() {
            info!("Resolved {} with status {}", next.href, status_code);
            self.emit(RouterEvent::Resolved(change));
        }
        Ok(redirect)
    }

    /// Abort matches of an abandoned navigation that are not on screen
    fn cancel_pending(&self) {
        self.inner.store.read(|s| {
            for m in s.view(Pool::Pending) {
                if !s.contains(Pool::Active, &m.id) {
                    m.abort.cancel();
                }
            }
        });
    }

    fn has_not_found_match(&self) -> bool {
        self.inner.store.read(|s| {
            s.view(Pool::Active)
                .iter()
                .any(|m| m.status == MatchStatus::NotFound || m.global_not_found)
        })
    }

    fn settled_status_code(&self) -> u16 {
        if self.has_not_found_match() {
            return 404;
        }
        let errored = self
            .inner
            .store
            .read(|s| s.view(Pool::Active).iter().any(|m| m.status == MatchStatus::Error));
        if errored {
            500
        } else {
            200
        }
    }

    /// Promote pending matches to active and cache the ones left behind
    fn commit_matches(&self, change: &LocationChange) {
        let (exiting, entering, staying) = self.inner.store.update(|s| {
            let previous = s.view(Pool::Active);
            let next = s.view(Pool::Pending);
            let is_next = |id: &str| next.iter().any(|m| m.id == id);
            let was_active = |id: &str| previous.iter().any(|m| m.id == id);

            let exiting: Vec<_> = previous.iter().filter(|m| !is_next(m.id.as_str())).cloned().collect();
            let entering: Vec<_> = next.iter().filter(|m| !was_active(m.id.as_str())).cloned().collect();
            let staying: Vec<_> = next.iter().filter(|m| was_active(m.id.as_str())).cloned().collect();

            s.set_pool(Pool::Active, next.iter().cloned());
            s.clear_pending();
            s.loaded_at = Some(Utc::now());
            for m in exiting.iter().filter(|m| m.status != MatchStatus::Error) {
                s.insert(Pool::Cached, Arc::clone(m));
            }
            (exiting, entering, staying)
        });

        self.clear_expired_cache();

        let tree = &self.inner.tree;
        let options = |m: &RouteMatch| tree.by_id(&m.route_id).map(|id| &tree.node(id).options);
        for m in exiting.iter().map(|m| &**m) {
            if let Some(hook) = options(m).and_then(|o| o.on_leave.as_ref()) {
                hook(m);
            }
        }
        for m in entering.iter().map(|m| &**m) {
            if let Some(hook) = options(m).and_then(|o| o.on_enter.as_ref()) {
                hook(m);
            }
        }
        for m in staying.iter().map(|m| &**m) {
            if let Some(hook) = options(m).and_then(|o| o.on_stay.as_ref()) {
                hook(m);
            }
        }

        self.emit(RouterEvent::Load(change.clone()));
    }

    // ========================================================================
    // Preload
    // ========================================================================

    /// Run the load pipeline for a location without navigating to it
    ///
    /// Results land in the cached pool. Matches already active or pending
    /// are left to the navigation that owns them. Returns the preloaded
    /// chain; redirects are followed, other failures stay on the matches.
    pub async fn preload_route(&self, options: &BuildLocationOptions) -> Result<Vec<Arc<RouteMatch>>, RouterError> {
        let mut next = self.build_location(options)?;
        let mut hops = 0;

        loop {
            let matches: Vec<Arc<RouteMatch>> = self
                .match_routes_with(
                    &next,
                    MatchRoutesOptions {
                        preload: true,
                        ..Default::default()
                    },
                )
                .into_iter()
                .map(Arc::new)
                .collect();

            let skip: HashSet<String> = self.inner.store.update(|s| {
                let skip: HashSet<String> = matches
                    .iter()
                    .filter(|m| s.contains(Pool::Active, &m.id) || s.contains(Pool::Pending, &m.id))
                    .map(|m| m.id.clone())
                    .collect();
                for m in matches.iter().filter(|m| !skip.contains(&m.id)) {
                    s.insert(Pool::Cached, Arc::clone(m));
                }
                skip
            });

            debug!("Preloading {} ({} already loaded)", next.href, skip.len());
            let run = Arc::new(LoadRun::new(self.clone(), next.clone(), &matches, true, false).with_skip(skip));

            match run.run().await {
                Err(RouteError::Redirect(redirect)) => {
                    if redirect.reload_document {
                        return Ok(Vec::new());
                    }
                    hops += 1;
                    if hops > self.inner.config.max_redirects {
                        return Err(RouterError::TooManyRedirects(self.inner.config.max_redirects));
                    }
                    debug!("Preload of {} redirected", next.href);
                    next = self.build_location(&redirect.location)?;
                }
                _ => {
                    return Ok(matches
                        .iter()
                        .filter_map(|m| self.get_match(&m.id))
                        .collect());
                }
            }
        }
    }

    // ========================================================================
    // Cache
    // ========================================================================

    /// Mark matching records stale and reload
    ///
    /// Errored matches go back to pending so their hooks run again.
    pub async fn invalidate<F>(&self, filter: F, sync: bool) -> Result<(), RouterError>
    where
        F: Fn(&RouteMatch) -> bool,
    {
        let invalidate = |m: &RouteMatch| {
            filter(m).then(|| {
                let errored = m.status == MatchStatus::Error;
                RouteMatch {
                    invalid: true,
                    status: if errored { MatchStatus::Pending } else { m.status },
                    error: if errored { None } else { m.error.clone() },
                    ..m.clone()
                }
            })
        };

        self.inner.store.update(|s| {
            for pool in [Pool::Active, Pool::Pending, Pool::Cached] {
                s.map_pool(pool, &invalidate);
            }
        });
        debug!("Invalidated matches, reloading");
        self.load_with(sync).await
    }

    /// Drop cached matches for which `filter` returns true
    pub fn clear_cache<F>(&self, filter: F)
    where
        F: Fn(&RouteMatch) -> bool,
    {
        self.inner.store.update(|s| s.retain(Pool::Cached, |m| !filter(m)));
    }

    /// Drop cached matches past their gc time, errored, or without a loader
    pub fn clear_expired_cache(&self) {
        let tree = &self.inner.tree;
        let config = &self.inner.config;

        let removed = self.inner.store.update(|s| {
            let before = s.view(Pool::Cached).len();
            s.retain(Pool::Cached, |m| {
                let Some(node) = tree.by_id(&m.route_id).map(|id| tree.node(id)) else {
                    return false;
                };
                if node.options.loader.is_none() || m.status == MatchStatus::Error {
                    return false;
                }
                let gc_time = if m.preload {
                    node.options.preload_gc_time.unwrap_or(config.default_preload_gc_time)
                } else {
                    node.options.gc_time.unwrap_or(config.default_gc_time)
                };
                m.age() < gc_time
            });
            before - s.view(Pool::Cached).len()
        });

        if removed > 0 {
            debug!("Evicted {} cached matches", removed);
        }
    }

    // ========================================================================
    // Mounting
    // ========================================================================

    /// Spawn the task keeping the router in sync with history
    ///
    /// Back/forward (`Pop`) entries are loaded, and redirects raised by
    /// background revalidations are followed. Only the first call receives
    /// deferred redirects.
    pub fn mount(&self) -> JoinHandle<()> {
        let router = self.clone();
        let mut history_rx = self.inner.history.subscribe();
        let mut redirect_rx = self.inner.redirect_rx.lock().take();

        tokio::spawn(async move {
            loop {
                let deferred = async {
                    match redirect_rx.as_mut() {
                        Some(rx) => rx.recv().await,
                        None => std::future::pending().await,
                    }
                };

                tokio::select! {
                    event = history_rx.recv() => match event {
                        Ok(event) if event.action == HistoryAction::Pop => {
                            if let Err(err) = router.load().await {
                                warn!("Load after history pop failed: {}", err);
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Missed {} history events, reloading", skipped);
                            if let Err(err) = router.load().await {
                                warn!("Reload after missed events failed: {}", err);
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    Some(redirect) = deferred => {
                        let result = match router.follow_redirect(&redirect).await {
                            Ok(true) => router.load().await,
                            Ok(false) => Ok(()),
                            Err(err) => Err(err),
                        };
                        if let Err(err) = result {
                            warn!("Following background redirect failed: {}", err);
                        }
                    }
                }
            }
            debug!("History closed, router unmounted");
        })
    }

    // ========================================================================
    // Internal
    // ========================================================================

    /// Parse the current history entry and make it the latest location
    pub(crate) async fn read_history_location(&self) -> Location {
        let entry = self.inner.history.location().await;
        let next = {
            let latest = self.inner.latest_location.read();
            parse_location(
                &entry,
                Some(&latest),
                &self.inner.codec,
                &self.inner.config.basepath,
                &self.inner.temp_key,
            )
        };
        *self.inner.latest_location.write() = next.clone();
        next
    }

    /// Fill in a redirect's href from its location
    pub(crate) fn resolve_redirect(&self, redirect: &mut Redirect) {
        if redirect.href.is_some() {
            return;
        }
        match self.build_location(&redirect.location) {
            Ok(location) => redirect.href = Some(location.public_href),
            Err(err) => warn!("Could not resolve redirect target: {}", err),
        }
    }

    /// Hand a redirect raised outside any awaited load to the mounted task
    pub(crate) fn defer_redirect(&self, redirect: Redirect) {
        debug!("Deferring background redirect to {:?}", redirect.href);
        if self.inner.redirects.send(redirect).is_err() {
            warn!("Dropped background redirect: router channel closed");
        }
    }

    pub(crate) fn emit(&self, event: RouterEvent) {
        debug!("Router event: {}", event.name());
        // No subscribers is not an error.
        let _ = self.inner.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use trailhead_history::MemoryHistory;

    async fn router(href: &str) -> Router {
        let routes = Route::root().with_children([
            Route::new("/"),
            Route::new("posts").with_child(Route::new("$postId")),
        ]);
        let history = MemoryHistory::new(vec![href.to_string()]);
        Router::new(RouterOptions::new(routes, history)).await.unwrap()
    }

    #[tokio::test]
    async fn test_new_reads_history_location() {
        let router = router("/posts/1?page=2").await;
        assert_eq!(router.latest_location().pathname, "/posts/1");
        assert_eq!(router.state().location.search_str, "?page=2");
        assert!(router.state().resolved_location.is_none());
    }

    #[tokio::test]
    async fn test_same_location_is_not_pushed_twice() {
        let router = router("/posts").await;
        router.load().await.unwrap();
        router.navigate(NavigateOptions::to("/posts")).await.unwrap();
        router.navigate(NavigateOptions::to("/posts/2")).await.unwrap();

        let entry = router.history().location().await;
        assert_eq!(entry.pathname, "/posts/2");
        assert_eq!(entry.state.get("__index"), Some(&Value::from(1)));
        assert_eq!(router.state().matches.len(), 3);
    }

    #[tokio::test]
    async fn test_match_route_partial_params() {
        let router = router("/posts/7").await;
        router.load().await.unwrap();

        let found = router
            .match_route(
                &BuildLocationOptions::new().with_to("/posts/$postId"),
                MatchRouteOptions::default(),
            )
            .unwrap();
        assert_eq!(found.and_then(|p| p.get("postId").cloned()), Some(Value::from("7")));

        let mut expected = Params::new();
        expected.insert("postId".into(), Value::from("8"));
        let missing = router
            .match_route(
                &BuildLocationOptions::new()
                    .with_to("/posts/$postId")
                    .with_params(expected),
                MatchRouteOptions::default(),
            )
            .unwrap();
        assert!(missing.is_none());
    }
}
