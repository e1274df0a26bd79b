//! Load pipeline
//!
//! One [`LoadRun`] drives a chain of matches through their hooks:
//! `before_load` serially from the root down, then every loader in
//! parallel. Work is deduplicated per match id through the router's
//! in-flight registry: a second load reaching a match whose hook is already
//! running waits for that execution instead of starting another one.

use crate::error::RouteError;
use crate::matching::merge_context;
use crate::route::{BeforeLoadContext, LoaderContext, NodeId, ParentLoader, RouteNode, ShouldReload};
use crate::route_match::{FetchPhase, MatchCause, MatchStatus, RouteMatch};
use crate::router::Router;
use crate::store::Pool;
use crate::location::Location;
use crate::Context;
use chrono::Utc;
use futures::channel::oneshot;
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Resolves once the execution it was taken from has finished
pub(crate) type Barrier = Shared<BoxFuture<'static, ()>>;

// ============================================================================
// In-flight registry
// ============================================================================

/// Hook executions currently running for one match id
#[derive(Default)]
pub(crate) struct InFlight {
    before_load: Option<Barrier>,
    loader: Option<Barrier>,
}

impl InFlight {
    fn slot(&mut self, stage: Stage) -> &mut Option<Barrier> {
        match stage {
            Stage::BeforeLoad => &mut self.before_load,
            Stage::Loader => &mut self.loader,
        }
    }

    fn is_empty(&self) -> bool {
        self.before_load.is_none() && self.loader.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    BeforeLoad,
    Loader,
}

/// Registration of a running hook
///
/// Dropping the guard unregisters it and releases everyone waiting on its
/// barrier, whether the hook finished or its future was dropped.
pub(crate) struct InFlightGuard {
    router: Router,
    id: String,
    stage: Stage,
    barrier: Barrier,
    _done: oneshot::Sender<()>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut registry = self.router.inner.in_flight.lock();
        if let Some(entry) = registry.get_mut(&self.id) {
            let slot = entry.slot(self.stage);
            if slot.as_ref().is_some_and(|barrier| barrier.ptr_eq(&self.barrier)) {
                *slot = None;
            }
            if entry.is_empty() {
                registry.remove(&self.id);
            }
        }
    }
}

fn barrier() -> (oneshot::Sender<()>, Barrier) {
    let (tx, rx) = oneshot::channel::<()>();
    (tx, rx.map(|_| ()).boxed().shared())
}

impl Router {
    pub(crate) fn register_in_flight(&self, id: &str, stage: Stage) -> InFlightGuard {
        let (done, barrier) = barrier();
        *self
            .inner
            .in_flight
            .lock()
            .entry(id.to_string())
            .or_default()
            .slot(stage) = Some(barrier.clone());

        InFlightGuard {
            router: self.clone(),
            id: id.to_string(),
            stage,
            barrier,
            _done: done,
        }
    }

    pub(crate) fn in_flight(&self, id: &str, stage: Stage) -> Option<Barrier> {
        self.inner
            .in_flight
            .lock()
            .get_mut(id)
            .and_then(|entry| entry.slot(stage).clone())
    }
}

// ============================================================================
// Load run
// ============================================================================

/// State of one pass over a chain of matches
pub(crate) struct LoadRun {
    router: Router,
    location: Location,
    ids: Vec<String>,
    nodes: Vec<NodeId>,
    preload: bool,
    /// Revalidate stale matches before returning instead of in the background
    sync: bool,
    /// Ids a preload must leave to the navigation that owns them
    skip: HashSet<String>,
    first_bad: Mutex<Option<usize>>,
}

impl LoadRun {
    pub fn new(router: Router, location: Location, matches: &[Arc<RouteMatch>], preload: bool, sync: bool) -> Self {
        let tree = &router.inner.tree;
        let nodes = matches
            .iter()
            .map(|m| tree.by_id(&m.route_id).unwrap_or_else(|| tree.root()))
            .collect();

        Self {
            ids: matches.iter().map(|m| m.id.clone()).collect(),
            nodes,
            router,
            location,
            preload,
            sync,
            skip: HashSet::new(),
            first_bad: Mutex::new(None),
        }
    }

    pub fn with_skip(mut self, skip: HashSet<String>) -> Self {
        self.skip = skip;
        self
    }

    /// Run every hook of the chain
    ///
    /// Resolves to a redirect when one escaped a hook, to the first
    /// not-found of a navigation, and to `Ok` otherwise; plain errors stay
    /// on their matches.
    pub async fn run(self: Arc<Self>) -> Result<(), RouteError> {
        match self.run_stages().await {
            Ok(()) => Ok(()),
            Err(err @ RouteError::Redirect(_)) => Err(err),
            Err(err @ RouteError::NotFound(_)) if !self.preload => Err(err),
            Err(err) => {
                debug!("load of {} settled with {}", self.location.href, err);
                Ok(())
            }
        }
    }

    async fn run_stages(self: &Arc<Self>) -> Result<(), RouteError> {
        for index in 0..self.ids.len() {
            if self.first_bad().is_some_and(|bad| index > bad) {
                break;
            }
            self.handle_before_load(index).await?;
        }

        let max = self.first_bad().unwrap_or(self.ids.len());
        let mut parent = ParentLoader::default();
        let mut loads = Vec::with_capacity(max);

        for index in 0..max {
            let (done, settled) = barrier();
            loads.push(self.load_route_match(index, parent.clone(), done));

            let router = self.router.clone();
            let id = self.ids[index].clone();
            parent = ParentLoader::new(
                settled
                    .then(move |_| async move { router.get_match(&id).and_then(|m| m.loader_data.clone()) })
                    .boxed()
                    .shared(),
            );
        }

        let mut first_not_found = None;
        for result in join_all(loads).await {
            match result {
                Err(err @ RouteError::Redirect(_)) => return Err(err),
                Err(err @ RouteError::NotFound(_)) if first_not_found.is_none() => {
                    first_not_found = Some(err);
                }
                _ => {}
            }
        }

        match first_not_found {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn first_bad(&self) -> Option<usize> {
        *self.first_bad.lock()
    }

    fn node(&self, index: usize) -> &RouteNode {
        self.router.inner.tree.node(self.nodes[index])
    }

    fn get(&self, index: usize) -> Option<Arc<RouteMatch>> {
        self.router.get_match(&self.ids[index])
    }

    fn update<F>(&self, index: usize, f: F)
    where
        F: FnOnce(&RouteMatch) -> RouteMatch,
    {
        self.router.inner.store.update_match(&self.ids[index], f);
    }

    /// Preloading a match that is not already on screen
    fn resolve_preload(&self, index: usize) -> bool {
        self.preload
            && !self
                .router
                .inner
                .store
                .read(|s| s.contains(Pool::Active, &self.ids[index]))
    }

    /// Router context plus route and `before_load` contexts down to `index`
    fn build_context(&self, index: usize, include_current: bool) -> Context {
        let end = if include_current { index + 1 } else { index };
        let ids = &self.ids[..end.min(self.ids.len())];

        self.router.inner.store.read(|s| {
            let mut context = self.router.inner.context.clone();
            for m in ids.iter().filter_map(|id| s.get(id)) {
                context.extend(m.route_context.iter().map(|(k, v)| (k.clone(), v.clone())));
                context.extend(m.before_load_context.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            context
        })
    }

    fn cause(&self, index: usize, m: &RouteMatch) -> (MatchCause, bool) {
        let preload = self.resolve_preload(index);
        (if preload { MatchCause::Preload } else { m.cause }, preload)
    }

    fn loader_context(&self, index: usize, m: &RouteMatch, parent: ParentLoader) -> LoaderContext {
        let (cause, preload) = self.cause(index, m);
        LoaderContext {
            route_id: m.route_id.clone(),
            match_id: m.id.clone(),
            params: Arc::clone(&m.params),
            deps: m.loader_deps.clone(),
            context: self.build_context(index, true),
            location: self.location.clone(),
            cause,
            preload,
            signal: m.abort.clone(),
            parent,
            router: self.router.clone(),
        }
    }

    fn mark(&self, index: usize, status: MatchStatus, error: RouteError) {
        let context = self.build_context(index, true);
        self.update(index, move |m| RouteMatch {
            status,
            context,
            fetch_phase: FetchPhase::Idle,
            error: Some(error),
            ..m.clone()
        });
    }

    // ========================================================================
    // Redirects, not-found and errors
    // ========================================================================

    /// Turn a redirect or not-found into the run's outcome
    ///
    /// Returns `Ok` for any other error so the caller can record it.
    fn handle_redirect_and_not_found(&self, index: Option<usize>, err: RouteError) -> Result<(), RouteError> {
        match err {
            RouteError::Redirect(mut redirect) => {
                if redirect.handled && !redirect.reload_document {
                    return Err(RouteError::Redirect(redirect));
                }
                if let Some(index) = index {
                    self.mark(index, MatchStatus::Redirected, RouteError::Redirect(redirect.clone()));
                }
                redirect.handled = true;
                self.router.resolve_redirect(&mut redirect);
                debug!(
                    "redirect from {} to {}",
                    self.location.href,
                    redirect.href.as_deref().unwrap_or_default()
                );
                Err(RouteError::Redirect(redirect))
            }
            RouteError::NotFound(mut not_found) => {
                if let Some(index) = index {
                    if not_found.route_id.is_none() {
                        not_found.route_id = Some(self.node(index).id.clone());
                    }
                    self.mark(index, MatchStatus::NotFound, RouteError::NotFound(not_found.clone()));
                }
                self.handle_not_found(&not_found);
                Err(RouteError::NotFound(not_found))
            }
            _ => Ok(()),
        }
    }

    /// Mark the nearest not-found boundary at or above the target route
    ///
    /// A not-found raised by `before_load` cannot be rendered by the route
    /// that raised it, so the walk starts at its parent.
    fn handle_not_found(&self, not_found: &crate::error::NotFound) {
        let tree = &self.router.inner.tree;
        let mut start = not_found
            .route_id
            .as_deref()
            .and_then(|id| tree.by_id(id))
            .unwrap_or_else(|| tree.root());
        if not_found.from_before_load {
            start = tree.node(start).parent.unwrap_or(start);
        }

        let boundary = tree
            .ancestors(start)
            .find(|&id| tree.node(id).options.not_found_boundary)
            .unwrap_or_else(|| tree.root());

        let index = self
            .nodes
            .iter()
            .position(|&id| id == boundary)
            .unwrap_or(0);
        debug!("not-found in {} handled by {}", self.location.pathname, tree.node(boundary).id);

        let error = RouteError::NotFound(not_found.clone());
        self.update(index, move |m| RouteMatch {
            status: MatchStatus::NotFound,
            fetch_phase: FetchPhase::Idle,
            error: Some(error),
            ..m.clone()
        });
    }

    /// Give the route's `on_error` hook a chance to replace `err`
    fn run_on_error(&self, index: usize, err: RouteError) -> Result<RouteError, RouteError> {
        let replaced = self
            .node(index)
            .options
            .on_error
            .as_ref()
            .and_then(|on_error| on_error(&err));

        match replaced {
            Some(replaced) => {
                self.handle_redirect_and_not_found(Some(index), replaced.clone())?;
                Ok(replaced)
            }
            None => Ok(err),
        }
    }

    /// A failure before loaders start: the match and its descendants stop here
    fn handle_serial_error(&self, index: usize, mut err: RouteError, from_before_load: bool) -> Result<(), RouteError> {
        if let (true, RouteError::NotFound(not_found)) = (from_before_load, &mut err) {
            not_found.from_before_load = true;
        }

        self.first_bad.lock().get_or_insert(index);
        self.handle_redirect_and_not_found(Some(index), err.clone())?;
        let err = self.run_on_error(index, err)?;

        warn!("route {} failed before loading: {}", self.node(index).id, err);
        self.update(index, move |m| RouteMatch {
            error: Some(err),
            status: MatchStatus::Error,
            fetch_phase: FetchPhase::Idle,
            updated_at: Utc::now(),
            abort: CancellationToken::new(),
            ..m.clone()
        });
        Ok(())
    }

    // ========================================================================
    // before_load
    // ========================================================================

    async fn handle_before_load(&self, index: usize) -> Result<(), RouteError> {
        if self.skip.contains(&self.ids[index]) {
            return Ok(());
        }

        // Let a running before_load for the same match finish first
        if let Some(running) = self.router.in_flight(&self.ids[index], Stage::BeforeLoad) {
            running.await;
            if let Some(m) = self.get(index) {
                if m.preload && matches!(m.status, MatchStatus::Redirected | MatchStatus::NotFound) {
                    if let Some(err) = m.error.clone() {
                        self.handle_redirect_and_not_found(Some(index), err)?;
                    }
                }
            }
        }

        self.execute_before_load(index).await
    }

    async fn execute_before_load(&self, index: usize) -> Result<(), RouteError> {
        let Some(m) = self.get(index) else {
            return Ok(());
        };

        let invalid_input = m
            .params_error
            .clone()
            .or_else(|| m.search_error.clone())
            .or_else(|| m.state_error.clone());
        if let Some(err) = invalid_input {
            return self.handle_serial_error(index, err, false);
        }

        let abort = CancellationToken::new();
        let Some(before_load) = self.node(index).options.before_load.clone() else {
            self.update(index, |m| RouteMatch {
                fetch_count: m.fetch_count + 1,
                abort,
                fetch_phase: FetchPhase::Idle,
                ..m.clone()
            });
            return Ok(());
        };

        let _guard = self.router.register_in_flight(&m.id, Stage::BeforeLoad);
        self.update(index, |m| RouteMatch {
            fetch_phase: FetchPhase::BeforeLoad,
            fetch_count: m.fetch_count + 1,
            abort: abort.clone(),
            ..m.clone()
        });

        let (cause, preload) = self.cause(index, &m);
        let ctx = BeforeLoadContext {
            route_id: m.route_id.clone(),
            match_id: m.id.clone(),
            params: Arc::clone(&m.params),
            search: Arc::clone(&m.search),
            context: merge_context(&[&self.build_context(index, false), &m.route_context]),
            location: self.location.clone(),
            cause,
            preload,
            signal: abort,
            router: self.router.clone(),
        };

        match before_load(ctx).await {
            Ok(context) => {
                self.update(index, move |m| RouteMatch {
                    before_load_context: context.unwrap_or_else(|| m.before_load_context.clone()),
                    fetch_phase: FetchPhase::Idle,
                    ..m.clone()
                });
                Ok(())
            }
            Err(err) => self.handle_serial_error(index, err, true),
        }
    }

    // ========================================================================
    // Loaders
    // ========================================================================

    async fn load_route_match(
        self: &Arc<Self>,
        index: usize,
        parent: ParentLoader,
        done: oneshot::Sender<()>,
    ) -> Result<(), RouteError> {
        let _done = done;
        let id = &self.ids[index];
        if self.skip.contains(id) {
            return Ok(());
        }
        let Some(prev) = self.get(index) else {
            return Ok(());
        };
        let invalid_at_start = prev.invalid;
        let mut running_async = false;

        if self.should_skip_loader(&prev) {
            debug!("{} restored from snapshot, loader skipped", id);
        } else if let Some(running) = self.router.in_flight(id, Stage::Loader) {
            if prev.status == MatchStatus::Success && !self.sync && !prev.preload && !prev.invalid {
                // Already revalidating in the background
                return Ok(());
            }
            running.await;

            let Some(m) = self.get(index) else {
                return Ok(());
            };
            if let Some(err) = m.error.clone() {
                self.handle_redirect_and_not_found(Some(index), err)?;
            }
            // Invalidated while the other load ran: reload once more
            if m.status == MatchStatus::Pending || m.invalid {
                running_async = self.handle_loader(index, &m, m.preload, parent).await?;
            }
        } else {
            let loaded_by_preload = prev.preload;
            let next_preload = self.resolve_preload(index);
            if next_preload != prev.preload {
                self.update(index, |m| RouteMatch {
                    preload: next_preload,
                    ..m.clone()
                });
            }
            running_async = self.handle_loader(index, &prev, loaded_by_preload, parent).await?;
        }

        self.update(index, |m| RouteMatch {
            fetch_phase: if running_async { m.fetch_phase } else { FetchPhase::Idle },
            invalid: m.invalid && !invalid_at_start,
            dehydrated: false,
            ..m.clone()
        });
        Ok(())
    }

    /// Matches restored from a server snapshot keep their data on the first load
    fn should_skip_loader(&self, m: &RouteMatch) -> bool {
        !self.router.inner.is_server && m.dehydrated
    }

    /// Decide whether the loader runs, runs in the background or is skipped
    ///
    /// Returns `true` when a background revalidation was started.
    async fn handle_loader(
        self: &Arc<Self>,
        index: usize,
        prev: &RouteMatch,
        loaded_by_preload: bool,
        parent: ParentLoader,
    ) -> Result<bool, RouteError> {
        let guard = self.router.register_in_flight(&self.ids[index], Stage::Loader);
        let Some(m) = self.get(index) else {
            return Ok(false);
        };

        let node = self.node(index);
        let config = &self.router.inner.config;
        let preload = self.resolve_preload(index);

        let stale_age = if preload || loaded_by_preload {
            node.options
                .preload_stale_time
                .unwrap_or(config.default_preload_stale_time)
        } else {
            node.options.stale_time.unwrap_or(config.default_stale_time)
        };

        let should_reload = match &node.options.should_reload {
            None => None,
            Some(ShouldReload::Always(value)) => Some(*value),
            Some(ShouldReload::Dynamic(should_reload)) => {
                Some(should_reload(&self.loader_context(index, &m, parent.clone())))
            }
        };

        let revalidate = m.status == MatchStatus::Success
            && node.options.loader.is_some()
            && (m.invalid || should_reload.unwrap_or_else(|| prev.age() > stale_age));

        if preload && node.options.preload == Some(false) {
            return Ok(false);
        }

        if revalidate && !self.sync {
            debug!("revalidating {} in the background", m.id);
            let run = Arc::clone(self);
            tokio::spawn(async move {
                let _guard = guard;
                if let Err(RouteError::Redirect(redirect)) = run.run_loader(index, parent).await {
                    run.router.defer_redirect(*redirect);
                }
            });
            return Ok(true);
        }

        if m.status != MatchStatus::Success || revalidate {
            self.run_loader(index, parent).await?;
        }
        Ok(false)
    }

    async fn run_loader(&self, index: usize, parent: ParentLoader) -> Result<(), RouteError> {
        let Some(m) = self.get(index) else {
            return Ok(());
        };

        let Some(loader) = self.node(index).options.loader.clone() else {
            let context = self.build_context(index, true);
            self.update(index, move |m| RouteMatch {
                error: None,
                context,
                status: MatchStatus::Success,
                fetch_phase: FetchPhase::Idle,
                updated_at: Utc::now(),
                ..m.clone()
            });
            return Ok(());
        };

        self.update(index, |m| RouteMatch {
            fetch_phase: FetchPhase::Loader,
            ..m.clone()
        });

        let ctx = self.loader_context(index, &m, parent);
        let result = loader(ctx).await;
        let context = self.build_context(index, true);

        match result {
            Ok(data) => {
                self.update(index, move |m| RouteMatch {
                    loader_data: Some(data),
                    error: None,
                    context,
                    status: MatchStatus::Success,
                    fetch_phase: FetchPhase::Idle,
                    updated_at: Utc::now(),
                    ..m.clone()
                });
                Ok(())
            }
            Err(RouteError::Aborted) => {
                let cancelled = m.abort.is_cancelled();
                self.update(index, move |m| RouteMatch {
                    status: if !cancelled && m.status == MatchStatus::Pending {
                        MatchStatus::Success
                    } else {
                        m.status
                    },
                    context,
                    fetch_phase: FetchPhase::Idle,
                    ..m.clone()
                });
                Ok(())
            }
            Err(err) => {
                self.handle_redirect_and_not_found(Some(index), err.clone())?;
                let err = self.run_on_error(index, err)?;

                warn!("loader for {} failed: {}", m.route_id, err);
                self.update(index, move |m| RouteMatch {
                    error: Some(err),
                    context,
                    status: MatchStatus::Error,
                    fetch_phase: FetchPhase::Idle,
                    ..m.clone()
                });
                Ok(())
            }
        }
    }
}
