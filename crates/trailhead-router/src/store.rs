//! Match store
//!
//! One indexed map of match records tagged with their pool. Ordered pool
//! views are derived on demand, so moving a record between pools is a single
//! tag change applied under one write lock. Every mutation publishes a fresh
//! [`RouterState`] snapshot on a `watch` channel.

use crate::error::Redirect;
use crate::location::Location;
use crate::route_match::RouteMatch;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;

/// Which view a match record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pool {
    /// Committed matches of the resolved location
    Active,
    /// Target of the in-flight navigation
    Pending,
    /// Left behind by a navigation or loaded by a preload
    Cached,
}

/// Whether a load is in progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RouterStatus {
    #[default]
    Idle,
    Pending,
}

/// Read-only snapshot of the router
#[derive(Debug, Clone)]
pub struct RouterState {
    pub status: RouterStatus,
    pub is_loading: bool,
    /// Location being loaded (or last loaded)
    pub location: Location,
    /// Location whose matches are committed
    pub resolved_location: Option<Location>,
    pub matches: Vec<Arc<RouteMatch>>,
    /// `None` outside a navigation
    pub pending_matches: Option<Vec<Arc<RouteMatch>>>,
    pub cached_matches: Vec<Arc<RouteMatch>>,
    pub status_code: u16,
    /// Redirect the last load stopped at
    pub redirect: Option<Redirect>,
    pub loaded_at: Option<DateTime<Utc>>,
}

impl RouterState {
    /// Look a match up by id: cached, then pending, then active
    pub fn get_match(&self, id: &str) -> Option<&Arc<RouteMatch>> {
        self.cached_matches
            .iter()
            .chain(self.pending_matches.iter().flatten())
            .chain(self.matches.iter())
            .find(|m| m.id == id)
    }
}

// ============================================================================
// Inner state
// ============================================================================

pub(crate) struct StoreInner {
    records: IndexMap<(Pool, String), Arc<RouteMatch>>,
    has_pending: bool,
    pub status: RouterStatus,
    pub is_loading: bool,
    pub location: Location,
    pub resolved_location: Option<Location>,
    pub status_code: u16,
    pub redirect: Option<Redirect>,
    pub loaded_at: Option<DateTime<Utc>>,
}

impl StoreInner {
    fn new(location: Location) -> Self {
        Self {
            records: IndexMap::new(),
            has_pending: false,
            status: RouterStatus::Idle,
            is_loading: false,
            location,
            resolved_location: None,
            status_code: 200,
            redirect: None,
            loaded_at: None,
        }
    }

    /// Records of `pool` in insertion order
    pub fn view(&self, pool: Pool) -> Vec<Arc<RouteMatch>> {
        self.records
            .iter()
            .filter(|((p, _), _)| *p == pool)
            .map(|(_, m)| Arc::clone(m))
            .collect()
    }

    pub fn has_pending(&self) -> bool {
        self.has_pending
    }

    pub fn contains(&self, pool: Pool, id: &str) -> bool {
        self.records.contains_key(&(pool, id.to_string()))
    }

    /// Replace the whole content of `pool`
    pub fn set_pool<I>(&mut self, pool: Pool, matches: I)
    where
        I: IntoIterator<Item = Arc<RouteMatch>>,
    {
        self.records.retain(|(p, _), _| *p != pool);
        for m in matches {
            self.records.insert((pool, m.id.clone()), m);
        }
        if pool == Pool::Pending {
            self.has_pending = true;
        }
    }

    pub fn clear_pending(&mut self) {
        self.records.retain(|(p, _), _| *p != Pool::Pending);
        self.has_pending = false;
    }

    /// Append to `pool`; an existing record with the same id is replaced in place
    pub fn insert(&mut self, pool: Pool, m: Arc<RouteMatch>) {
        self.records.insert((pool, m.id.clone()), m);
    }

    /// Keep the records of `pool` for which `keep` returns true
    pub fn retain<F>(&mut self, pool: Pool, mut keep: F)
    where
        F: FnMut(&RouteMatch) -> bool,
    {
        self.records.retain(|(p, _), m| *p != pool || keep(&**m));
    }

    /// Apply `f` to every record of `pool`
    pub fn map_pool<F>(&mut self, pool: Pool, mut f: F)
    where
        F: FnMut(&RouteMatch) -> Option<RouteMatch>,
    {
        for ((p, _), m) in self.records.iter_mut() {
            if *p == pool {
                if let Some(next) = f(&**m) {
                    *m = Arc::new(next);
                }
            }
        }
    }

    /// Cached first, then pending, then active
    pub fn get(&self, id: &str) -> Option<&Arc<RouteMatch>> {
        [Pool::Cached, Pool::Pending, Pool::Active]
            .into_iter()
            .find_map(|pool| self.records.get(&(pool, id.to_string())))
    }

    /// Replace the record with `id` by `f(record)`
    ///
    /// Pending wins over active, active over cached, so a match staying
    /// across a navigation is updated in the view being loaded.
    pub fn update_match<F>(&mut self, id: &str, f: F) -> Option<Arc<RouteMatch>>
    where
        F: FnOnce(&RouteMatch) -> RouteMatch,
    {
        let key = [Pool::Pending, Pool::Active, Pool::Cached]
            .into_iter()
            .map(|pool| (pool, id.to_string()))
            .find(|key| self.records.contains_key(key))?;
        let slot = self.records.get_mut(&key)?;
        let next = Arc::new(f(&**slot));
        *slot = Arc::clone(&next);
        Some(next)
    }

    fn snapshot(&self) -> RouterState {
        RouterState {
            status: self.status,
            is_loading: self.is_loading,
            location: self.location.clone(),
            resolved_location: self.resolved_location.clone(),
            matches: self.view(Pool::Active),
            pending_matches: self.has_pending.then(|| self.view(Pool::Pending)),
            cached_matches: self.view(Pool::Cached),
            status_code: self.status_code,
            redirect: self.redirect.clone(),
            loaded_at: self.loaded_at,
        }
    }
}

// ============================================================================
// Store
// ============================================================================

pub(crate) struct MatchStore {
    inner: RwLock<StoreInner>,
    tx: watch::Sender<Arc<RouterState>>,
}

impl MatchStore {
    pub fn new(location: Location) -> Self {
        let inner = StoreInner::new(location);
        let (tx, _) = watch::channel(Arc::new(inner.snapshot()));
        Self {
            inner: RwLock::new(inner),
            tx,
        }
    }

    pub fn read<R>(&self, f: impl FnOnce(&StoreInner) -> R) -> R {
        f(&self.inner.read())
    }

    /// Mutate and publish one snapshot for the whole change
    pub fn update<R>(&self, f: impl FnOnce(&mut StoreInner) -> R) -> R {
        let mut inner = self.inner.write();
        let result = f(&mut inner);
        self.tx.send_replace(Arc::new(inner.snapshot()));
        result
    }

    pub fn state(&self) -> Arc<RouterState> {
        Arc::clone(&self.tx.borrow())
    }

    pub fn watch(&self) -> watch::Receiver<Arc<RouterState>> {
        self.tx.subscribe()
    }

    pub fn get_match(&self, id: &str) -> Option<Arc<RouteMatch>> {
        self.inner.read().get(id).cloned()
    }

    pub fn update_match<F>(&self, id: &str, f: F) -> Option<Arc<RouteMatch>>
    where
        F: FnOnce(&RouteMatch) -> RouteMatch,
    {
        let mut inner = self.inner.write();
        let updated = inner.update_match(id, f);
        if updated.is_some() {
            self.tx.send_replace(Arc::new(inner.snapshot()));
        }
        updated
    }
}
