// File: src/events.rs
// Purpose: Router lifecycle events broadcast to subscribers

use crate::location::Location;

/// How a load's target differs from the previously resolved location
#[derive(Debug, Clone, PartialEq)]
pub struct LocationChange {
    pub from_location: Option<Location>,
    pub to_location: Location,
    pub pathname_changed: bool,
    pub href_changed: bool,
    pub hash_changed: bool,
}

impl LocationChange {
    pub fn new(from_location: Option<&Location>, to_location: &Location) -> Self {
        let (pathname_changed, href_changed, hash_changed) = match from_location {
            Some(from) => (
                from.pathname != to_location.pathname,
                from.href != to_location.href,
                from.hash != to_location.hash,
            ),
            None => (true, true, true),
        };

        Self {
            from_location: from_location.cloned(),
            to_location: to_location.clone(),
            pathname_changed,
            href_changed,
            hash_changed,
        }
    }
}

/// Emitted on the channel returned by `Router::subscribe`
#[derive(Debug, Clone, PartialEq)]
pub enum RouterEvent {
    /// A load for a new location starts (not emitted for redirect hops)
    BeforeNavigate(LocationChange),
    /// Matches were computed and loading begins
    BeforeLoad(LocationChange),
    /// Pending matches were committed
    Load(LocationChange),
    /// The load settled and the location is resolved
    Resolved(LocationChange),
    /// A navigation asked the host to load `href` as a new document
    ReloadDocument { href: String, replace: bool },
}

impl RouterEvent {
    /// Short name, for logs
    pub fn name(&self) -> &'static str {
        match self {
            RouterEvent::BeforeNavigate(_) => "before_navigate",
            RouterEvent::BeforeLoad(_) => "before_load",
            RouterEvent::Load(_) => "load",
            RouterEvent::Resolved(_) => "resolved",
            RouterEvent::ReloadDocument { .. } => "reload_document",
        }
    }

    pub fn location_change(&self) -> Option<&LocationChange> {
        match self {
            RouterEvent::BeforeNavigate(change)
            | RouterEvent::BeforeLoad(change)
            | RouterEvent::Load(change)
            | RouterEvent::Resolved(change) => Some(change),
            RouterEvent::ReloadDocument { .. } => None,
        }
    }
}
