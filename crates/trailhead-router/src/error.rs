// File: src/error.rs
// Purpose: Error types for tree construction, per-match failures and router entry points

use crate::builder::BuildLocationOptions;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Errors raised while compiling a route tree
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("duplicate routes found with id: {0}")]
    DuplicateRouteId(String),

    #[error("malformed route path `{path}`: {reason}")]
    MalformedPattern { path: String, reason: String },
}

/// A failure scoped to a single route match.
///
/// Cloned freely: the same error is stored on the match, handed to
/// `on_error` and observed by every caller awaiting the in-flight load.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RouteError {
    #[error("invalid path params for route `{route_id}`: {message}")]
    ParamParse { route_id: String, message: String },

    #[error("invalid search params for route `{route_id}`: {message}")]
    SearchParams { route_id: String, message: String },

    #[error("invalid history state for route `{route_id}`: {message}")]
    StateValidation { route_id: String, message: String },

    #[error("not found")]
    NotFound(NotFound),

    #[error("redirect to {}", .0.describe())]
    Redirect(Box<Redirect>),

    #[error("{0}")]
    User(Arc<anyhow::Error>),

    #[error("aborted")]
    Aborted,
}

impl RouteError {
    /// Wrap an arbitrary message as a user error
    pub fn msg<M>(message: M) -> Self
    where
        M: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        RouteError::User(Arc::new(anyhow::Error::msg(message)))
    }

    pub fn not_found() -> Self {
        RouteError::NotFound(NotFound::new())
    }

    pub fn redirect(redirect: Redirect) -> Self {
        RouteError::Redirect(Box::new(redirect))
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self, RouteError::Redirect(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RouteError::NotFound(_))
    }

    pub fn as_redirect(&self) -> Option<&Redirect> {
        match self {
            RouteError::Redirect(redirect) => Some(redirect),
            _ => None,
        }
    }

    pub fn as_not_found(&self) -> Option<&NotFound> {
        match self {
            RouteError::NotFound(not_found) => Some(not_found),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for RouteError {
    fn from(err: anyhow::Error) -> Self {
        RouteError::User(Arc::new(err))
    }
}

impl From<anyhow::Error> for RouterError {
    fn from(err: anyhow::Error) -> Self {
        RouterError::History(Arc::new(err))
    }
}

impl From<Redirect> for RouteError {
    fn from(redirect: Redirect) -> Self {
        RouteError::redirect(redirect)
    }
}

impl From<NotFound> for RouteError {
    fn from(not_found: NotFound) -> Self {
        RouteError::NotFound(not_found)
    }
}

/// Signal that a route (or an explicit target route) has nothing to show
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotFound {
    /// Route that should render the not-found state; defaults to the throwing route
    pub route_id: Option<String>,
    /// Payload for the rendering layer
    pub data: Option<Value>,
    /// Raised by the matcher because no route matched the pathname
    #[serde(default)]
    pub global: bool,
    #[serde(skip)]
    pub(crate) from_before_load: bool,
}

impl NotFound {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_route(mut self, route_id: impl Into<String>) -> Self {
        self.route_id = Some(route_id.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Instruction to abandon the current navigation in favor of another one
#[derive(Debug, Clone)]
pub struct Redirect {
    /// Where to go, resolved through the location builder
    pub location: BuildLocationOptions,
    /// Resolved (or external) href, filled in once the redirect is handled
    pub href: Option<String>,
    pub status_code: u16,
    /// Leave the router entirely and let the host load `href`
    pub reload_document: bool,
    pub(crate) handled: bool,
}

impl Redirect {
    /// Redirect to a route path
    pub fn to(path: impl Into<String>) -> Self {
        Self::with_location(BuildLocationOptions::new().with_to(path))
    }

    /// Redirect described by full location options
    pub fn with_location(location: BuildLocationOptions) -> Self {
        Self {
            location,
            href: None,
            status_code: 307,
            reload_document: false,
            handled: false,
        }
    }

    /// Redirect to an external href, bypassing route resolution
    pub fn external(href: impl Into<String>) -> Self {
        Self {
            location: BuildLocationOptions::new(),
            href: Some(href.into()),
            status_code: 307,
            reload_document: true,
            handled: false,
        }
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    pub fn with_reload_document(mut self) -> Self {
        self.reload_document = true;
        self
    }

    fn describe(&self) -> String {
        self.href
            .clone()
            .or_else(|| self.location.to.clone())
            .unwrap_or_else(|| ".".to_string())
    }
}

/// Errors surfaced by router entry points
///
/// `Clone` so every caller awaiting a shared load observes the same outcome.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RouterError {
    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error("history backend failed: {0}")]
    History(Arc<anyhow::Error>),

    #[error("redirect limit of {0} exceeded")]
    TooManyRedirects(usize),

    #[error("could not find match for from: {0}")]
    InvalidFrom(String),

    #[error(transparent)]
    Route(#[from] RouteError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_error_display() {
        let err = RouteError::ParamParse {
            route_id: "/posts/$id".to_string(),
            message: "not a number".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid path params for route `/posts/$id`: not a number"
        );

        let err = RouteError::redirect(Redirect::to("/login"));
        assert_eq!(err.to_string(), "redirect to /login");
        assert!(err.is_redirect());
    }

    #[test]
    fn test_anyhow_conversion_is_user_error() {
        let err: RouteError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, RouteError::User(_)));
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_not_found_builder() {
        let not_found = NotFound::new()
            .for_route("/posts")
            .with_data(serde_json::json!({"reason": "gone"}));
        assert_eq!(not_found.route_id.as_deref(), Some("/posts"));
        assert!(RouteError::from(not_found).is_not_found());
    }
}
