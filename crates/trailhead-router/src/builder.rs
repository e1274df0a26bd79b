// File: src/builder.rs
// Purpose: Location builder, resolves navigation requests into Locations

use crate::config::RouterConfig;
use crate::error::RouterError;
use crate::location::Location;
use crate::matching::{get_matched_routes, raw_to_params, MatchedRoutes};
use crate::path::{
    interpolate_path, match_pathname, resolve_path, trim_path_right, InterpolateOptions,
    MatchOptions, ParseCache,
};
use crate::route::RouteTree;
use crate::route_match::RouteMatch;
use crate::search::{apply_search_middleware, filter_middleware, SearchCodec, SearchMiddleware};
use crate::sharing::replace_equal;
use crate::updater::{apply_or, Updater};
use crate::{Params, SearchMap};
use std::sync::Arc;
use trailhead_history::HistoryState;

// ============================================================================
// Options
// ============================================================================

/// A navigation target
///
/// Every input is optional. `params`, `search`, `hash` and `state` are
/// [`Updater`]s applied to the current value; leaving `search` out clears
/// the search, leaving `params` out keeps the current params.
#[derive(Debug, Clone, Default)]
pub struct BuildLocationOptions {
    /// Absolute (`/a`), relative (`./a`, `../a`, `.`) or external target
    pub to: Option<String>,
    /// Route path of the current match to resolve `to` against
    pub from: Option<String>,
    pub params: Option<Updater<Params>>,
    pub search: Option<Updater<SearchMap>>,
    pub hash: Option<Updater<String>>,
    pub state: Option<Updater<HistoryState>>,
    /// Show this location in the address bar instead of the real one
    pub mask: Option<Box<BuildLocationOptions>>,
    pub unmask_on_reload: Option<bool>,
    pub(crate) leave_params: bool,
    pub(crate) include_validate_search: bool,
}

impl BuildLocationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    pub fn with_params(mut self, params: impl Into<Updater<Params>>) -> Self {
        self.params = Some(params.into());
        self
    }

    pub fn with_search(mut self, search: impl Into<Updater<SearchMap>>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn with_hash(mut self, hash: impl Into<Updater<String>>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    pub fn with_state(mut self, state: impl Into<Updater<HistoryState>>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_mask(mut self, mask: BuildLocationOptions) -> Self {
        self.mask = Some(Box::new(mask));
        self
    }

    pub fn with_unmask_on_reload(mut self, unmask: bool) -> Self {
        self.unmask_on_reload = Some(unmask);
        self
    }

    /// Run each matched route's search validator over the built search
    pub fn with_validated_search(mut self) -> Self {
        self.include_validate_search = true;
        self
    }

    /// Keep the current search, hash and state
    pub fn preserving(self) -> Self {
        self.with_search(Updater::Preserve)
            .with_hash(Updater::Preserve)
            .with_state(Updater::Preserve)
    }
}

/// A configured mask: locations matching `from` are shown as `location`
///
/// `location.params` is applied to the params captured by `from`, so the
/// mask can rename them.
#[derive(Debug, Clone)]
pub struct RouteMask {
    pub from: String,
    pub location: BuildLocationOptions,
    pub unmask_on_reload: bool,
}

impl RouteMask {
    pub fn new(from: impl Into<String>, location: BuildLocationOptions) -> Self {
        Self {
            from: from.into(),
            location,
            unmask_on_reload: false,
        }
    }

    pub fn with_unmask_on_reload(mut self) -> Self {
        self.unmask_on_reload = true;
        self
    }
}

/// A request to move to a new location
#[derive(Debug, Clone, Default)]
pub struct NavigateOptions {
    pub location: BuildLocationOptions,
    /// Replace the current history entry instead of pushing
    pub replace: bool,
    /// Navigate to this href directly, bypassing the builder
    pub href: Option<String>,
    /// Hand the href to the host instead of loading in place
    pub reload_document: bool,
}

impl NavigateOptions {
    pub fn to(to: impl Into<String>) -> Self {
        Self {
            location: BuildLocationOptions::new().with_to(to),
            ..Default::default()
        }
    }

    pub fn href(href: impl Into<String>) -> Self {
        Self {
            href: Some(href.into()),
            ..Default::default()
        }
    }

    pub fn with_location(mut self, location: BuildLocationOptions) -> Self {
        self.location = location;
        self
    }

    pub fn with_replace(mut self, replace: bool) -> Self {
        self.replace = replace;
        self
    }

    pub fn with_reload_document(mut self) -> Self {
        self.reload_document = true;
        self
    }
}

impl From<BuildLocationOptions> for NavigateOptions {
    fn from(location: BuildLocationOptions) -> Self {
        Self {
            location,
            ..Default::default()
        }
    }
}

// ============================================================================
// Building
// ============================================================================

/// Router state a build reads
pub(crate) struct BuildEnv<'a> {
    pub tree: &'a RouteTree,
    pub config: &'a RouterConfig,
    pub parse_cache: &'a ParseCache,
    pub codec: &'a SearchCodec,
    pub route_masks: &'a [RouteMask],
    pub latest: &'a Location,
    /// Matches the navigation starts from
    pub from_matches: &'a [Arc<RouteMatch>],
    /// Search of the in-flight navigation, if any
    pub pending_search: Option<Arc<SearchMap>>,
}

/// An absolute URL with a scheme points outside the router
pub(crate) fn is_external(to: &str) -> bool {
    url::Url::parse(to).is_ok()
}

/// Build a location, its mask included
///
/// Each location is built twice: the first pass yields the pathname that
/// selects the destination routes, the second applies those routes'
/// param stringifiers and search middlewares.
pub(crate) fn build_location(
    env: &BuildEnv<'_>,
    opts: &BuildLocationOptions,
) -> Result<Location, RouterError> {
    if let Some(to) = opts.to.as_deref().filter(|to| is_external(to)) {
        return Ok(Location::external(to));
    }

    let next = build_pass(env, opts, None)?;

    let masked_dest = match opts.mask.as_deref() {
        Some(mask) => {
            let mut mask = mask.clone();
            if mask.from.is_none() {
                mask.from = opts.from.clone();
            }
            Some(mask)
        }
        None => find_route_mask(env, &next.pathname, opts),
    };
    let masked_next = masked_dest
        .as_ref()
        .map(|dest| build_pass(env, dest, None))
        .transpose()?;

    let matched = matched_routes(env, &next.pathname, opts.to.as_deref());
    let mut location = build_pass(env, opts, Some(&matched))?;

    if let (Some(dest), Some(masked_next)) = (masked_dest, masked_next) {
        let matched = matched_routes(env, &masked_next.pathname, dest.to.as_deref());
        location.masked_location = Some(Box::new(build_pass(env, &dest, Some(&matched))?));
    }

    Ok(location)
}

fn matched_routes(env: &BuildEnv<'_>, pathname: &str, to: Option<&str>) -> MatchedRoutes {
    get_matched_routes(env.tree, env.config, env.parse_cache, pathname, to)
}

/// First configured mask whose `from` matches `pathname`
fn find_route_mask(
    env: &BuildEnv<'_>,
    pathname: &str,
    opts: &BuildLocationOptions,
) -> Option<BuildLocationOptions> {
    env.route_masks.iter().find_map(|mask| {
        let raw = match_pathname(pathname, MatchOptions::new(&mask.from))?;
        let captured = raw_to_params(&raw);
        let params = match mask.location.params.as_ref() {
            Some(updater) => updater.apply(&captured),
            None => captured,
        };

        let mut dest = mask.location.clone();
        dest.params = Some(Updater::Literal(params));
        dest.from = opts.from.clone();
        dest.unmask_on_reload = Some(mask.unmask_on_reload);
        Some(dest)
    })
}

fn build_pass(
    env: &BuildEnv<'_>,
    dest: &BuildLocationOptions,
    matched: Option<&MatchedRoutes>,
) -> Result<Location, RouterError> {
    let from_match = match dest.from.as_deref() {
        Some(from) => Some(
            env.from_matches
                .iter()
                .find(|m| match_pathname(trim_path_right(&m.pathname), MatchOptions::new(from)).is_some())
                .ok_or_else(|| RouterError::InvalidFrom(from.to_string()))?,
        ),
        None => None,
    };
    let from_path = from_match
        .map(|m| m.pathname.as_str())
        .unwrap_or(env.latest.pathname.as_str());
    let from_search = env
        .pending_search
        .clone()
        .or_else(|| env.from_matches.last().map(|m| Arc::clone(&m.search)))
        .unwrap_or_else(|| Arc::clone(&env.latest.search));

    // Path
    let pathname = match dest.to.as_deref() {
        Some(to) => {
            let base = from_match
                .or(env.from_matches.last())
                .map(|m| m.full_path.as_str())
                .unwrap_or(env.latest.pathname.as_str());
            resolve_path(base, to, env.config.trailing_slash)
        }
        None => {
            let staying = matched.and_then(|matched| {
                let raw = raw_to_params(&matched.raw_params);
                matched.chain.iter().rev().map(|&id| env.tree.node(id)).find(|node| {
                    env.from_matches.iter().any(|m| m.route_id == node.id)
                        && interpolate_path(&node.full_path, &raw, InterpolateOptions::default()).path
                            == from_path
                })
            });
            let target = staying.map(|node| node.full_path.as_str()).unwrap_or(from_path);
            resolve_path(from_path, target, env.config.trailing_slash)
        }
    };

    // Params
    let previous_params: Params = env
        .from_matches
        .last()
        .map(|m| (*m.params).clone())
        .unwrap_or_default();
    let mut params = match dest.params.as_ref() {
        None | Some(Updater::Preserve) => previous_params,
        Some(updater) => {
            let mut merged = previous_params.clone();
            merged.extend(updater.apply(&previous_params));
            merged
        }
    };
    if let (false, Some(matched)) = (params.is_empty(), matched) {
        for &id in &matched.chain {
            if let Some(stringify) = env.tree.node(id).options.stringify_params.as_ref() {
                let stringified = stringify(&params);
                params.extend(stringified);
            }
        }
    }
    let pathname = interpolate_path(
        &pathname,
        &params,
        InterpolateOptions {
            leave_wildcards: false,
            leave_params: dest.leave_params,
        },
    )
    .path;

    // Search
    let middlewares = matched
        .map(|matched| route_middlewares(env.tree, matched, dest.include_validate_search))
        .unwrap_or_default();
    let search = apply_search_middleware((*from_search).clone(), &middlewares, dest.search.as_ref());
    let search = if *from_search == search {
        from_search
    } else {
        replace_equal(Some(&env.latest.search), search)
    };
    let search_str = env.codec.stringify(&search);

    // Hash & state
    let hash = apply_or(dest.hash.as_ref(), &env.latest.hash, String::new());
    let state = apply_or(dest.state.as_ref(), &*env.latest.state, HistoryState::new());
    let state = replace_equal(Some(&env.latest.state), state);

    let mut location = Location::new(&env.config.basepath, pathname, search, search_str, hash, state);
    location.unmask_on_reload = dest.unmask_on_reload.unwrap_or(false);
    Ok(location)
}

/// The search middleware chain of the destination routes, root first
fn route_middlewares(
    tree: &RouteTree,
    matched: &MatchedRoutes,
    include_validate: bool,
) -> Vec<SearchMiddleware> {
    let mut middlewares: Vec<SearchMiddleware> = Vec::new();

    for &id in &matched.chain {
        let options = &tree.node(id).options;

        if let Some(route_middlewares) = options.search_middlewares.as_ref() {
            middlewares.extend(route_middlewares.iter().cloned());
        } else if !options.pre_search_filters.is_empty() || !options.post_search_filters.is_empty() {
            middlewares.push(filter_middleware(
                options.pre_search_filters.clone(),
                options.post_search_filters.clone(),
            ));
        }

        if let (true, Some(validate)) = (include_validate, options.validate_search.clone()) {
            middlewares.push(Arc::new(
                move |search: SearchMap, next: &dyn Fn(SearchMap) -> SearchMap| {
                    let result = next(search);
                    match validate(&result) {
                        Ok(validated) => {
                            let mut merged = result;
                            merged.extend(validated);
                            merged
                        }
                        Err(_) => result,
                    }
                },
            ));
        }
    }

    middlewares
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::parse_location;
    use crate::route::Route;
    use crate::search::{retain_search_params, SearchKeys};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use trailhead_history::parse_href;

    struct Fixture {
        tree: RouteTree,
        config: RouterConfig,
        cache: ParseCache,
        codec: SearchCodec,
        masks: Vec<RouteMask>,
        latest: Location,
    }

    impl Fixture {
        fn new(root: Route, href: &str) -> Self {
            let codec = SearchCodec::default();
            let latest = parse_location(&parse_href(href, HistoryState::new()), None, &codec, "/", "k");
            Self {
                tree: RouteTree::build(root).unwrap(),
                config: RouterConfig::default(),
                cache: ParseCache::default(),
                codec,
                masks: Vec::new(),
                latest,
            }
        }

        fn build(&self, opts: &BuildLocationOptions) -> Result<Location, RouterError> {
            let env = BuildEnv {
                tree: &self.tree,
                config: &self.config,
                parse_cache: &self.cache,
                codec: &self.codec,
                route_masks: &self.masks,
                latest: &self.latest,
                from_matches: &[],
                pending_search: None,
            };
            build_location(&env, opts)
        }
    }

    fn map(value: Value) -> Params {
        value.as_object().cloned().unwrap_or_default()
    }

    fn routes() -> Route {
        Route::root().with_children([
            Route::new("posts").with_child(Route::new("$postId").with_params_stringify(|params| {
                let mut out = Params::new();
                if let Some(Value::Number(n)) = params.get("postId") {
                    out.insert("postId".into(), Value::String(format!("p{}", n)));
                }
                out
            })),
            Route::new("photos/$privateId/details"),
            Route::new("photos/$publicId"),
        ])
    }

    #[test]
    fn test_relative_to_resolves_against_current_pathname() {
        let fixture = Fixture::new(routes(), "/posts/1/comments");
        let loc = fixture.build(&BuildLocationOptions::new().with_to("../..")).unwrap();
        assert_eq!(loc.pathname, "/posts");
    }

    #[test]
    fn test_params_are_interpolated_and_stringified_per_route() {
        let fixture = Fixture::new(routes(), "/");
        let loc = fixture
            .build(
                &BuildLocationOptions::new()
                    .with_to("/posts/$postId")
                    .with_params(map(json!({"postId": 7}))),
            )
            .unwrap();
        assert_eq!(loc.pathname, "/posts/p7");
    }

    #[test]
    fn test_search_hash_state_instructions() {
        let fixture = Fixture::new(routes(), "/posts?page=2#top");

        let loc = fixture.build(&BuildLocationOptions::new().with_to("/posts")).unwrap();
        assert!(loc.search.is_empty());
        assert_eq!(loc.hash, "");
        assert_eq!(loc.href, "/posts");

        let loc = fixture
            .build(&BuildLocationOptions::new().with_to("/posts").preserving())
            .unwrap();
        assert_eq!(loc.href, "/posts?page=2#top");
        assert!(Arc::ptr_eq(&loc.search, &fixture.latest.search));

        let loc = fixture
            .build(
                &BuildLocationOptions::new()
                    .with_to("/posts")
                    .with_search(Updater::reduce(|s: &SearchMap| {
                        let mut s = s.clone();
                        s.insert("page".into(), json!(3));
                        s
                    }))
                    .with_hash("bottom".to_string()),
            )
            .unwrap();
        assert_eq!(loc.href, "/posts?page=3#bottom");
    }

    #[test]
    fn test_route_middlewares_apply_to_destination() {
        let root = Route::root().with_child(
            Route::new("list").with_search_middleware(retain_search_params(SearchKeys::Keys(vec![
                "lang".to_string(),
            ]))),
        );
        let fixture = Fixture::new(root, "/?lang=en&page=4");

        let loc = fixture
            .build(&BuildLocationOptions::new().with_to("/list").with_search(map(json!({"page": 1}))))
            .unwrap();
        assert_eq!(Value::Object((*loc.search).clone()), json!({"page": 1, "lang": "en"}));
    }

    #[test]
    fn test_configured_mask_renames_params() {
        let mut fixture = Fixture::new(routes(), "/");
        fixture.masks.push(RouteMask::new(
            "/photos/$privateId/details",
            BuildLocationOptions::new()
                .with_to("/photos/$publicId")
                .with_params(Updater::reduce(|prev: &Params| {
                    let mut next = Params::new();
                    if let Some(id) = prev.get("privateId") {
                        next.insert("publicId".into(), id.clone());
                    }
                    next
                })),
        ));

        let loc = fixture
            .build(&BuildLocationOptions::new().with_to("/photos/abc123/details"))
            .unwrap();
        assert_eq!(loc.pathname, "/photos/abc123/details");
        assert_eq!(
            loc.masked_location.as_ref().map(|m| m.pathname.as_str()),
            Some("/photos/abc123")
        );
    }

    #[test]
    fn test_external_target_skips_the_tree() {
        let fixture = Fixture::new(routes(), "/");
        let loc = fixture
            .build(&BuildLocationOptions::new().with_to("https://example.com/x"))
            .unwrap();
        assert!(loc.external);
        assert_eq!(loc.href, "https://example.com/x");
    }

    #[test]
    fn test_unknown_from_is_an_error() {
        let fixture = Fixture::new(routes(), "/");
        let err = fixture
            .build(&BuildLocationOptions::new().with_from("/nope").with_to("."))
            .unwrap_err();
        assert!(matches!(err, RouterError::InvalidFrom(from) if from == "/nope"));
    }

    #[test]
    fn test_basepath_only_in_public_href() {
        let mut fixture = Fixture::new(routes(), "/");
        fixture.config.basepath = "/app".to_string();
        let loc = fixture.build(&BuildLocationOptions::new().with_to("/posts")).unwrap();
        assert_eq!(loc.pathname, "/posts");
        assert_eq!(loc.href, "/posts");
        assert_eq!(loc.public_href, "/app/posts");
    }
}
