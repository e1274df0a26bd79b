/// The match engine: pathname → ordered chain of route matches
///
/// Matching happens in two steps. [`get_matched_routes`] walks the ranked
/// flat list and picks the found route, running eager param parsers for
/// routes that opted into `skip_route_on_parse_error`. [`match_routes`]
/// then turns the found route's ancestor chain into [`RouteMatch`] records:
/// deferred param parsing, serial search/state validation, match ids,
/// reuse of existing records and context assembly.
use crate::config::{NotFoundMode, RouterConfig};
use crate::error::RouteError;
use crate::location::{strip_internal_state, Location};
use crate::path::matcher::{match_segments, RawParams, FUZZY_KEY};
use crate::path::{interpolate_path, trim_path_right, InterpolateOptions, ParseCache};
use crate::route::{NodeId, RouteContextArgs, RouteTree};
use crate::route_match::{FetchPhase, MatchCause, MatchStatus, RouteMatch};
use crate::sharing::{replace_equal, replace_equal_arc};
use crate::{Context, Params, SearchMap};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Result of walking the flat route list
#[derive(Debug, Clone)]
pub struct MatchedRoutes {
    /// Root-first chain of the found route, or just the root
    pub chain: Vec<NodeId>,
    pub found: Option<NodeId>,
    /// Raw captures of the found route's full path
    pub raw_params: RawParams,
    /// Params already parsed while matching, by route
    pub parsed: HashMap<NodeId, Params>,
    /// The found route only matched a prefix of the pathname
    pub fuzzy: bool,
}

impl MatchedRoutes {
    /// No route claims the whole pathname
    pub fn is_global_not_found(&self) -> bool {
        self.found.is_none() || self.fuzzy
    }
}

type ParseMemo = HashMap<(NodeId, String), Result<Params, String>>;

/// Find the most specific route for `pathname`
///
/// `to` names a route path; when it is a known full path that matches, the
/// ranked walk is skipped. Otherwise the first exact structural match wins.
/// A prefix match is remembered and used only if no exact match exists.
pub fn get_matched_routes(
    tree: &RouteTree,
    config: &RouterConfig,
    cache: &ParseCache,
    pathname: &str,
    to: Option<&str>,
) -> MatchedRoutes {
    let trimmed = trim_path_right(pathname);
    let base = cache.parse(if trimmed.is_empty() { "/" } else { trimmed });
    let mut memo = ParseMemo::new();

    let try_route = |node_id: NodeId, memo: &mut ParseMemo| {
        let node = tree.node(node_id);
        let case_sensitive = node.options.case_sensitive.unwrap_or(config.case_sensitive);
        let raw = match_segments(&base, &node.segments, true, case_sensitive)?;
        let parsed = eager_parse(tree, node_id, &raw, memo)?;
        Some((raw, parsed))
    };

    let mut found = None;

    if let Some(node_id) = to.and_then(|to| tree.by_path(trim_path_right(to))) {
        if let Some((raw, parsed)) = try_route(node_id, &mut memo) {
            let fuzzy = raw.contains_key(FUZZY_KEY);
            found = Some((node_id, raw, parsed, fuzzy));
        }
    }

    if found.is_none() {
        let mut fuzzy_candidate = None;
        for &node_id in tree.flat_routes() {
            let Some((raw, parsed)) = try_route(node_id, &mut memo) else {
                continue;
            };
            if raw.contains_key(FUZZY_KEY) {
                if fuzzy_candidate.is_none() {
                    fuzzy_candidate = Some((node_id, raw, parsed, true));
                }
                continue;
            }
            found = Some((node_id, raw, parsed, false));
            break;
        }
        if found.is_none() {
            found = fuzzy_candidate;
        }
    }

    match found {
        Some((node_id, raw_params, parsed, fuzzy)) => {
            trace!(pathname, route = %tree.node(node_id).id, fuzzy, "Found route");
            MatchedRoutes {
                chain: tree.chain(node_id),
                found: Some(node_id),
                raw_params,
                parsed,
                fuzzy,
            }
        }
        None => MatchedRoutes {
            chain: vec![tree.root()],
            found: None,
            raw_params: RawParams::new(),
            parsed: HashMap::new(),
            fuzzy: false,
        },
    }
}

/// Run the parsers of skip-on-error routes along a candidate's chain
///
/// Each parser sees the values known so far for its full-path keys: raw
/// captures, overridden by what ancestors already parsed. A failure rejects
/// the candidate. Results are memoized so a parser runs once per input.
fn eager_parse(
    tree: &RouteTree,
    node_id: NodeId,
    raw: &RawParams,
    memo: &mut ParseMemo,
) -> Option<HashMap<NodeId, Params>> {
    let mut known = raw_to_params(raw);
    let mut parsed = HashMap::new();

    for id in tree.chain(node_id) {
        let node = tree.node(id);
        let Some(parse) = node.options.parse_params.as_ref() else {
            continue;
        };
        if !node.options.skip_route_on_parse_error {
            continue;
        }

        let input: Params = node
            .full_param_keys
            .iter()
            .filter_map(|key| known.get(key).map(|value| (key.clone(), value.clone())))
            .collect();
        let key = (id, Value::Object(input.clone()).to_string());
        let result = memo
            .entry(key)
            .or_insert_with(|| parse(&input).map_err(|err| err.to_string()))
            .clone();

        match result {
            Ok(values) => {
                known.extend(values.clone());
                parsed.insert(id, values);
            }
            Err(message) => {
                trace!(route = %node.id, %message, "Skipping route on parse error");
                return None;
            }
        }
    }

    Some(parsed)
}

pub(crate) fn raw_to_params(raw: &RawParams) -> Params {
    raw.iter()
        .filter(|(key, _)| key.as_str() != FUZZY_KEY)
        .map(|(key, value)| (key.clone(), Value::String(value.clone())))
        .collect()
}

/// Parsed params for a whole chain
#[derive(Debug, Default)]
struct ResolvedParams {
    params: Params,
    strict: HashMap<NodeId, Params>,
    errors: HashMap<NodeId, RouteError>,
}

/// Deferred parse pass, root to leaf, for routes not parsed while matching
fn resolve_params(tree: &RouteTree, matched: &MatchedRoutes) -> ResolvedParams {
    let mut params = raw_to_params(&matched.raw_params);
    for id in &matched.chain {
        if let Some(values) = matched.parsed.get(id) {
            params.extend(values.clone());
        }
    }

    let mut contributed: HashMap<NodeId, Vec<String>> = HashMap::new();
    let mut errors = HashMap::new();

    for &id in &matched.chain {
        let node = tree.node(id);
        let mut keys = node.own_param_keys.clone();

        if let Some(values) = matched.parsed.get(&id) {
            keys.extend(values.keys().cloned());
        } else if let Some(parse) = node.options.parse_params.as_ref() {
            match parse(&params) {
                Ok(values) => {
                    keys.extend(values.keys().cloned());
                    params.extend(values);
                }
                Err(err) => {
                    errors.insert(
                        id,
                        RouteError::ParamParse {
                            route_id: node.id.clone(),
                            message: err.to_string(),
                        },
                    );
                }
            }
        }

        contributed.insert(id, keys);
    }

    let strict = contributed
        .into_iter()
        .map(|(id, keys)| {
            let own = keys
                .into_iter()
                .filter_map(|key| params.get(&key).map(|value| (key, value.clone())))
                .collect();
            (id, own)
        })
        .collect();

    ResolvedParams {
        params,
        strict,
        errors,
    }
}

/// Everything [`match_routes`] reads besides the location
pub(crate) struct MatchEnv<'a> {
    pub tree: &'a RouteTree,
    pub config: &'a RouterConfig,
    pub parse_cache: &'a ParseCache,
    pub router_context: &'a Context,
    /// Existing record with this id, from any pool
    pub lookup: &'a dyn Fn(&str) -> Option<Arc<RouteMatch>>,
    /// Currently committed matches
    pub active: &'a [Arc<RouteMatch>],
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct MatchRoutesOptions {
    pub preload: bool,
    /// Only building a location: route `context` functions are not run
    pub build_location: bool,
}

/// Route chosen to render the not-found state for an unmatched pathname
fn global_not_found_target(tree: &RouteTree, config: &RouterConfig, chain: &[NodeId]) -> NodeId {
    if config.not_found_mode == NotFoundMode::Root {
        return tree.root();
    }
    chain
        .iter()
        .rev()
        .copied()
        .find(|&id| tree.node(id).options.not_found_boundary)
        .unwrap_or_else(|| tree.root())
}

/// Merge context layers left to right, later keys winning
pub(crate) fn merge_context(layers: &[&Context]) -> Context {
    let mut merged = Context::new();
    for layer in layers {
        merged.extend(layer.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    merged
}

/// Build the root-first list of matches for `location`
pub(crate) fn match_routes(
    env: &MatchEnv<'_>,
    location: &Location,
    opts: MatchRoutesOptions,
) -> Vec<RouteMatch> {
    let tree = env.tree;
    let matched = get_matched_routes(tree, env.config, env.parse_cache, &location.pathname, None);

    let global_not_found = matched
        .is_global_not_found()
        .then(|| global_not_found_target(tree, env.config, &matched.chain));

    let resolved = resolve_params(tree, &matched);
    let raw_values = raw_to_params(&matched.raw_params);
    let params = replace_equal(env.active.last().map(|m| &m.params), resolved.params);
    let filtered_state = strip_internal_state(&location.state);

    let mut matches: Vec<RouteMatch> = Vec::with_capacity(matched.chain.len());
    let mut created = Vec::with_capacity(matched.chain.len());

    for (index, &node_id) in matched.chain.iter().enumerate() {
        let node = tree.node(node_id);
        let parent = matches.last();

        // Search validation is serial: each route sees its parent's result
        let parent_search = parent
            .map(|p| Arc::clone(&p.search))
            .unwrap_or_else(|| Arc::clone(&location.search));
        let parent_strict = parent.map(|p| p.strict_search.clone()).unwrap_or_default();

        let (search, strict_search, search_error) = match node.options.validate_search.as_ref() {
            None => ((*parent_search).clone(), parent_strict, None),
            Some(validate) => match validate(&parent_search) {
                Ok(strict) => {
                    let mut search = (*parent_search).clone();
                    search.extend(strict.clone());
                    let mut strict_search = parent_strict;
                    strict_search.extend(strict);
                    (search, strict_search, None)
                }
                Err(err) => (
                    (*parent_search).clone(),
                    SearchMap::new(),
                    Some(RouteError::SearchParams {
                        route_id: node.id.clone(),
                        message: err.to_string(),
                    }),
                ),
            },
        };

        let (state, state_error) = match node.options.validate_state.as_ref() {
            None => (filtered_state.clone(), None),
            Some(validate) => match validate(&filtered_state) {
                Ok(strict) => {
                    let mut state = filtered_state.clone();
                    state.extend(strict);
                    (state, None)
                }
                Err(err) => (
                    filtered_state.clone(),
                    Some(RouteError::StateValidation {
                        route_id: node.id.clone(),
                        message: err.to_string(),
                    }),
                ),
            },
        };

        let loader_deps = node
            .options
            .loader_deps
            .as_ref()
            .map(|deps| deps(&search))
            .unwrap_or(Value::Null);
        let deps_hash = match &loader_deps {
            Value::Null => String::new(),
            deps => deps.to_string(),
        };

        let id = format!(
            "{}{}",
            interpolate_path(&node.id, &raw_values, InterpolateOptions::leave_wildcards()).path,
            deps_hash
        );
        let pathname = interpolate_path(&node.full_path, &raw_values, InterpolateOptions::default()).path;

        let existing = (env.lookup)(&id);
        let previous = env.active.iter().find(|m| m.route_id == node.id);
        let cause = if previous.is_some() {
            MatchCause::Stay
        } else {
            MatchCause::Enter
        };

        let search = match (previous, existing.as_ref()) {
            (Some(previous), _) => replace_equal(Some(&previous.search), search),
            (None, Some(existing)) => replace_equal(Some(&existing.search), search),
            (None, None) => Arc::new(search),
        };
        let strict_params = resolved.strict.get(&node_id).cloned().unwrap_or_default();

        let mut route_match = match existing {
            Some(existing) => {
                let mut reused = (*existing).clone();
                reused.cause = cause;
                reused.params = replace_equal_arc(Some(&existing.params), Arc::clone(&params));
                reused.strict_params = strict_params;
                reused.search = search;
                reused.strict_search = strict_search;
                reused
            }
            None => {
                created.push(index);
                RouteMatch {
                    id,
                    route_id: node.id.clone(),
                    full_path: node.full_path.clone(),
                    index,
                    pathname,
                    params: Arc::clone(&params),
                    strict_params,
                    search,
                    strict_search,
                    state: match previous {
                        Some(previous) if previous.state == state => previous.state.clone(),
                        _ => state,
                    },
                    status: if node.has_lifecycle() {
                        MatchStatus::Pending
                    } else {
                        MatchStatus::Success
                    },
                    fetch_phase: FetchPhase::Idle,
                    invalid: false,
                    preload: false,
                    cause,
                    global_not_found: false,
                    loader_deps: match previous {
                        Some(previous) if previous.loader_deps == loader_deps => {
                            previous.loader_deps.clone()
                        }
                        _ => loader_deps,
                    },
                    context: Context::new(),
                    route_context: Context::new(),
                    before_load_context: Context::new(),
                    loader_data: None,
                    error: None,
                    params_error: resolved.errors.get(&node_id).cloned(),
                    search_error: None,
                    state_error: None,
                    updated_at: Utc::now(),
                    fetch_count: 0,
                    abort: CancellationToken::new(),
                    dehydrated: false,
                }
            }
        };

        if !opts.preload {
            route_match.global_not_found = global_not_found == Some(node_id);
        }
        route_match.search_error = search_error;
        route_match.state_error = state_error;

        let parent_context = parent
            .map(|p| p.context.clone())
            .unwrap_or_else(|| env.router_context.clone());
        route_match.context = merge_context(&[
            &parent_context,
            &route_match.route_context,
            &route_match.before_load_context,
        ]);

        matches.push(route_match);
    }

    if !opts.build_location && !created.is_empty() {
        // Context functions run for new matches only, root first, so each
        // sees its parent's final context.
        for index in 0..matches.len() {
            let parent_context = match index.checked_sub(1) {
                Some(parent) => matches[parent].context.clone(),
                None => env.router_context.clone(),
            };

            let context_fn = tree.node(matched.chain[index]).options.context.as_ref();
            if let (true, Some(context_fn)) = (created.contains(&index), context_fn) {
                let route_match = &matches[index];
                let args = RouteContextArgs {
                    params: Arc::clone(&route_match.params),
                    deps: route_match.loader_deps.clone(),
                    context: parent_context.clone(),
                    location: location.clone(),
                    cause: route_match.cause,
                    preload: route_match.preload,
                };
                matches[index].route_context = context_fn(&args);
            }

            let route_match = &mut matches[index];
            route_match.context = merge_context(&[
                &parent_context,
                &route_match.route_context,
                &route_match.before_load_context,
            ]);
        }
    }

    matches
}
