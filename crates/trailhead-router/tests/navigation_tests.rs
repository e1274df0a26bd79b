//! Integration tests for navigation and the load pipeline
//!
//! Covers hook ordering, preloading, redirects, not-found handling,
//! cache maintenance and the server/client snapshot round trip.

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use trailhead_history::{History, MemoryHistory};
use trailhead_router::*;

// ============================================================================
// Helpers
// ============================================================================

type Calls = Arc<AtomicUsize>;

fn calls() -> Calls {
    Arc::new(AtomicUsize::new(0))
}

fn count(calls: &Calls) -> usize {
    calls.load(Ordering::SeqCst)
}

async fn router_at(routes: Route, path: &str) -> Router {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    Router::new(RouterOptions::new(routes, MemoryHistory::new(vec![path.to_string()])))
        .await
        .unwrap()
}

fn find(state: &RouterState, route_id: &str) -> Option<Arc<RouteMatch>> {
    state.matches.iter().find(|m| m.route_id == route_id).cloned()
}

/// A route whose loader counts its calls and returns its match id
fn counted(path: &str, loads: &Calls) -> Route {
    let loads = Arc::clone(loads);
    Route::new(path).with_loader(move |ctx| {
        let loads = Arc::clone(&loads);
        async move {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "match": ctx.match_id }))
        }
    })
}

// ============================================================================
// Loading
// ============================================================================

#[tokio::test]
async fn test_loaders_see_params_and_context() {
    let routes = Route::root().with_child(
        Route::new("posts")
            .with_before_load(|_| async {
                let mut context = Context::new();
                context.insert("user".to_string(), json!("ada"));
                Ok(Some(context))
            })
            .with_child(Route::new("$postId").with_loader(|ctx| async move {
                Ok(json!({
                    "id": ctx.params.get("postId").cloned(),
                    "user": ctx.context.get("user").cloned(),
                    "app": ctx.context.get("app").cloned(),
                }))
            })),
    );
    let mut context = Context::new();
    context.insert("app".to_string(), json!("blog"));
    let router = Router::new(
        RouterOptions::new(routes, MemoryHistory::new(vec!["/posts/9".to_string()])).with_context(context),
    )
    .await
    .unwrap();

    router.load().await.unwrap();

    let state = router.state();
    let leaf = find(&state, "/posts/$postId").unwrap();
    assert_eq!(leaf.status, MatchStatus::Success);
    assert_eq!(leaf.loader_data, Some(json!({ "id": "9", "user": "ada", "app": "blog" })));
    assert_eq!(state.status_code, 200);
    assert_eq!(state.status, RouterStatus::Idle);
}

#[tokio::test]
async fn test_child_loader_can_await_parent_data() {
    let routes = Route::root().with_child(
        Route::new("a")
            .with_loader(|_| async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(json!(1))
            })
            .with_child(Route::new("b").with_loader(|ctx| async move {
                let parent = ctx.parent.data().await.and_then(|v| v.as_i64()).unwrap_or_default();
                Ok(json!(parent + 1))
            })),
    );
    let router = router_at(routes, "/a/b").await;
    router.load().await.unwrap();

    let leaf = find(&router.state(), "/a/b").unwrap();
    assert_eq!(leaf.loader_data, Some(json!(2)));
}

#[tokio::test]
async fn test_stale_match_revalidates_in_background() {
    let loads = calls();
    let routes = Route::root().with_child(counted("feed", &loads));
    let router = router_at(routes, "/feed").await;

    router.load().await.unwrap();
    assert_eq!(count(&loads), 1);

    // Default stale time is zero: the second load keeps showing the data
    // and refreshes it behind the scenes.
    router.load().await.unwrap();
    let leaf = find(&router.state(), "/feed").unwrap();
    assert_eq!(leaf.status, MatchStatus::Success);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(count(&loads), 2);
}

#[tokio::test]
async fn test_fresh_match_is_not_reloaded() {
    let loads = calls();
    let routes = Route::root().with_children([
        counted("feed", &loads).with_stale_time(Duration::from_secs(60)),
        Route::new("about"),
    ]);
    let router = router_at(routes, "/feed").await;

    router.load().await.unwrap();
    router.navigate(NavigateOptions::to("/about")).await.unwrap();
    router.navigate(NavigateOptions::to("/feed")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(count(&loads), 1);
    let leaf = find(&router.state(), "/feed").unwrap();
    assert_eq!(leaf.loader_data, Some(json!({ "match": "/feed" })));
}

// ============================================================================
// Preloading
// ============================================================================

#[tokio::test]
async fn test_navigation_reuses_resolved_preload() {
    let loads = calls();
    let guards = calls();
    let guard_calls = Arc::clone(&guards);

    let routes = Route::root().with_children([
        Route::new("/"),
        counted("posts", &loads).with_before_load(move |_| {
            let guard_calls = Arc::clone(&guard_calls);
            async move {
                guard_calls.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }
        }),
    ]);
    let router = router_at(routes, "/").await;
    router.load().await.unwrap();

    let preloaded = router
        .preload_route(&BuildLocationOptions::new().with_to("/posts"))
        .await
        .unwrap();
    assert!(preloaded.iter().any(|m| m.route_id == "/posts" && m.status == MatchStatus::Success));
    assert!(router.state().cached_matches.iter().any(|m| m.route_id == "/posts"));

    router.navigate(NavigateOptions::to("/posts")).await.unwrap();

    // The loader result is fresh for the preload stale time; guards always run
    assert_eq!(count(&loads), 1);
    assert_eq!(count(&guards), 2);
    let state = router.state();
    assert_eq!(find(&state, "/posts").and_then(|m| m.loader_data.clone()), Some(json!({ "match": "/posts" })));
    assert!(state.cached_matches.iter().all(|m| m.route_id != "/posts"));
}

#[tokio::test]
async fn test_navigation_joins_pending_preload() {
    let loads = calls();
    let counter = Arc::clone(&loads);

    let routes = Route::root().with_children([
        Route::new("/"),
        Route::new("slow").with_loader(move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(80)).await;
                Ok(json!("slow data"))
            }
        }),
    ]);
    let router = router_at(routes, "/").await;
    router.load().await.unwrap();

    let preloader = router.clone();
    let preload = tokio::spawn(async move {
        preloader
            .preload_route(&BuildLocationOptions::new().with_to("/slow"))
            .await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    router.navigate(NavigateOptions::to("/slow")).await.unwrap();
    preload.await.unwrap().unwrap();

    assert_eq!(count(&loads), 1);
    let leaf = find(&router.state(), "/slow").unwrap();
    assert_eq!(leaf.status, MatchStatus::Success);
    assert_eq!(leaf.loader_data, Some(json!("slow data")));
}

#[tokio::test]
async fn test_preload_opt_out_skips_loader() {
    let loads = calls();
    let routes = Route::root().with_children([Route::new("/"), counted("heavy", &loads).with_preload(false)]);
    let router = router_at(routes, "/").await;
    router.load().await.unwrap();

    router
        .preload_route(&BuildLocationOptions::new().with_to("/heavy"))
        .await
        .unwrap();
    assert_eq!(count(&loads), 0);

    router.navigate(NavigateOptions::to("/heavy")).await.unwrap();
    assert_eq!(count(&loads), 1);
}

// ============================================================================
// Concurrent navigations
// ============================================================================

/// A route whose loader takes 50ms and returns its zero-based call index
fn slow_counted(path: &str, loads: &Calls) -> Route {
    let loads = Arc::clone(loads);
    Route::new(path).with_loader(move |_| {
        let call = loads.fetch_add(1, Ordering::SeqCst);
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(json!(call))
        }
    })
}

#[tokio::test]
async fn test_superseded_navigation_is_cancelled() {
    let aborted = calls();
    let entered = calls();
    let abort_count = Arc::clone(&aborted);
    let enter_count = Arc::clone(&entered);

    let routes = Route::root().with_children([
        Route::new("/"),
        Route::new("a")
            .with_on_enter(move |_| {
                enter_count.fetch_add(1, Ordering::SeqCst);
            })
            .with_loader(move |ctx| {
                let abort_count = Arc::clone(&abort_count);
                async move {
                    tokio::select! {
                        _ = ctx.signal.cancelled() => {
                            abort_count.fetch_add(1, Ordering::SeqCst);
                            Err(RouteError::msg("aborted"))
                        }
                        _ = tokio::time::sleep(Duration::from_secs(5)) => Ok(json!("a")),
                    }
                }
            }),
        Route::new("b").with_loader(|_| async { Ok(json!("b")) }),
    ]);
    let router = router_at(routes, "/").await;
    router.load().await.unwrap();

    let first = router.clone();
    let to_a = tokio::spawn(async move { first.navigate(NavigateOptions::to("/a")).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    router.navigate(NavigateOptions::to("/b")).await.unwrap();
    to_a.await.unwrap().unwrap();

    assert_eq!(count(&aborted), 1);
    assert_eq!(count(&entered), 0);

    let state = router.state();
    let leaf = state.matches.last().unwrap();
    assert_eq!(leaf.route_id, "/b");
    assert_eq!(leaf.status, MatchStatus::Success);
    assert!(find(&state, "/a").is_none());
    assert_eq!(state.location.href, "/b");
}

#[tokio::test]
async fn test_concurrent_navigations_share_one_loader_run() {
    let loads = calls();
    let routes = Route::root().with_children([Route::new("/"), slow_counted("slow", &loads)]);
    let router = router_at(routes, "/").await;
    router.load().await.unwrap();

    let (first, second) = tokio::join!(
        router.navigate(NavigateOptions::to("/slow")),
        router.navigate(NavigateOptions::to("/slow")),
    );
    first.unwrap();
    second.unwrap();

    assert_eq!(count(&loads), 1);
    let leaf = find(&router.state(), "/slow").unwrap();
    assert_eq!(leaf.status, MatchStatus::Success);
    assert_eq!(leaf.loader_data, Some(json!(0)));
}

// ============================================================================
// Redirects
// ============================================================================

fn guarded_routes(guards: &Calls) -> Route {
    let guard_calls = Arc::clone(guards);
    Route::root().with_children([
        Route::new("/"),
        Route::new("login"),
        Route::new("account").with_before_load(move |_| {
            let guard_calls = Arc::clone(&guard_calls);
            async move {
                guard_calls.fetch_add(1, Ordering::SeqCst);
                Err(RouteError::redirect(Redirect::to("/login")))
            }
        }),
    ])
}

#[tokio::test]
async fn test_redirect_replaces_history_entry() {
    let guards = calls();
    let router = router_at(guarded_routes(&guards), "/").await;
    router.load().await.unwrap();

    router.navigate(NavigateOptions::to("/account")).await.unwrap();

    let state = router.state();
    assert_eq!(state.location.pathname, "/login");
    assert_eq!(state.resolved_location.as_ref().map(|l| l.pathname.as_str()), Some("/login"));
    assert_eq!(state.matches.last().map(|m| m.route_id.as_str()), Some("/login"));
    assert!(state.redirect.is_none());

    router.history().back().await.unwrap();
    assert_eq!(router.history().location().await.pathname, "/");
}

#[tokio::test]
async fn test_redirect_during_preload_still_redirects_navigation() {
    let guards = calls();
    let router = router_at(guarded_routes(&guards), "/").await;
    router.load().await.unwrap();

    router
        .preload_route(&BuildLocationOptions::new().with_to("/account"))
        .await
        .unwrap();
    assert_eq!(count(&guards), 1);
    assert_eq!(router.state().location.pathname, "/");

    router.navigate(NavigateOptions::to("/account")).await.unwrap();
    assert_eq!(count(&guards), 2);
    assert_eq!(router.state().location.pathname, "/login");
}

#[tokio::test]
async fn test_on_error_can_turn_failure_into_redirect() {
    let routes = Route::root().with_children([
        Route::new("/"),
        Route::new("login"),
        Route::new("dashboard")
            .with_loader(|_| async { Err(RouteError::msg("session expired")) })
            .with_on_error(|_| Some(RouteError::redirect(Redirect::to("/login")))),
    ]);
    let router = router_at(routes, "/").await;
    router.load().await.unwrap();

    router.navigate(NavigateOptions::to("/dashboard")).await.unwrap();
    assert_eq!(router.state().location.pathname, "/login");
}

#[tokio::test]
async fn test_redirect_loop_is_bounded() {
    let routes = Route::root().with_children([
        Route::new("/"),
        Route::new("ping").with_before_load(|_| async { Err(RouteError::redirect(Redirect::to("/pong"))) }),
        Route::new("pong").with_before_load(|_| async { Err(RouteError::redirect(Redirect::to("/ping"))) }),
    ]);
    let config = RouterConfig {
        max_redirects: 3,
        ..Default::default()
    };
    let router = Router::new(
        RouterOptions::new(routes, MemoryHistory::new(vec!["/".to_string()])).with_config(config),
    )
    .await
    .unwrap();
    router.load().await.unwrap();

    let err = router.navigate(NavigateOptions::to("/ping")).await.unwrap_err();
    assert!(matches!(err, RouterError::TooManyRedirects(3)));
}

#[tokio::test]
async fn test_server_records_redirect_instead_of_following() {
    let guards = calls();
    let router = Router::new(
        RouterOptions::new(guarded_routes(&guards), MemoryHistory::new(vec!["/account".to_string()]))
            .with_server(true),
    )
    .await
    .unwrap();

    router.load().await.unwrap();

    let state = router.state();
    assert_eq!(state.status_code, 307);
    assert_eq!(state.redirect.as_ref().and_then(|r| r.href.as_deref()), Some("/login"));
    assert_eq!(router.history().location().await.pathname, "/account");
}

// ============================================================================
// Not found & errors
// ============================================================================

#[tokio::test]
async fn test_unmatched_path_is_global_not_found() {
    let routes = Route::root().with_children([Route::new("about"), Route::new("contact")]);
    let router = router_at(routes, "/nowhere").await;
    router.load().await.unwrap();

    let state = router.state();
    assert_eq!(state.status_code, 404);
    assert_eq!(state.matches.len(), 1);
    assert!(state.matches[0].global_not_found);
    assert_eq!(state.matches[0].route_id, ROOT_ROUTE_ID);
}

#[tokio::test]
async fn test_loader_not_found_lands_on_boundary() {
    let routes = Route::root().with_child(
        Route::new("posts")
            .with_not_found_boundary()
            .with_child(Route::new("$postId").with_loader(|ctx| async move {
                match ctx.params.get("postId").and_then(|v| v.as_str()) {
                    Some("1") => Ok(json!("first post")),
                    _ => Err(RouteError::not_found()),
                }
            })),
    );
    let router = router_at(routes, "/posts/1").await;
    router.load().await.unwrap();
    assert_eq!(router.status_code(), 200);

    router.navigate(NavigateOptions::to("/posts/404")).await.unwrap();

    let state = router.state();
    assert_eq!(state.status_code, 404);
    assert_eq!(find(&state, "/posts").map(|m| m.status), Some(MatchStatus::NotFound));
    let leaf = find(&state, "/posts/$postId").unwrap();
    assert_eq!(leaf.status, MatchStatus::NotFound);
    assert!(leaf.error.as_ref().is_some_and(RouteError::is_not_found));
}

#[tokio::test]
async fn test_before_load_not_found_is_rendered_by_parent() {
    let routes = Route::root().with_child(
        Route::new("admin")
            .with_not_found_boundary()
            .with_child(Route::new("users").with_before_load(|_| async { Err(RouteError::not_found()) })),
    );
    let router = router_at(routes, "/admin/users").await;
    router.load().await.unwrap();

    let state = router.state();
    assert_eq!(state.status_code, 404);
    assert_eq!(find(&state, "/admin").map(|m| m.status), Some(MatchStatus::NotFound));
}

#[tokio::test]
async fn test_loader_error_sets_status_500() {
    let routes = Route::root().with_child(
        Route::new("broken").with_loader(|_| async { Err(RouteError::msg("database unavailable")) }),
    );
    let router = router_at(routes, "/broken").await;
    router.load().await.unwrap();

    let state = router.state();
    assert_eq!(state.status_code, 500);
    let leaf = find(&state, "/broken").unwrap();
    assert_eq!(leaf.status, MatchStatus::Error);
    assert_eq!(leaf.error.as_ref().map(|e| e.to_string()), Some("database unavailable".to_string()));
}

#[tokio::test]
async fn test_invalid_search_stops_the_chain() {
    let loads = calls();
    let routes = Route::root().with_child(
        Route::new("list")
            .with_validate_search(|search: &SearchMap| {
                match search.get("page").and_then(|v| v.as_i64()) {
                    Some(page) if page > 0 => Ok(search.clone()),
                    _ => anyhow::bail!("page must be a positive number"),
                }
            })
            .with_child(counted("items", &loads)),
    );
    let router = router_at(routes, "/list/items?page=0").await;
    router.load().await.unwrap();

    let state = router.state();
    let list = find(&state, "/list").unwrap();
    assert_eq!(list.status, MatchStatus::Error);
    assert!(matches!(list.error, Some(RouteError::SearchParams { .. })));
    assert_eq!(count(&loads), 0);
}

// ============================================================================
// Lifecycle callbacks & events
// ============================================================================

#[tokio::test]
async fn test_enter_stay_leave_callbacks() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let hook = |kind: &'static str| {
        let log = Arc::clone(&log);
        move |m: &RouteMatch| log.lock().push(format!("{}:{}", kind, m.id))
    };

    let routes = Route::root().with_children([
        Route::new("about"),
        Route::new("posts")
            .with_on_enter(hook("enter"))
            .with_on_stay(hook("stay"))
            .with_on_leave(hook("leave"))
            .with_child(
                Route::new("$postId")
                    .with_on_enter(hook("enter"))
                    .with_on_leave(hook("leave")),
            ),
    ]);
    let router = router_at(routes, "/about").await;
    router.load().await.unwrap();

    router.navigate(NavigateOptions::to("/posts/1")).await.unwrap();
    assert_eq!(*log.lock(), vec!["enter:/posts", "enter:/posts/1"]);
    log.lock().clear();

    router.navigate(NavigateOptions::to("/posts/2")).await.unwrap();
    assert_eq!(*log.lock(), vec!["leave:/posts/1", "enter:/posts/2", "stay:/posts"]);
    log.lock().clear();

    router.navigate(NavigateOptions::to("/about")).await.unwrap();
    assert_eq!(*log.lock(), vec!["leave:/posts", "leave:/posts/2"]);
}

#[tokio::test]
async fn test_events_arrive_in_order() {
    let routes = Route::root().with_children([Route::new("/"), Route::new("about")]);
    let router = router_at(routes, "/").await;
    let mut events = router.subscribe();

    router.load().await.unwrap();
    router
        .navigate(BuildLocationOptions::new().with_to("/about").with_hash("team".to_string()))
        .await
        .unwrap();

    let mut names = Vec::new();
    let mut last_change = None;
    while let Ok(event) = events.try_recv() {
        names.push(event.name());
        last_change = event.location_change().cloned();
    }

    assert_eq!(
        names,
        vec![
            "before_navigate",
            "before_load",
            "load",
            "resolved",
            "before_navigate",
            "before_load",
            "load",
            "resolved",
        ]
    );
    let change = last_change.unwrap();
    assert!(change.pathname_changed);
    assert!(change.hash_changed);
    assert_eq!(change.to_location.hash, "team");
}

#[tokio::test]
async fn test_external_href_asks_host_to_reload() {
    let routes = Route::root().with_child(Route::new("/"));
    let router = router_at(routes, "/").await;
    router.load().await.unwrap();
    let mut events = router.subscribe();

    router.navigate(NavigateOptions::href("https://example.com/docs")).await.unwrap();

    assert_eq!(
        events.try_recv().ok(),
        Some(RouterEvent::ReloadDocument {
            href: "https://example.com/docs".to_string(),
            replace: false,
        })
    );
    assert_eq!(router.history().location().await.pathname, "/");
}

// ============================================================================
// Cache
// ============================================================================

#[tokio::test]
async fn test_invalidate_reloads_matching_routes() {
    let loads = calls();
    let routes = Route::root().with_child(counted("stats", &loads).with_stale_time(Duration::from_secs(60)));
    let router = router_at(routes, "/stats").await;
    router.load().await.unwrap();
    assert_eq!(count(&loads), 1);

    router.invalidate(|m| m.route_id == "/stats", true).await.unwrap();

    assert_eq!(count(&loads), 2);
    let leaf = find(&router.state(), "/stats").unwrap();
    assert!(!leaf.invalid);
    assert_eq!(leaf.status, MatchStatus::Success);
}

#[tokio::test]
async fn test_invalidate_retries_errored_match() {
    let attempts = calls();
    let counter = Arc::clone(&attempts);
    let routes = Route::root().with_child(Route::new("flaky").with_loader(move |_| {
        let attempt = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if attempt == 0 {
                Err(RouteError::msg("timeout"))
            } else {
                Ok(json!("ok"))
            }
        }
    }));
    let router = router_at(routes, "/flaky").await;
    router.load().await.unwrap();
    assert_eq!(router.status_code(), 500);

    router.invalidate(|_| true, false).await.unwrap();

    let leaf = find(&router.state(), "/flaky").unwrap();
    assert_eq!(leaf.status, MatchStatus::Success);
    assert_eq!(leaf.loader_data, Some(json!("ok")));
    assert_eq!(router.status_code(), 200);
}

#[tokio::test]
async fn test_invalidate_during_load_commits_fresh_result() {
    let loads = calls();
    let routes = Route::root().with_children([Route::new("/"), slow_counted("slow", &loads)]);
    let router = router_at(routes, "/").await;
    router.load().await.unwrap();

    let navigator = router.clone();
    let navigation = tokio::spawn(async move { navigator.navigate(NavigateOptions::to("/slow")).await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    router.invalidate(|_| true, true).await.unwrap();
    navigation.await.unwrap().unwrap();

    // The in-flight run is not duplicated; the reload after it wins
    assert_eq!(count(&loads), 2);
    let leaf = find(&router.state(), "/slow").unwrap();
    assert_eq!(leaf.status, MatchStatus::Success);
    assert_eq!(leaf.loader_data, Some(json!(1)));
    assert!(!leaf.invalid);
}

#[tokio::test]
async fn test_should_reload_false_keeps_stale_data() {
    let loads = calls();
    let routes = Route::root().with_child(counted("feed", &loads).with_should_reload(ShouldReload::Always(false)));
    let router = router_at(routes, "/feed").await;

    router.load().await.unwrap();
    router.load().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Stale by default, but the route opted out of reloading
    assert_eq!(count(&loads), 1);
    let leaf = find(&router.state(), "/feed").unwrap();
    assert_eq!(leaf.loader_data, Some(json!({ "match": "/feed" })));
}

#[tokio::test]
async fn test_should_reload_true_refreshes_fresh_match() {
    let loads = calls();
    let asked = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&asked);
    let routes = Route::root().with_child(
        counted("stats", &loads)
            .with_stale_time(Duration::from_secs(60))
            .with_should_reload(ShouldReload::Dynamic(Arc::new(move |ctx: &LoaderContext| {
                seen.lock().push(ctx.route_id.clone());
                true
            }))),
    );
    let router = router_at(routes, "/stats").await;

    router.load().await.unwrap();
    assert_eq!(count(&loads), 1);

    router.load().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(count(&loads), 2);
    assert!(!asked.lock().is_empty());
    assert!(asked.lock().iter().all(|id| id == "/stats"));
}

#[tokio::test]
async fn test_left_matches_are_cached_until_gc() {
    let loads = calls();
    let routes = Route::root().with_children([
        Route::new("/"),
        counted("kept", &loads),
        counted("dropped", &loads).with_gc_time(Duration::ZERO),
    ]);
    let router = router_at(routes, "/kept").await;
    router.load().await.unwrap();

    router.navigate(NavigateOptions::to("/dropped")).await.unwrap();
    router.navigate(NavigateOptions::to("/")).await.unwrap();

    let cached: Vec<String> = router
        .state()
        .cached_matches
        .iter()
        .map(|m| m.route_id.clone())
        .collect();
    assert_eq!(cached, vec!["/kept".to_string()]);

    router.clear_cache(|_| true);
    assert!(router.state().cached_matches.is_empty());
}

// ============================================================================
// Server snapshot
// ============================================================================

#[tokio::test]
async fn test_hydrated_matches_skip_their_first_load() {
    let server_loads = calls();
    let server_routes = Route::root().with_child(Route::new("posts").with_child(counted("$postId", &server_loads)));
    let server = Router::new(
        RouterOptions::new(server_routes, MemoryHistory::new(vec!["/posts/5".to_string()])).with_server(true),
    )
    .await
    .unwrap();
    server.load().await.unwrap();
    assert_eq!(count(&server_loads), 1);

    let payload = serde_json::to_string(&server.dehydrate()).unwrap();

    let client_loads = calls();
    let client_routes = Route::root().with_child(Route::new("posts").with_child(counted("$postId", &client_loads)));
    let client = router_at(client_routes, "/posts/5").await;
    client.hydrate(serde_json::from_str(&payload).unwrap()).await;

    let leaf = find(&client.state(), "/posts/$postId").unwrap();
    assert!(leaf.dehydrated);
    assert_eq!(leaf.loader_data, Some(json!({ "match": "/posts/5" })));

    client.load().await.unwrap();

    assert_eq!(count(&client_loads), 0);
    let leaf = find(&client.state(), "/posts/$postId").unwrap();
    assert!(!leaf.dehydrated);
    assert_eq!(leaf.status, MatchStatus::Success);
    assert_eq!(leaf.loader_data, Some(json!({ "match": "/posts/5" })));
    assert_eq!(client.status_code(), 200);
}

#[tokio::test]
async fn test_mounted_router_follows_history_pops() {
    let routes = Route::root().with_children([Route::new("/"), Route::new("about")]);
    let router = router_at(routes, "/").await;
    router.load().await.unwrap();
    let handle = router.mount();

    router.navigate(NavigateOptions::to("/about")).await.unwrap();
    router.history().back().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(router.state().location.pathname, "/");
    handle.abort();
}
