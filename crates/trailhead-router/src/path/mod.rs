/// Path utilities: cleaning, joining, trimming and relative resolution
///
/// All functions are **pure**: given same input, always produce same output with no side effects.
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

pub mod interpolate;
pub mod matcher;
pub mod segment;

pub use interpolate::{interpolate_path, InterpolateOptions, Interpolated};
pub use matcher::{match_by_path, match_pathname, MatchOptions, RawParams};
pub use segment::{parse_pathname, parse_route_path, ParseCache, Segment, SegmentKind};

/// How a resolved path treats its trailing slash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrailingSlash {
    /// Always drop it (`/a/` → `/a`)
    #[default]
    Never,
    /// Always add it (`/a` → `/a/`)
    Always,
    /// Keep whatever the target asked for
    Preserve,
}

/// Collapse runs of `/` into a single slash
///
/// **Pure function** returning `Cow::Borrowed` when there is nothing to collapse.
///
/// # Examples
///
/// ```
/// use trailhead_router::path::clean_path;
/// use std::borrow::Cow;
///
/// assert!(matches!(clean_path("/a/b"), Cow::Borrowed("/a/b")));
/// assert_eq!(clean_path("//a///b/"), "/a/b/");
/// ```
pub fn clean_path(path: &str) -> Cow<'_, str> {
    if !path.contains("//") {
        return Cow::Borrowed(path);
    }

    let mut cleaned = String::with_capacity(path.len());
    let mut previous_slash = false;
    for c in path.chars() {
        if c == '/' {
            if previous_slash {
                continue;
            }
            previous_slash = true;
        } else {
            previous_slash = false;
        }
        cleaned.push(c);
    }
    Cow::Owned(cleaned)
}

/// Join path parts with `/` and clean duplicate slashes
///
/// # Examples
///
/// ```
/// use trailhead_router::path::join_paths;
///
/// assert_eq!(join_paths(["/", "posts", "1"]), "/posts/1");
/// assert_eq!(join_paths(["", "a/", "/b"]), "/a/b");
/// assert_eq!(join_paths([""]), "");
/// ```
pub fn join_paths<'a, I>(parts: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let joined = parts.into_iter().collect::<Vec<_>>().join("/");
    clean_path(&joined).into_owned()
}

/// Trim leading slashes, except for the root path itself
pub fn trim_path_left(path: &str) -> &str {
    if path == "/" {
        path
    } else {
        path.trim_start_matches('/')
    }
}

/// Trim trailing slashes, except for the root path itself
pub fn trim_path_right(path: &str) -> &str {
    if path == "/" {
        path
    } else {
        path.trim_end_matches('/')
    }
}

/// Trim both leading and trailing slashes
///
/// # Examples
///
/// ```
/// use trailhead_router::path::trim_path;
///
/// assert_eq!(trim_path("/posts/"), "posts");
/// assert_eq!(trim_path("/"), "/");
/// ```
pub fn trim_path(path: &str) -> &str {
    trim_path_right(trim_path_left(path))
}

/// Drop one trailing slash unless `value` is the root or the basepath root
pub fn remove_trailing_slash<'a>(value: &'a str, basepath: &str) -> &'a str {
    let basepath_root = format!("{}/", basepath);
    if value.ends_with('/') && value != "/" && value != basepath_root {
        &value[..value.len() - 1]
    } else {
        value
    }
}

/// Compare two pathnames, ignoring a trailing slash on either side
///
/// # Examples
///
/// ```
/// use trailhead_router::path::exact_path_test;
///
/// assert!(exact_path_test("/sample/path1", "/sample/path1/", "/"));
/// assert!(!exact_path_test("/sample/path1/some", "/sample/path1", "/"));
/// ```
pub fn exact_path_test(a: &str, b: &str, basepath: &str) -> bool {
    remove_trailing_slash(a, basepath) == remove_trailing_slash(b, basepath)
}

/// Resolve `to` against `base`
///
/// Every base is treated as a directory, so `./x` appends under it and each
/// `..` pops exactly one segment (never past the root). A `to` starting with
/// `/` restarts at the root. Anything else is relative, as if prefixed
/// with `./`.
///
/// # Examples
///
/// ```
/// use trailhead_router::path::{resolve_path, TrailingSlash};
///
/// let never = TrailingSlash::Never;
/// assert_eq!(resolve_path("/posts/1/comments", "..", never), "/posts/1");
/// assert_eq!(resolve_path("/posts/1/comments", "../..", never), "/posts");
/// assert_eq!(resolve_path("/posts/1/comments", "./1", never), "/posts/1/comments/1");
/// assert_eq!(resolve_path("/a/b/c", "../../d", never), "/a/d");
/// assert_eq!(resolve_path("/a/b/c", "/d/", never), "/d");
/// assert_eq!(resolve_path("/a/b/c", "d/", TrailingSlash::Preserve), "/a/b/c/d/");
/// ```
pub fn resolve_path(base: &str, to: &str, trailing_slash: TrailingSlash) -> String {
    let to = clean_path(to);

    let (mut segments, relative): (Vec<&str>, &str) = match to.strip_prefix('/') {
        Some(rest) => (vec![""], rest),
        None => {
            let mut segments: Vec<&str> = base.split('/').collect();
            if segments.len() > 1 && segments.last() == Some(&"") {
                segments.pop();
            }
            (segments, &*to)
        }
    };

    for value in relative.split('/') {
        match value {
            ".." => {
                if segments.len() > 1 {
                    segments.pop();
                }
            }
            "." => {}
            value => segments.push(value),
        }
    }

    if segments.len() > 1 {
        if segments.last() == Some(&"") {
            if trailing_slash == TrailingSlash::Never {
                segments.pop();
            }
        } else if trailing_slash == TrailingSlash::Always {
            segments.push("");
        }
    }

    let normalized: Vec<Cow<'_, str>> = segments
        .iter()
        .map(|segment| segment::normalize_placeholder(segment))
        .collect();
    let joined = join_paths(normalized.iter().map(|s| &**s));

    if joined.is_empty() {
        "/".to_string()
    } else {
        joined
    }
}

/// Percent-decode a path segment, keeping the raw text if it is not valid UTF-8
pub fn decode_segment(value: &str) -> Cow<'_, str> {
    if !value.contains('%') {
        return Cow::Borrowed(value);
    }
    match urlencoding::decode(value) {
        Ok(decoded) => Cow::Owned(decoded.into_owned()),
        Err(_) => Cow::Borrowed(value),
    }
}
