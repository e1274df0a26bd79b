/// Segment parsing for path patterns and concrete pathnames
///
/// A path string is split on `/` into typed [`Segment`]s. The same parser
/// serves route patterns (`/posts/$postId`) and concrete pathnames
/// (`/posts/123`); a concrete pathname simply never produces dynamic kinds
/// unless it literally contains `$`.
use crate::error::TreeError;
use crate::path::{clean_path, decode_segment};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use std::borrow::Cow;
use std::sync::Arc;

/// `prefix{$}suffix`
static WILDCARD_W_BRACES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*?)\{\$\}(.*)$").expect("valid wildcard regex"));

/// `prefix{-$name}suffix`
static OPTIONAL_PARAM_W_BRACES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.*?)\{-(\$[a-zA-Z_$][a-zA-Z0-9_$]*)\}(.*)$").expect("valid optional regex")
});

/// `prefix{$name}suffix`
static PARAM_W_BRACES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.*?)\{(\$[a-zA-Z_$][a-zA-Z0-9_$]*)\}(.*)$").expect("valid param regex")
});

/// `$name`
static PARAM: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\$.+$").expect("valid bare param regex"));

/// Kind of a parsed segment, ordered from most to least literal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    /// Literal text, including the `/` root and trailing markers
    Static,
    /// `$name` or `prefix{$name}suffix`
    Param,
    /// `{-$name}`, may be absent from a concrete path
    OptionalParam,
    /// `$` or `prefix{$}suffix`, captures the rest of the path
    Wildcard,
}

/// One token of a parsed path.
///
/// `value` holds the decoded literal for static segments, `$name` for
/// params and `$` for wildcards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Segment {
    pub kind: SegmentKind,
    pub value: String,
    pub prefix: Option<String>,
    pub suffix: Option<String>,
}

impl Segment {
    pub fn literal(value: impl Into<String>) -> Self {
        Self {
            kind: SegmentKind::Static,
            value: value.into(),
            prefix: None,
            suffix: None,
        }
    }

    /// The `/` marker used for the root and for trailing slashes
    pub fn slash() -> Self {
        Self::literal("/")
    }

    pub fn is_slash(&self) -> bool {
        self.kind == SegmentKind::Static && self.value == "/"
    }

    pub fn is_dynamic(&self) -> bool {
        self.kind != SegmentKind::Static
    }

    pub fn has_affix(&self) -> bool {
        self.prefix.is_some() || self.suffix.is_some()
    }

    /// Param name without the leading `$`; `None` for static segments and wildcards
    pub fn param_name(&self) -> Option<&str> {
        match self.kind {
            SegmentKind::Param | SegmentKind::OptionalParam => {
                Some(self.value.strip_prefix('$').unwrap_or(&self.value))
            }
            _ => None,
        }
    }

    fn dynamic(kind: SegmentKind, value: &str, prefix: &str, suffix: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
            prefix: (!prefix.is_empty()).then(|| prefix.to_string()),
            suffix: (!suffix.is_empty()).then(|| suffix.to_string()),
        }
    }
}

/// Classifies one `/`-free part of a path
///
/// **Pure function**. Checks run in order: braced wildcard, optional param,
/// braced param, bare param, bare wildcard, then static.
///
/// # Examples
///
/// ```
/// use trailhead_router::path::segment::{classify_segment, SegmentKind};
///
/// assert_eq!(classify_segment("about").kind, SegmentKind::Static);
/// assert_eq!(classify_segment("$id").kind, SegmentKind::Param);
/// assert_eq!(classify_segment("{-$slug}").kind, SegmentKind::OptionalParam);
/// assert_eq!(classify_segment("$").kind, SegmentKind::Wildcard);
///
/// let seg = classify_segment("user-{$id}.json");
/// assert_eq!(seg.value, "$id");
/// assert_eq!(seg.prefix.as_deref(), Some("user-"));
/// assert_eq!(seg.suffix.as_deref(), Some(".json"));
/// ```
pub fn classify_segment(part: &str) -> Segment {
    if let Some(caps) = WILDCARD_W_BRACES.captures(part) {
        return Segment::dynamic(SegmentKind::Wildcard, "$", &caps[1], &caps[2]);
    }

    if let Some(caps) = OPTIONAL_PARAM_W_BRACES.captures(part) {
        return Segment::dynamic(SegmentKind::OptionalParam, &caps[2], &caps[1], &caps[3]);
    }

    if let Some(caps) = PARAM_W_BRACES.captures(part) {
        return Segment::dynamic(SegmentKind::Param, &caps[2], &caps[1], &caps[3]);
    }

    if part == "$" {
        return Segment::dynamic(SegmentKind::Wildcard, "$", "", "");
    }

    if PARAM.is_match(part) {
        return Segment::dynamic(SegmentKind::Param, part, "", "");
    }

    Segment::literal(decode_segment(part))
}

/// Parse a path into segments
///
/// **Pure function**. A leading `/` yields a root `/` segment, a trailing
/// `/` yields a trailing one; empty parts in between are dropped.
///
/// # Examples
///
/// ```
/// use trailhead_router::path::parse_pathname;
///
/// let values: Vec<String> = parse_pathname("/posts/$postId/")
///     .into_iter()
///     .map(|s| s.value)
///     .collect();
/// assert_eq!(values, vec!["/", "posts", "$postId", "/"]);
/// ```
pub fn parse_pathname(pathname: &str) -> Vec<Segment> {
    let cleaned = clean_path(pathname);
    let mut rest: &str = &cleaned;
    let mut segments = Vec::new();

    if let Some(stripped) = rest.strip_prefix('/') {
        segments.push(Segment::slash());
        rest = stripped;
    }

    if rest.is_empty() {
        return segments;
    }

    segments.extend(
        rest.split('/')
            .filter(|part| !part.is_empty())
            .map(classify_segment),
    );

    if rest.ends_with('/') {
        segments.push(Segment::slash());
    }

    segments
}

/// Parse a route pattern, rejecting malformed brace syntax
///
/// Braces must balance within each part and must form one of the
/// recognized placeholders (`{$name}`, `{-$name}`, `{$}`).
pub fn parse_route_path(path: &str) -> Result<Vec<Segment>, TreeError> {
    for part in path.split('/') {
        validate_part(path, part)?;
    }
    Ok(parse_pathname(path))
}

fn validate_part(path: &str, part: &str) -> Result<(), TreeError> {
    let opens = part.matches('{').count();
    let closes = part.matches('}').count();

    if opens != closes {
        return Err(TreeError::MalformedPattern {
            path: path.to_string(),
            reason: format!("unbalanced braces in segment `{}`", part),
        });
    }

    if opens == 0 {
        return Ok(());
    }

    let segment = classify_segment(part);
    if segment.kind == SegmentKind::Static || opens > 1 {
        return Err(TreeError::MalformedPattern {
            path: path.to_string(),
            reason: format!("unrecognized placeholder in segment `{}`", part),
        });
    }

    Ok(())
}

/// Rewrite a braced placeholder without affixes to its bare form
///
/// `{$id}` → `$id` and `{$}` → `$`; anything else is returned unchanged.
pub fn normalize_placeholder(part: &str) -> Cow<'_, str> {
    if !part.starts_with('{') || !part.ends_with('}') {
        return Cow::Borrowed(part);
    }

    let segment = classify_segment(part);
    match segment.kind {
        SegmentKind::Param | SegmentKind::Wildcard if !segment.has_affix() => {
            Cow::Owned(segment.value)
        }
        _ => Cow::Borrowed(part),
    }
}

/// Bounded cache of parsed pathnames
///
/// Evicts the least recently used entry once `capacity` is exceeded.
pub struct ParseCache {
    capacity: usize,
    entries: Mutex<IndexMap<String, Arc<[Segment]>>>,
}

impl ParseCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(IndexMap::new()),
        }
    }

    /// Parse `pathname`, reusing a cached result when present
    pub fn parse(&self, pathname: &str) -> Arc<[Segment]> {
        let mut entries = self.entries.lock();

        if let Some(segments) = entries.shift_remove(pathname) {
            entries.insert(pathname.to_string(), segments.clone());
            return segments;
        }

        let segments: Arc<[Segment]> = parse_pathname(pathname).into();
        entries.insert(pathname.to_string(), segments.clone());
        if entries.len() > self.capacity {
            entries.shift_remove_index(0);
        }
        segments
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ParseCache {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl std::fmt::Debug for ParseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParseCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(path: &str) -> Vec<(SegmentKind, String)> {
        parse_pathname(path)
            .into_iter()
            .map(|s| (s.kind, s.value))
            .collect()
    }

    #[test]
    fn test_parse_root() {
        assert_eq!(kinds("/"), vec![(SegmentKind::Static, "/".to_string())]);
        assert!(parse_pathname("").is_empty());
    }

    #[test]
    fn test_parse_mixed_pattern() {
        assert_eq!(
            kinds("/files/$/x/{-$opt}/$id"),
            vec![
                (SegmentKind::Static, "/".to_string()),
                (SegmentKind::Static, "files".to_string()),
                (SegmentKind::Wildcard, "$".to_string()),
                (SegmentKind::Static, "x".to_string()),
                (SegmentKind::OptionalParam, "$opt".to_string()),
                (SegmentKind::Param, "$id".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_collapses_double_slashes() {
        assert_eq!(kinds("//a//b"), kinds("/a/b"));
    }

    #[test]
    fn test_parse_trailing_slash_marker() {
        let segments = parse_pathname("/a/");
        assert_eq!(segments.len(), 3);
        assert!(segments[2].is_slash());
    }

    #[test]
    fn test_static_segments_are_decoded() {
        let segments = parse_pathname("/caf%C3%A9");
        assert_eq!(segments[1].value, "café");
    }

    #[test]
    fn test_affixed_wildcard_and_optional() {
        let wildcard = classify_segment("pre{$}.txt");
        assert_eq!(wildcard.kind, SegmentKind::Wildcard);
        assert_eq!(wildcard.prefix.as_deref(), Some("pre"));
        assert_eq!(wildcard.suffix.as_deref(), Some(".txt"));

        let optional = classify_segment("v{-$version}");
        assert_eq!(optional.kind, SegmentKind::OptionalParam);
        assert_eq!(optional.param_name(), Some("version"));
        assert_eq!(optional.prefix.as_deref(), Some("v"));
        assert_eq!(optional.suffix, None);
    }

    #[test]
    fn test_route_path_rejects_unbalanced_braces() {
        let err = parse_route_path("/posts/{$id").unwrap_err();
        assert!(matches!(err, TreeError::MalformedPattern { .. }));

        let err = parse_route_path("/posts/{id}").unwrap_err();
        assert!(matches!(err, TreeError::MalformedPattern { .. }));

        let err = parse_route_path("/posts/{$a}{$b}").unwrap_err();
        assert!(matches!(err, TreeError::MalformedPattern { .. }));

        assert!(parse_route_path("/posts/user-{$id}").is_ok());
    }

    #[test]
    fn test_normalize_placeholder() {
        assert_eq!(normalize_placeholder("{$id}"), "$id");
        assert_eq!(normalize_placeholder("{$}"), "$");
        assert_eq!(normalize_placeholder("{-$id}"), "{-$id}");
        assert_eq!(normalize_placeholder("a{$id}"), "a{$id}");
        assert_eq!(normalize_placeholder("plain"), "plain");
    }

    #[test]
    fn test_parse_cache_evicts_least_recent() {
        let cache = ParseCache::new(2);
        cache.parse("/a");
        cache.parse("/b");
        cache.parse("/a");
        cache.parse("/c");

        assert_eq!(cache.len(), 2);
        let entries = cache.entries.lock();
        assert!(entries.contains_key("/a"));
        assert!(entries.contains_key("/c"));
        assert!(!entries.contains_key("/b"));
    }
}
