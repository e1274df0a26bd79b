/// Segment-wise matching of a concrete pathname against a route pattern
///
/// All functions are **pure**. A match yields the raw (still string) param
/// captures; parsing them into typed values is the match engine's job.
use crate::path::join_paths;
use crate::path::segment::{parse_pathname, Segment, SegmentKind};
use indexmap::IndexMap;
use std::borrow::Cow;

/// Raw string captures keyed by param name, in capture order
pub type RawParams = IndexMap<String, String>;

/// Key holding the remainder of a fuzzy (prefix) match
pub const FUZZY_KEY: &str = "**";
/// Key holding a wildcard capture
pub const SPLAT_KEY: &str = "_splat";
/// Legacy alias of [`SPLAT_KEY`]
pub const STAR_KEY: &str = "*";

/// Options for [`match_by_path`]
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchOptions<'a> {
    /// Route pattern to test against
    pub to: &'a str,
    /// Allow the pattern to be a strict prefix of the pathname
    pub fuzzy: bool,
    pub case_sensitive: bool,
}

impl<'a> MatchOptions<'a> {
    pub fn new(to: &'a str) -> Self {
        Self {
            to,
            fuzzy: false,
            case_sensitive: false,
        }
    }

    pub fn with_fuzzy(mut self, fuzzy: bool) -> Self {
        self.fuzzy = fuzzy;
        self
    }

    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }
}

/// Match `pathname` against the pattern in `options.to`
///
/// Returns `Some(params)` on a match (an empty map when the pattern has no
/// params) and `None` otherwise.
///
/// # Examples
///
/// ```
/// use trailhead_router::path::{match_by_path, MatchOptions};
///
/// let params = match_by_path("/posts/123", MatchOptions::new("/posts/$postId")).unwrap();
/// assert_eq!(params["postId"], "123");
///
/// assert!(match_by_path("/about", MatchOptions::new("/about")).unwrap().is_empty());
/// assert!(match_by_path("/about", MatchOptions::new("/contact")).is_none());
/// ```
pub fn match_by_path(pathname: &str, options: MatchOptions<'_>) -> Option<RawParams> {
    let base = parse_pathname(&with_leading_slash(pathname));
    let route = parse_pathname(&with_leading_slash(options.to));
    match_segments(&base, &route, options.fuzzy, options.case_sensitive)
}

/// Like [`match_by_path`], but an empty pattern matches everything
pub fn match_pathname(pathname: &str, options: MatchOptions<'_>) -> Option<RawParams> {
    if options.to.is_empty() {
        return Some(RawParams::new());
    }
    match_by_path(pathname, options)
}

fn with_leading_slash(path: &str) -> Cow<'_, str> {
    if path.starts_with('/') {
        Cow::Borrowed(path)
    } else {
        Cow::Owned(format!("/{}", path))
    }
}

/// Match pre-parsed pathname segments against pre-parsed route segments
pub fn match_segments(
    base: &[Segment],
    route: &[Segment],
    fuzzy: bool,
    case_sensitive: bool,
) -> Option<RawParams> {
    let mut params = RawParams::new();
    let mut base_index = 0;
    let mut route_index = 0;

    while base_index < base.len() || route_index < route.len() {
        let base_segment = base.get(base_index);

        let Some(route_segment) = route.get(route_index) else {
            // Pattern exhausted with pathname left over
            let rest: Vec<&str> = base[base_index..].iter().map(|s| s.value.as_str()).collect();
            params.insert(FUZZY_KEY.to_string(), join_paths(rest));
            let ends_with_slash = route.last().is_some_and(|s| s.value == "/");
            return (fuzzy && !ends_with_slash).then_some(params);
        };

        match route_segment.kind {
            SegmentKind::Wildcard => {
                let splat = capture_splat(&base[base_index..], base.last(), route_segment)?;
                params.insert(STAR_KEY.to_string(), splat.clone());
                params.insert(SPLAT_KEY.to_string(), splat);
                return Some(params);
            }

            SegmentKind::Static => {
                if route_segment.value == "/" && base_segment.map_or(true, |s| s.value.is_empty()) {
                    route_index += 1;
                    continue;
                }

                let base_segment = base_segment?;
                let equal = if case_sensitive {
                    route_segment.value == base_segment.value
                } else {
                    route_segment.value.to_lowercase() == base_segment.value.to_lowercase()
                };
                if !equal {
                    return None;
                }
                base_index += 1;
                route_index += 1;
            }

            SegmentKind::Param => {
                let base_segment = base_segment?;
                if base_segment.is_slash() {
                    return None;
                }
                let value = strip_affixes(&base_segment.value, route_segment)?;
                insert_param(&mut params, route_segment, value);
                base_index += 1;
                route_index += 1;
            }

            SegmentKind::OptionalParam => {
                let Some(base_segment) = base_segment else {
                    route_index += 1;
                    continue;
                };
                if base_segment.is_slash() {
                    route_index += 1;
                    continue;
                }

                let captured = if route_segment.has_affix() {
                    strip_affixes(&base_segment.value, route_segment)
                } else if optional_should_bind(base, route, route_index, base_segment) {
                    Some(base_segment.value.clone())
                } else {
                    None
                };

                if let Some(value) = captured {
                    insert_param(&mut params, route_segment, value);
                    base_index += 1;
                }
                route_index += 1;
            }
        }
    }

    Some(params)
}

fn insert_param(params: &mut RawParams, segment: &Segment, value: String) {
    if let Some(name) = segment.param_name() {
        // Repeated names: last capture wins, at the original position.
        params.insert(name.to_string(), value);
    }
}

/// Strip a param's literal prefix/suffix from a concrete segment value
fn strip_affixes(value: &str, segment: &Segment) -> Option<String> {
    let prefix = segment.prefix.as_deref().unwrap_or("");
    let suffix = segment.suffix.as_deref().unwrap_or("");

    if !value.starts_with(prefix) || !value.ends_with(suffix) {
        return None;
    }

    let mut stripped = &value[prefix.len()..];
    if !suffix.is_empty() {
        if let Some(rest) = stripped.strip_suffix(suffix) {
            stripped = rest;
        }
    }
    Some(stripped.to_string())
}

/// Decide whether a bare optional param should consume the current segment
///
/// It must not if a later static segment of the pattern is exactly this
/// value, or if a later required param/wildcard would run out of segments.
fn optional_should_bind(
    base: &[Segment],
    route: &[Segment],
    route_index: usize,
    base_segment: &Segment,
) -> bool {
    for future in &route[route_index + 1..] {
        if future.kind == SegmentKind::Static && future.value == base_segment.value {
            return false;
        }
        if matches!(future.kind, SegmentKind::Param | SegmentKind::Wildcard) {
            return base.len() >= route.len();
        }
    }
    true
}

fn capture_splat(remaining: &[Segment], last: Option<&Segment>, segment: &Segment) -> Option<String> {
    let joined = join_paths(remaining.iter().map(|s| s.value.as_str()));

    if !segment.has_affix() {
        return Some(joined);
    }

    let first = remaining.first()?;
    let prefix = segment.prefix.as_deref().unwrap_or("");
    let suffix = segment.suffix.as_deref().unwrap_or("");

    if !first.value.starts_with(prefix) {
        return None;
    }
    if !last.is_some_and(|s| s.value.ends_with(suffix)) {
        return None;
    }

    let mut splat = joined.as_str();
    if !prefix.is_empty() {
        splat = splat.strip_prefix(prefix).unwrap_or(splat);
    }
    if !suffix.is_empty() {
        splat = splat.strip_suffix(suffix).unwrap_or(splat);
    }
    Some(splat.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn params(pairs: &[(&str, &str)]) -> Option<RawParams> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn exact(path: &str, pattern: &str) -> Option<RawParams> {
        match_by_path(path, MatchOptions::new(pattern).with_case_sensitive(true))
    }

    fn fuzzy(path: &str, pattern: &str) -> Option<RawParams> {
        match_by_path(
            path,
            MatchOptions::new(pattern).with_case_sensitive(true).with_fuzzy(true),
        )
    }

    #[rstest]
    #[case("", "", params(&[]))]
    #[case("/", "", params(&[]))]
    #[case("", "/", params(&[]))]
    #[case("/a", "/a", params(&[]))]
    #[case("/a/b", "/a/b", params(&[]))]
    #[case("/a", "/a/", params(&[]))]
    #[case("/a/", "/a/", params(&[]))]
    #[case("/a/", "/a", None)]
    #[case("/b", "/a", None)]
    fn test_static(#[case] path: &str, #[case] pattern: &str, #[case] expected: Option<RawParams>) {
        assert_eq!(exact(path, pattern), expected);
    }

    #[rstest]
    #[case("/a/1", "/a/$id", params(&[("id", "1")]))]
    #[case("/a/1/b", "/a/$id/b", params(&[("id", "1")]))]
    #[case("/a/1/b/2", "/a/$id/b/$other", params(&[("id", "1"), ("other", "2")]))]
    #[case("/a/1_/b/2", "/a/$id/b/$other", params(&[("id", "1_"), ("other", "2")]))]
    #[case("/a/1/b/2", "/a/$id/b/$id", params(&[("id", "2")]))]
    #[case("/a", "/a/$id", None)]
    fn test_params(#[case] path: &str, #[case] pattern: &str, #[case] expected: Option<RawParams>) {
        assert_eq!(exact(path, pattern), expected);
    }

    #[rstest]
    #[case("/a/1", "/a/{-$id}", params(&[("id", "1")]))]
    #[case("/a", "/a/{-$id}", params(&[]))]
    #[case("/a/1/b", "/a/{-$id}/b", params(&[("id", "1")]))]
    #[case("/a/b", "/a/{-$id}/b", params(&[]))]
    #[case("/a/1/b/2", "/a/{-$id}/b/{-$other}", params(&[("id", "1"), ("other", "2")]))]
    #[case("/a/b/2", "/a/{-$id}/b/{-$other}", params(&[("other", "2")]))]
    #[case("/a/1/b", "/a/{-$id}/b/{-$other}", params(&[("id", "1")]))]
    #[case("/a/b", "/a/{-$id}/b/{-$other}", params(&[]))]
    #[case("/a/1/b/2", "/a/{-$id}/b/{-$id}", params(&[("id", "2")]))]
    fn test_optional(#[case] path: &str, #[case] pattern: &str, #[case] expected: Option<RawParams>) {
        assert_eq!(exact(path, pattern), expected);
    }

    #[rstest]
    #[case("/a/b/c", "/a/$", params(&[("*", "b/c"), ("_splat", "b/c")]))]
    #[case("/a", "/a/$", params(&[("*", ""), ("_splat", "")]))]
    #[case("/a/b/c", "/a/$/foo", params(&[("*", "b/c"), ("_splat", "b/c")]))]
    #[case("/files/doc.txt", "/files/{$}.txt", params(&[("*", "doc"), ("_splat", "doc")]))]
    #[case("/files/doc.pdf", "/files/{$}.txt", None)]
    fn test_wildcard(#[case] path: &str, #[case] pattern: &str, #[case] expected: Option<RawParams>) {
        assert_eq!(exact(path, pattern), expected);
    }

    #[rstest]
    #[case("/a", "/A", params(&[]))]
    #[case("/a/1/b", "/A/$id/B", params(&[("id", "1")]))]
    #[case("/a/", "/A", None)]
    fn test_case_insensitive(#[case] path: &str, #[case] pattern: &str, #[case] expected: Option<RawParams>) {
        assert_eq!(match_by_path(path, MatchOptions::new(pattern)), expected);
    }

    #[test]
    fn test_case_sensitive_rejects_different_case() {
        assert_eq!(exact("/a", "/A"), None);
    }

    #[rstest]
    #[case("/a", "/a", params(&[]))]
    #[case("/a", "/a/", params(&[]))]
    #[case("/a/", "/a", params(&[("**", "/")]))]
    #[case("/a/b", "/a", params(&[("**", "b")]))]
    #[case("/a/b/", "/a", params(&[("**", "b/")]))]
    #[case("/a/b/c", "/a", params(&[("**", "b/c")]))]
    #[case("/a", "/a/b", None)]
    #[case("/a", "/b", None)]
    #[case("/a/1/b", "/a/$id", params(&[("id", "1"), ("**", "b")]))]
    #[case("/a/1/", "/a/$id/", params(&[("id", "1")]))]
    #[case("/a/1/b", "/a/{-$id}", params(&[("id", "1"), ("**", "b")]))]
    #[case("/a/b/c", "/a/{-$id}/b", params(&[("**", "c")]))]
    #[case("/a/b/2/d", "/a/{-$id}/b/{-$other}", params(&[("other", "2"), ("**", "d")]))]
    fn test_fuzzy(#[case] path: &str, #[case] pattern: &str, #[case] expected: Option<RawParams>) {
        assert_eq!(fuzzy(path, pattern), expected);
    }

    #[test]
    fn test_fuzzy_rejects_pattern_with_trailing_slash() {
        assert_eq!(fuzzy("/a/b", "/a/"), None);
    }

    #[rstest]
    #[case("/api/user-42", "/api/user-{$id}", params(&[("id", "42")]))]
    #[case("/api/42.json", "/api/{$id}.json", params(&[("id", "42")]))]
    #[case("/api/v1-x-end", "/api/v1-{$id}-end", params(&[("id", "x")]))]
    #[case("/api/42", "/api/user-{$id}", None)]
    #[case("/v2", "/v{-$version}", params(&[("version", "2")]))]
    fn test_affixes(#[case] path: &str, #[case] pattern: &str, #[case] expected: Option<RawParams>) {
        assert_eq!(exact(path, pattern), expected);
    }

    #[test]
    fn test_params_are_decoded() {
        let result = exact("/a/hello%20world", "/a/$id").unwrap();
        assert_eq!(result["id"], "hello world");
    }

    #[test]
    fn test_match_pathname_empty_pattern_matches() {
        assert_eq!(match_pathname("/anything", MatchOptions::new("")), params(&[]));
    }
}
