/// Specificity scoring and ordering for flat routes
///
/// Each route's full path is scored segment by segment; the flat list is
/// then sorted so the most specific pattern is tried first.
use crate::path::segment::{parse_pathname, Segment, SegmentKind};
use crate::path::trim_path_left;
use std::cmp::Ordering;

const SLASH_SCORE: f64 = 0.75;
const STATIC_SEGMENT_SCORE: f64 = 1.0;
const REQUIRED_PARAM_BASE_SCORE: f64 = 0.5;
const OPTIONAL_PARAM_BASE_SCORE: f64 = 0.4;
const WILDCARD_PARAM_BASE_SCORE: f64 = 0.25;
const STATIC_AFTER_DYNAMIC_BONUS_SCORE: f64 = 0.2;
const BOTH_PRESENCE_BASE_SCORE: f64 = 0.05;
const PREFIX_PRESENCE_BASE_SCORE: f64 = 0.02;
const SUFFIX_PRESENCE_BASE_SCORE: f64 = 0.01;
const PREFIX_LENGTH_SCORE_MULTIPLIER: f64 = 0.0002;
const SUFFIX_LENGTH_SCORE_MULTIPLIER: f64 = 0.0001;

/// Ranking key of one route
#[derive(Debug, Clone, PartialEq)]
pub struct RouteScore {
    pub scores: Vec<f64>,
    pub parsed: Vec<Segment>,
    pub optional_param_count: usize,
    pub has_static_after: bool,
    /// Declaration order in the source tree
    pub index: usize,
}

impl RouteScore {
    /// Score a route by its full path
    ///
    /// # Examples
    ///
    /// ```
    /// use trailhead_router::route::rank::RouteScore;
    ///
    /// let score = RouteScore::new("/users/$id", 0);
    /// assert_eq!(score.scores, vec![1.0, 0.5]);
    ///
    /// let score = RouteScore::new("/posts/{-$slug}/edit", 1);
    /// assert_eq!(score.optional_param_count, 1);
    /// assert!(score.has_static_after);
    /// ```
    pub fn new(full_path: &str, index: usize) -> Self {
        let mut parsed = parse_pathname(trim_path_left(full_path));

        let mut skip = 0;
        while parsed.len() > skip + 1 && parsed[skip].is_slash() {
            skip += 1;
        }
        parsed.drain(..skip);

        let mut optional_param_count = 0;
        let mut has_static_after = false;

        let scores = parsed
            .iter()
            .enumerate()
            .map(|(i, segment)| {
                if segment.is_slash() {
                    return SLASH_SCORE;
                }

                let base_score = match segment.kind {
                    SegmentKind::Static => return STATIC_SEGMENT_SCORE,
                    SegmentKind::Param => REQUIRED_PARAM_BASE_SCORE,
                    SegmentKind::OptionalParam => {
                        optional_param_count += 1;
                        OPTIONAL_PARAM_BASE_SCORE
                    }
                    SegmentKind::Wildcard => WILDCARD_PARAM_BASE_SCORE,
                };

                // Ordering only; matching ignores this bonus
                let static_after = parsed[i + 1..]
                    .iter()
                    .any(|next| next.kind == SegmentKind::Static && !next.is_slash());

                if static_after {
                    has_static_after = true;
                    param_score(segment, base_score + STATIC_AFTER_DYNAMIC_BONUS_SCORE)
                } else {
                    param_score(segment, base_score)
                }
            })
            .collect();

        Self {
            scores,
            parsed,
            optional_param_count,
            has_static_after,
            index,
        }
    }
}

fn param_score(segment: &Segment, base_score: f64) -> f64 {
    let prefix_len = segment.prefix.as_ref().map_or(0, |p| p.chars().count()) as f64;
    let suffix_len = segment.suffix.as_ref().map_or(0, |s| s.chars().count()) as f64;

    match (&segment.prefix, &segment.suffix) {
        (Some(_), Some(_)) => {
            base_score
                + BOTH_PRESENCE_BASE_SCORE
                + PREFIX_LENGTH_SCORE_MULTIPLIER * prefix_len
                + SUFFIX_LENGTH_SCORE_MULTIPLIER * suffix_len
        }
        (Some(_), None) => {
            base_score + PREFIX_PRESENCE_BASE_SCORE + PREFIX_LENGTH_SCORE_MULTIPLIER * prefix_len
        }
        (None, Some(_)) => {
            base_score + SUFFIX_PRESENCE_BASE_SCORE + SUFFIX_LENGTH_SCORE_MULTIPLIER * suffix_len
        }
        (None, None) => base_score,
    }
}

/// Order two routes; `Less` means `a` is tried first
pub fn compare_routes(a: &RouteScore, b: &RouteScore) -> Ordering {
    let min_length = a.scores.len().min(b.scores.len());

    for i in 0..min_length {
        if a.scores[i] != b.scores[i] {
            return b.scores[i].partial_cmp(&a.scores[i]).unwrap_or(Ordering::Equal);
        }
    }

    if a.scores.len() != b.scores.len() {
        if a.optional_param_count != b.optional_param_count {
            match (a.has_static_after, b.has_static_after) {
                (x, y) if x == y => {
                    return a.optional_param_count.cmp(&b.optional_param_count);
                }
                (true, false) => return Ordering::Less,
                _ => return Ordering::Greater,
            }
        }
        return b.scores.len().cmp(&a.scores.len());
    }

    if a.optional_param_count != b.optional_param_count {
        return a.optional_param_count.cmp(&b.optional_param_count);
    }

    for i in 0..min_length {
        if a.parsed[i].value != b.parsed[i].value {
            return a.parsed[i].value.cmp(&b.parsed[i].value);
        }
    }

    a.index.cmp(&b.index)
}

/// Stable merge sort by [`compare_routes`]
///
/// The optional-param rule is not strictly transitive across mixed
/// shapes, so this never relies on the comparator being a total order.
pub fn sort_by_rank<T>(items: Vec<(T, RouteScore)>) -> Vec<T> {
    merge_sort(items).into_iter().map(|(item, _)| item).collect()
}

fn merge_sort<T>(mut items: Vec<(T, RouteScore)>) -> Vec<(T, RouteScore)> {
    if items.len() <= 1 {
        return items;
    }

    let right = items.split_off(items.len() / 2);
    let left = merge_sort(items);
    let right = merge_sort(right);

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();

    loop {
        let take_left = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => compare_routes(&l.1, &r.1) != Ordering::Greater,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let next = if take_left { left.next() } else { right.next() };
        merged.extend(next);
    }

    merged
}
