/// Structural sharing helpers
///
/// A rebuilt value that equals the previous one keeps the previous `Arc`,
/// so consumers can detect "nothing changed" with [`Arc::ptr_eq`].
use serde_json::{Map, Value};
use std::sync::Arc;

/// Reuse `previous` when `next` is equal to it
///
/// # Examples
///
/// ```
/// use trailhead_router::sharing::replace_equal;
/// use std::sync::Arc;
///
/// let previous = Arc::new(vec![1, 2]);
/// assert!(Arc::ptr_eq(&previous, &replace_equal(Some(&previous), vec![1, 2])));
/// assert!(!Arc::ptr_eq(&previous, &replace_equal(Some(&previous), vec![3])));
/// ```
pub fn replace_equal<T: PartialEq>(previous: Option<&Arc<T>>, next: T) -> Arc<T> {
    match previous {
        Some(previous) if **previous == next => Arc::clone(previous),
        _ => Arc::new(next),
    }
}

/// Like [`replace_equal`] for a value that is already shared
pub fn replace_equal_arc<T: PartialEq>(previous: Option<&Arc<T>>, next: Arc<T>) -> Arc<T> {
    match previous {
        Some(previous) if Arc::ptr_eq(previous, &next) || **previous == *next => Arc::clone(previous),
        _ => next,
    }
}

/// Every key of `expected` is present in `actual` with a deep-equal value
///
/// Nested objects are compared partially as well; arrays must be equal.
pub fn partial_deep_equal(actual: &Map<String, Value>, expected: &Map<String, Value>) -> bool {
    expected.iter().all(|(key, expected)| match (actual.get(key), expected) {
        (Some(Value::Object(actual)), Value::Object(expected)) => partial_deep_equal(actual, expected),
        (Some(actual), expected) => actual == expected,
        (None, Value::Null) => true,
        (None, _) => false,
    })
}
