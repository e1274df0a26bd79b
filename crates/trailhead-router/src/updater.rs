//! Literal / preserve / reducer instructions for navigation inputs

use std::fmt;
use std::sync::Arc;

/// How to derive the next value of a navigation input from the previous one.
///
/// Every param/search/hash/state instruction is one of these; an input that
/// is not mentioned at all is represented by `Option::None` at the call site.
///
/// # Examples
///
/// ```
/// use trailhead_router::Updater;
///
/// let bump = Updater::reduce(|n: &i32| n + 1);
/// assert_eq!(bump.apply(&1), 2);
/// assert_eq!(Updater::Preserve.apply(&7), 7);
/// assert_eq!(Updater::Literal(3).apply(&7), 3);
/// ```
pub enum Updater<T> {
    Literal(T),
    /// Keep the current value (`true` in link props)
    Preserve,
    Reducer(Arc<dyn Fn(&T) -> T + Send + Sync>),
}

impl<T> Updater<T> {
    pub fn reduce<F>(f: F) -> Self
    where
        F: Fn(&T) -> T + Send + Sync + 'static,
    {
        Updater::Reducer(Arc::new(f))
    }

    pub fn is_preserve(&self) -> bool {
        matches!(self, Updater::Preserve)
    }
}

impl<T: Clone> Updater<T> {
    pub fn apply(&self, previous: &T) -> T {
        match self {
            Updater::Literal(value) => value.clone(),
            Updater::Preserve => previous.clone(),
            Updater::Reducer(f) => f(previous),
        }
    }
}

impl<T> Clone for Updater<T>
where
    T: Clone,
{
    fn clone(&self) -> Self {
        match self {
            Updater::Literal(value) => Updater::Literal(value.clone()),
            Updater::Preserve => Updater::Preserve,
            Updater::Reducer(f) => Updater::Reducer(Arc::clone(f)),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Updater<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Updater::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            Updater::Preserve => write!(f, "Preserve"),
            Updater::Reducer(_) => write!(f, "Reducer(..)"),
        }
    }
}

impl<T> From<T> for Updater<T> {
    fn from(value: T) -> Self {
        Updater::Literal(value)
    }
}

/// Apply an optional instruction, returning `absent` when there is none
pub(crate) fn apply_or<T: Clone>(updater: Option<&Updater<T>>, previous: &T, absent: T) -> T {
    match updater {
        Some(updater) => updater.apply(previous),
        None => absent,
    }
}
