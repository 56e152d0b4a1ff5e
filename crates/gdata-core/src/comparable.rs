//! Ordering for Atom elements whose identity is a subset of their fields.
//!
//! Authors are identified by name and categories by term, so two values can
//! compare equal while differing in optional fields. That makes `Ord` the
//! wrong tool; [`Comparable`] expresses the weaker relation instead.

use std::cmp::Ordering;

/// A partial identity comparison between values of the same type.
pub trait Comparable {
    /// Compares the identifying fields of two values.
    fn compare_with(&self, other: &Self) -> Ordering;
}

/// Compares two optional values; `None` sorts before any value.
pub fn compare<T: Comparable>(a: Option<&T>, b: Option<&T>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) if std::ptr::eq(a, b) => Ordering::Equal,
        (Some(a), Some(b)) => a.compare_with(b),
    }
}

/// Appends `value` unless an item comparing equal is already present.
///
/// Returns true if the value was added.
pub fn push_unique<T: Comparable>(items: &mut Vec<T>, value: T) -> bool {
    if items
        .iter()
        .any(|item| item.compare_with(&value) == Ordering::Equal)
    {
        return false;
    }
    items.push(value);
    true
}
