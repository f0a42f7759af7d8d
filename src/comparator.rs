//! CINDER - Key Comparators
//! Pluggable total orders over byte keys.
//!
//! The comparator that created a database must be used for every later
//! access. Its name is persisted in the manifest and checked on open.

use std::cmp::Ordering;
use std::fmt;

/// A named, strict total order over byte slices.
///
/// Implementations must be antisymmetric, transitive and stable across
/// process restarts for a given database.
pub trait Comparator: Send + Sync {
    /// Identity recorded with the database at creation.
    fn name(&self) -> &str;

    /// Three-way comparison of two keys.
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Default byte-lexicographic order.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytewiseComparator;

impl Comparator for BytewiseComparator {
    fn name(&self) -> &str {
        "cinder.BytewiseComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

type CompareFn = dyn Fn(&[u8], &[u8]) -> Ordering + Send + Sync;

/// User-supplied comparator built from a name and a closure.
///
/// ## Example
/// ```
/// use cinder::comparator::{Comparator, FnComparator};
///
/// let reverse = FnComparator::new("app.Reverse", |a, b| b.cmp(a));
/// assert_eq!(reverse.compare(b"a", b"b"), std::cmp::Ordering::Greater);
/// ```
pub struct FnComparator {
    name: String,
    compare: Box<CompareFn>,
}

impl FnComparator {
    pub fn new<F>(name: impl Into<String>, compare: F) -> Self
    where
        F: Fn(&[u8], &[u8]) -> Ordering + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            compare: Box::new(compare),
        }
    }
}

impl Comparator for FnComparator {
    fn name(&self) -> &str {
        &self.name
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        (self.compare)(a, b)
    }
}

impl fmt::Debug for FnComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnComparator").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytewise_order() {
        let cmp = BytewiseComparator;
        assert_eq!(cmp.compare(b"a", b"b"), Ordering::Less);
        assert_eq!(cmp.compare(b"ab", b"a"), Ordering::Greater);
        assert_eq!(cmp.compare(b"", b""), Ordering::Equal);
    }

    #[test]
    fn test_fn_comparator_uses_closure_and_name() {
        let cmp = FnComparator::new("test.Reverse", |a, b| b.cmp(a));
        assert_eq!(cmp.name(), "test.Reverse");
        assert_eq!(cmp.compare(b"a", b"b"), Ordering::Greater);
        assert!(format!("{:?}", cmp).contains("test.Reverse"));
    }
}
