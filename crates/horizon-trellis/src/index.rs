//! Index paths for addressing items in the two-level store.
//!
//! An `IndexPath` identifies an item by its `(section, item)` coordinate.
//!
//! # Index Validity
//!
//! An index path is only meaningful at the instant of the operation that
//! uses it. After store modifications (insertions, deletions, moves),
//! previously obtained paths may address different items or nothing at
//! all. Bulk store operations therefore re-sort their input paths
//! internally instead of trusting caller-supplied ordering.

use std::fmt;

/// A `(section, item)` coordinate into a two-level store.
///
/// Paths order section-major: all paths in section 0 sort before all paths
/// in section 1, and within a section they order by item index. This is
/// the ordering the store's bulk operations rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexPath {
    /// The section index.
    pub section: usize,
    /// The item index within the section.
    pub item: usize,
}

impl IndexPath {
    /// Create a new index path.
    #[inline]
    pub const fn new(section: usize, item: usize) -> Self {
        Self { section, item }
    }
}

impl From<(usize, usize)> for IndexPath {
    fn from((section, item): (usize, usize)) -> Self {
        Self { section, item }
    }
}

impl fmt::Display for IndexPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.section, self.item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_major_ordering() {
        let a = IndexPath::new(0, 5);
        let b = IndexPath::new(1, 0);
        let c = IndexPath::new(1, 3);

        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_sorting_mixed_paths() {
        let mut paths = vec![
            IndexPath::new(2, 0),
            IndexPath::new(0, 1),
            IndexPath::new(1, 4),
            IndexPath::new(0, 0),
        ];
        paths.sort();
        assert_eq!(
            paths,
            vec![
                IndexPath::new(0, 0),
                IndexPath::new(0, 1),
                IndexPath::new(1, 4),
                IndexPath::new(2, 0),
            ]
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(IndexPath::new(3, 7).to_string(), "(3, 7)");
    }
}
