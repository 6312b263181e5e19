//! The two-level element store: sections of nodes.
//!
//! [`ElementStore`] is the container both the authoritative (editing) and
//! the published (completed) data live in. It supports indexed bulk
//! insert/delete at section and item granularity, identity-based reverse
//! lookup, and a deep copy that is structurally independent down to the
//! item arrays.
//!
//! # Ordering contract
//!
//! Sequential application of indexed edits is only safe in one direction:
//! deletions must run in descending index order (removing from the end
//! never shifts a not-yet-processed lower index) and insertions in
//! ascending order. Rather than making that a caller obligation, the bulk
//! operations here sort their inputs internally.
//!
//! # Bounds
//!
//! Zero-length inputs are silent no-ops. An out-of-bounds structural index
//! is a programmer contract violation and panics: continuing would corrupt
//! indices silently.

use std::collections::BTreeSet;

use crate::index::IndexPath;
use crate::node::Node;

/// An ordered sequence of nodes.
#[derive(Clone, Default)]
pub struct Section {
    nodes: Vec<Node>,
}

impl Section {
    /// Create an empty section.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a section holding the given nodes.
    pub fn from_nodes(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    /// Number of nodes in the section.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the section holds no nodes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The nodes in the section, in order.
    #[inline]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }
}

impl std::fmt::Debug for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Section").field("len", &self.len()).finish()
    }
}

/// A multi-level ordered container of sections of nodes.
#[derive(Clone, Default)]
pub struct ElementStore {
    sections: Vec<Section>,
}

impl ElementStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sections.
    #[inline]
    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    /// Number of items in `section`.
    ///
    /// # Panics
    ///
    /// Panics if `section` is out of bounds.
    pub fn item_count(&self, section: usize) -> usize {
        assert!(
            section < self.sections.len(),
            "section index {section} out of bounds (store has {} sections)",
            self.sections.len()
        );
        self.sections[section].len()
    }

    /// Total number of items across all sections.
    pub fn total_item_count(&self) -> usize {
        self.sections.iter().map(Section::len).sum()
    }

    /// The node at `path`, or `None` if the path is out of bounds.
    pub fn node_at(&self, path: IndexPath) -> Option<Node> {
        self.sections
            .get(path.section)
            .and_then(|section| section.nodes.get(path.item))
            .cloned()
    }

    /// Batch lookup: the nodes at `paths`, visited in ascending path order.
    ///
    /// Out-of-bounds paths are skipped.
    pub fn nodes_at(&self, paths: &[IndexPath]) -> Vec<Node> {
        let mut sorted: Vec<IndexPath> = paths.to_vec();
        sorted.sort_unstable();
        sorted
            .into_iter()
            .filter_map(|path| self.node_at(path))
            .collect()
    }

    /// Identity-based reverse lookup: the path of `node`, if present.
    ///
    /// Linear over the total item count; intended for introspection, not
    /// hot paths.
    pub fn path_for_node(&self, node: &Node) -> Option<IndexPath> {
        for (s, section) in self.sections.iter().enumerate() {
            for (i, candidate) in section.nodes.iter().enumerate() {
                if Node::ptr_eq(candidate, node) {
                    return Some(IndexPath::new(s, i));
                }
            }
        }
        None
    }

    /// Insert nodes at the given paths.
    ///
    /// Entries are sorted ascending internally before sequential
    /// application, so each path addresses the store state produced by the
    /// previous insertions.
    ///
    /// # Panics
    ///
    /// Panics if an entry addresses a nonexistent section or an item index
    /// past the end of its section.
    pub fn insert_items(&mut self, mut entries: Vec<(IndexPath, Node)>) {
        if entries.is_empty() {
            return;
        }
        entries.sort_unstable_by_key(|(path, _)| *path);
        for (path, node) in entries {
            assert!(
                path.section < self.sections.len(),
                "item insert at {path}: section out of bounds (store has {} sections)",
                self.sections.len()
            );
            let nodes = &mut self.sections[path.section].nodes;
            assert!(
                path.item <= nodes.len(),
                "item insert at {path}: item index out of bounds (section has {} items)",
                nodes.len()
            );
            nodes.insert(path.item, node);
        }
    }

    /// Delete the nodes at the given paths.
    ///
    /// Paths are sorted descending internally before sequential
    /// application. Returns the removed `(path, node)` pairs in removal
    /// (descending) order.
    ///
    /// # Panics
    ///
    /// Panics if a path is out of bounds.
    pub fn delete_items(&mut self, paths: &[IndexPath]) -> Vec<(IndexPath, Node)> {
        if paths.is_empty() {
            return Vec::new();
        }
        let mut sorted: Vec<IndexPath> = paths.to_vec();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        let mut removed = Vec::with_capacity(sorted.len());
        for path in sorted {
            assert!(
                path.section < self.sections.len(),
                "item delete at {path}: section out of bounds (store has {} sections)",
                self.sections.len()
            );
            let nodes = &mut self.sections[path.section].nodes;
            assert!(
                path.item < nodes.len(),
                "item delete at {path}: item index out of bounds (section has {} items)",
                nodes.len()
            );
            removed.push((path, nodes.remove(path.item)));
        }
        removed
    }

    /// Insert sections at the given indexes.
    ///
    /// Entries are sorted ascending internally.
    ///
    /// # Panics
    ///
    /// Panics if an index is past the end of the section array.
    pub fn insert_sections(&mut self, mut entries: Vec<(usize, Section)>) {
        if entries.is_empty() {
            return;
        }
        entries.sort_unstable_by_key(|(index, _)| *index);
        for (index, section) in entries {
            assert!(
                index <= self.sections.len(),
                "section insert at {index}: out of bounds (store has {} sections)",
                self.sections.len()
            );
            self.sections.insert(index, section);
        }
    }

    /// Delete the sections at the given indexes.
    ///
    /// Indexes are applied in descending order. Returns the removed
    /// sections in removal (descending) order.
    ///
    /// # Panics
    ///
    /// Panics if an index is out of bounds.
    pub fn delete_sections(&mut self, indexes: &BTreeSet<usize>) -> Vec<Section> {
        if indexes.is_empty() {
            return Vec::new();
        }
        let mut removed = Vec::with_capacity(indexes.len());
        for &index in indexes.iter().rev() {
            assert!(
                index < self.sections.len(),
                "section delete at {index}: out of bounds (store has {} sections)",
                self.sections.len()
            );
            removed.push(self.sections.remove(index));
        }
        removed
    }

    /// Every node in the store, paired with its current path.
    pub fn all_items(&self) -> Vec<(IndexPath, Node)> {
        let mut items = Vec::with_capacity(self.total_item_count());
        for (s, section) in self.sections.iter().enumerate() {
            for (i, node) in section.nodes.iter().enumerate() {
                items.push((IndexPath::new(s, i), node.clone()));
            }
        }
        items
    }

    /// A copy that is structurally independent down to the item arrays.
    ///
    /// Mutating either copy's structure (inserting or deleting sections or
    /// items) never affects the other. Node handles are shared: both
    /// copies reference the same node instances, which is the defined
    /// behavior during the publication window.
    pub fn deep_copy(&self) -> Self {
        self.clone()
    }
}

impl std::fmt::Debug for ElementStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementStore")
            .field("sections", &self.section_count())
            .field("items", &self.total_item_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Size, SizeRange};
    use crate::layout::LayoutContext;
    use crate::node::MeasureContent;

    struct Fixed;

    impl MeasureContent for Fixed {
        fn measure(&self, _constraint: SizeRange, _ctx: &LayoutContext) -> Size {
            Size::new(10.0, 10.0)
        }
    }

    fn node() -> Node {
        Node::new(Fixed)
    }

    fn store_with(counts: &[usize]) -> ElementStore {
        let mut store = ElementStore::new();
        store.insert_sections(
            counts
                .iter()
                .enumerate()
                .map(|(i, &count)| (i, Section::from_nodes((0..count).map(|_| node()).collect())))
                .collect(),
        );
        store
    }

    #[test]
    fn test_empty_inputs_are_no_ops() {
        let mut store = store_with(&[2]);
        store.insert_items(Vec::new());
        assert!(store.delete_items(&[]).is_empty());
        store.insert_sections(Vec::new());
        assert!(store.delete_sections(&BTreeSet::new()).is_empty());
        assert_eq!(store.section_count(), 1);
        assert_eq!(store.item_count(0), 2);
    }

    #[test]
    fn test_insert_items_sorts_ascending() {
        let mut store = store_with(&[1]);
        let a = node();
        let b = node();
        // Passed out of order: (0,2) before (0,1). Ascending application
        // makes both valid against the store produced so far.
        store.insert_items(vec![
            (IndexPath::new(0, 2), b.clone()),
            (IndexPath::new(0, 1), a.clone()),
        ]);
        assert_eq!(store.item_count(0), 3);
        assert!(Node::ptr_eq(&store.node_at(IndexPath::new(0, 1)).unwrap(), &a));
        assert!(Node::ptr_eq(&store.node_at(IndexPath::new(0, 2)).unwrap(), &b));
    }

    #[test]
    fn test_delete_items_sorts_descending() {
        let mut store = store_with(&[4]);
        let survivor = store.node_at(IndexPath::new(0, 2)).unwrap();
        // Passed ascending; descending application keeps index 3 valid
        // after index 1 would otherwise have shifted it.
        let removed = store.delete_items(&[IndexPath::new(0, 1), IndexPath::new(0, 3)]);
        assert_eq!(removed.len(), 2);
        assert_eq!(removed[0].0, IndexPath::new(0, 3));
        assert_eq!(removed[1].0, IndexPath::new(0, 1));
        assert_eq!(store.item_count(0), 2);
        assert!(Node::ptr_eq(&store.node_at(IndexPath::new(0, 1)).unwrap(), &survivor));
    }

    #[test]
    fn test_section_insert_delete_round_trip() {
        let mut store = store_with(&[1, 2, 3]);
        let mut doomed = BTreeSet::new();
        doomed.insert(0);
        doomed.insert(2);
        let removed = store.delete_sections(&doomed);
        assert_eq!(removed.len(), 2);
        assert_eq!(store.section_count(), 1);
        assert_eq!(store.item_count(0), 2);

        store.insert_sections(vec![(0, Section::new()), (2, Section::new())]);
        assert_eq!(store.section_count(), 3);
        assert_eq!(store.item_count(1), 2);
    }

    #[test]
    fn test_deep_copy_is_structurally_independent() {
        let mut store = store_with(&[2, 2]);
        let copy = store.deep_copy();

        store.delete_items(&[IndexPath::new(0, 0)]);
        let mut all = BTreeSet::new();
        all.insert(1);
        store.delete_sections(&all);

        assert_eq!(copy.section_count(), 2);
        assert_eq!(copy.item_count(0), 2);
        assert_eq!(copy.item_count(1), 2);
    }

    #[test]
    fn test_deep_copy_shares_node_handles() {
        let store = store_with(&[1]);
        let copy = store.deep_copy();
        let original = store.node_at(IndexPath::new(0, 0)).unwrap();
        let copied = copy.node_at(IndexPath::new(0, 0)).unwrap();
        assert!(Node::ptr_eq(&original, &copied));
    }

    #[test]
    fn test_path_for_node_identity_scan() {
        let store = store_with(&[2, 3]);
        let target = store.node_at(IndexPath::new(1, 2)).unwrap();
        assert_eq!(store.path_for_node(&target), Some(IndexPath::new(1, 2)));
        assert_eq!(store.path_for_node(&node()), None);
    }

    #[test]
    fn test_nodes_at_visits_ascending_and_skips_missing() {
        let store = store_with(&[2, 1]);
        let found = store.nodes_at(&[
            IndexPath::new(1, 0),
            IndexPath::new(0, 1),
            IndexPath::new(5, 5),
        ]);
        assert_eq!(found.len(), 2);
        assert!(Node::ptr_eq(&found[0], &store.node_at(IndexPath::new(0, 1)).unwrap()));
        assert!(Node::ptr_eq(&found[1], &store.node_at(IndexPath::new(1, 0)).unwrap()));
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_out_of_bounds_insert_panics() {
        let mut store = store_with(&[1]);
        store.insert_items(vec![(IndexPath::new(3, 0), node())]);
    }
}
