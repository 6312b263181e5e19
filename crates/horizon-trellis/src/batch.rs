//! Pending edit operations and batch canonicalization.
//!
//! While a batch bracket is open, edit calls are recorded as [`EditOp`]
//! values instead of executing. When the bracket closes, the recorded
//! operations are folded into a [`ChangeSet`] (six accumulator sets that
//! capture the net structural intent of the batch) and canonicalized:
//!
//! 1. moves become a delete at the old position plus an insert at the new
//!    one (a convenience composition, not an identity-preserving move);
//! 2. item-level edits whose section is itself deleted or inserted are
//!    dropped, because the section-level change supersedes them;
//! 3. deletions are emitted in descending order and insertions in
//!    ascending order, so sequential application never corrupts indices.
//!
//! The coordinator then applies the categories in a strict order:
//! reload-sections, reload-items, delete-items, delete-sections,
//! insert-sections, insert-items. Deletions must be visible before
//! insertions reuse their indices, and section-level structural changes
//! must bracket item-level changes cleanly.

use std::collections::BTreeSet;

use crate::coordinator::AnimationOptions;
use crate::index::IndexPath;

/// A recorded edit, queued while a batch bracket is open.
#[derive(Debug, Clone)]
pub(crate) enum EditOp {
    InsertSections(BTreeSet<usize>),
    DeleteSections(BTreeSet<usize>),
    ReloadSections(BTreeSet<usize>),
    MoveSection { from: usize, to: usize },
    InsertItems(Vec<IndexPath>),
    DeleteItems(Vec<IndexPath>),
    ReloadItems(Vec<IndexPath>),
    MoveItem { from: IndexPath, to: IndexPath },
}

/// The net structural intent of one batch.
#[derive(Debug, Default)]
pub(crate) struct ChangeSet {
    pub deleted_sections: BTreeSet<usize>,
    pub inserted_sections: BTreeSet<usize>,
    pub reloaded_sections: BTreeSet<usize>,
    pub deleted_items: BTreeSet<IndexPath>,
    pub inserted_items: BTreeSet<IndexPath>,
    pub reloaded_items: BTreeSet<IndexPath>,
    /// Union of the animation options of every recorded edit.
    pub options: AnimationOptions,
}

impl ChangeSet {
    /// Fold one recorded edit into the accumulator sets.
    pub(crate) fn record(&mut self, op: EditOp, options: AnimationOptions) {
        self.options = self.options.union(options);
        match op {
            EditOp::InsertSections(indexes) => self.inserted_sections.extend(indexes),
            EditOp::DeleteSections(indexes) => self.deleted_sections.extend(indexes),
            EditOp::ReloadSections(indexes) => self.reloaded_sections.extend(indexes),
            EditOp::MoveSection { from, to } => {
                self.deleted_sections.insert(from);
                self.inserted_sections.insert(to);
            }
            EditOp::InsertItems(paths) => self.inserted_items.extend(paths),
            EditOp::DeleteItems(paths) => self.deleted_items.extend(paths),
            EditOp::ReloadItems(paths) => self.reloaded_items.extend(paths),
            EditOp::MoveItem { from, to } => {
                self.deleted_items.insert(from);
                self.inserted_items.insert(to);
            }
        }
    }

    /// Drop item-level edits superseded by section-level ones.
    ///
    /// A section that is wholly deleted or inserted re-derives its entire
    /// content from the data source; individual item edits inside it are
    /// meaningless and are removed from the item sets.
    pub(crate) fn canonicalize(&mut self) {
        let superseded = |path: &IndexPath| {
            self.deleted_sections.contains(&path.section)
                || self.inserted_sections.contains(&path.section)
        };
        self.deleted_items.retain(|path| !superseded(path));
        self.inserted_items.retain(|path| !superseded(path));
        self.reloaded_items.retain(|path| !superseded(path));
    }

    /// Whether the batch carries no structural change at all.
    pub(crate) fn is_empty(&self) -> bool {
        self.deleted_sections.is_empty()
            && self.inserted_sections.is_empty()
            && self.reloaded_sections.is_empty()
            && self.deleted_items.is_empty()
            && self.inserted_items.is_empty()
            && self.reloaded_items.is_empty()
    }

    /// Deleted item paths, descending: safe for sequential removal.
    pub(crate) fn deleted_items_descending(&self) -> Vec<IndexPath> {
        self.deleted_items.iter().rev().copied().collect()
    }

    /// Inserted item paths, ascending: safe for sequential insertion.
    pub(crate) fn inserted_items_ascending(&self) -> Vec<IndexPath> {
        self.inserted_items.iter().copied().collect()
    }

    /// Reloaded item paths, ascending.
    pub(crate) fn reloaded_items_ascending(&self) -> Vec<IndexPath> {
        self.reloaded_items.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(raw: &[(usize, usize)]) -> Vec<IndexPath> {
        raw.iter().map(|&(s, i)| IndexPath::new(s, i)).collect()
    }

    #[test]
    fn test_record_accumulates_categories() {
        let mut set = ChangeSet::default();
        set.record(
            EditOp::InsertSections([2].into()),
            AnimationOptions::default(),
        );
        set.record(
            EditOp::DeleteItems(paths(&[(1, 0), (1, 3)])),
            AnimationOptions::default(),
        );
        set.record(
            EditOp::InsertItems(paths(&[(0, 0)])),
            AnimationOptions::default(),
        );

        assert_eq!(set.inserted_sections, [2].into());
        assert_eq!(set.deleted_items.len(), 2);
        assert_eq!(set.inserted_items.len(), 1);
        assert!(!set.is_empty());
    }

    #[test]
    fn test_move_folds_to_delete_plus_insert() {
        let mut set = ChangeSet::default();
        set.record(
            EditOp::MoveSection { from: 0, to: 3 },
            AnimationOptions::default(),
        );
        set.record(
            EditOp::MoveItem {
                from: IndexPath::new(1, 0),
                to: IndexPath::new(2, 5),
            },
            AnimationOptions::default(),
        );

        assert!(set.deleted_sections.contains(&0));
        assert!(set.inserted_sections.contains(&3));
        assert!(set.deleted_items.contains(&IndexPath::new(1, 0)));
        assert!(set.inserted_items.contains(&IndexPath::new(2, 5)));
    }

    #[test]
    fn test_canonicalize_drops_superseded_item_edits() {
        let mut set = ChangeSet::default();
        set.record(
            EditOp::DeleteItems(paths(&[(0, 0), (1, 1)])),
            AnimationOptions::default(),
        );
        set.record(
            EditOp::ReloadItems(paths(&[(0, 2)])),
            AnimationOptions::default(),
        );
        set.record(
            EditOp::InsertItems(paths(&[(2, 0), (1, 0)])),
            AnimationOptions::default(),
        );
        set.record(
            EditOp::InsertSections([2].into()),
            AnimationOptions::default(),
        );
        set.record(
            EditOp::DeleteSections([0].into()),
            AnimationOptions::default(),
        );

        set.canonicalize();

        // Everything targeting deleted section 0 or inserted section 2 is gone.
        assert_eq!(set.deleted_items, [IndexPath::new(1, 1)].into());
        assert!(set.reloaded_items.is_empty());
        assert_eq!(set.inserted_items, [IndexPath::new(1, 0)].into());
    }

    #[test]
    fn test_emission_ordering() {
        let mut set = ChangeSet::default();
        set.record(
            EditOp::DeleteItems(paths(&[(0, 1), (2, 0), (0, 4)])),
            AnimationOptions::default(),
        );
        set.record(
            EditOp::InsertItems(paths(&[(1, 2), (0, 0)])),
            AnimationOptions::default(),
        );

        assert_eq!(
            set.deleted_items_descending(),
            paths(&[(2, 0), (0, 4), (0, 1)])
        );
        assert_eq!(set.inserted_items_ascending(), paths(&[(0, 0), (1, 2)]));
    }

    #[test]
    fn test_options_union() {
        let mut set = ChangeSet::default();
        set.record(EditOp::InsertSections([0].into()), AnimationOptions::new(0b01));
        set.record(EditOp::DeleteSections([1].into()), AnimationOptions::new(0b10));
        assert_eq!(set.options, AnimationOptions::new(0b11));
    }

    #[test]
    fn test_duplicate_edits_coalesce() {
        let mut set = ChangeSet::default();
        set.record(
            EditOp::DeleteItems(paths(&[(0, 1), (0, 1)])),
            AnimationOptions::default(),
        );
        set.record(
            EditOp::DeleteItems(paths(&[(0, 1)])),
            AnimationOptions::default(),
        );
        assert_eq!(set.deleted_items.len(), 1);
    }
}
