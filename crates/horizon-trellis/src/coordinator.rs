//! The asynchronous data coordinator.
//!
//! [`DataCoordinator`] is the seam between a single-threaded interactive
//! surface and the background machinery that keeps large collections
//! responsive. It accepts section/item edits (optionally coalesced into a
//! `begin_updates`/`end_updates` bracket), applies them to an
//! authoritative editing store on a serial pipeline thread, measures
//! affected items on a bounded worker pool, and publishes an immutable
//! copy of the data back to the interactive thread after every
//! transaction.
//!
//! # Threads
//!
//! Three domains cooperate:
//!
//! 1. the **interactive thread**: the thread the coordinator was created
//!    on; the only legal caller of the edit and reader APIs;
//! 2. the **editing pipeline**: one dedicated thread, the only mutator
//!    of the authoritative store;
//! 3. the **layout pool**: stateless parallel measurement, joined by the
//!    pipeline before results are inserted.
//!
//! Readers never lock against the pipeline. Every transaction publishes a
//! wholesale replacement of the completed store, and while a batch is in
//! flight readers are served from a frozen pre-batch snapshot, so a
//! consumer iterating sections mid-batch never observes a torn state.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use horizon_trellis::{
//!     AnimationOptions, CoordinatorConfig, DataCoordinator, DataSource, IndexPath,
//!     LayoutContext, MeasureContent, Node, Size, SizeRange,
//! };
//!
//! struct Label(String);
//!
//! impl MeasureContent for Label {
//!     fn measure(&self, constraint: SizeRange, _ctx: &LayoutContext) -> Size {
//!         constraint.constrain(Size::new(self.0.len() as f32 * 8.0, 22.0))
//!     }
//! }
//!
//! struct Rows(Vec<Vec<String>>);
//!
//! impl DataSource for Rows {
//!     fn section_count(&self) -> usize {
//!         self.0.len()
//!     }
//!     fn item_count(&self, section: usize) -> usize {
//!         self.0[section].len()
//!     }
//!     fn node_at(&self, path: IndexPath) -> Node {
//!         Node::new(Label(self.0[path.section][path.item].clone()))
//!     }
//!     fn constrained_size_at(&self, _path: IndexPath) -> SizeRange {
//!         SizeRange::new(Size::ZERO, Size::new(320.0, f32::INFINITY))
//!     }
//! }
//!
//! let source = Arc::new(Rows(vec![vec!["a".into(), "b".into()]]));
//! let coordinator = DataCoordinator::new(source, CoordinatorConfig::default()).unwrap();
//!
//! coordinator.reload_data(AnimationOptions::NONE, None);
//! coordinator.wait_until_all_updates_committed();
//! assert_eq!(coordinator.number_of_sections(), 1);
//! assert_eq!(coordinator.number_of_items_in_section(0), 2);
//! ```

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use static_assertions::assert_not_impl_any;

use crate::batch::{ChangeSet, EditOp};
use crate::dispatch::InvocationQueue;
use crate::error::TrellisResult;
use crate::geometry::SizeRange;
use crate::index::IndexPath;
use crate::layout::{LayoutContext, LayoutPool, LayoutPoolConfig};
use crate::logging::PerfSpan;
use crate::node::Node;
use crate::pipeline::EditPipeline;
use crate::store::{ElementStore, Section};
use crate::thread_check::ThreadAffinity;

/// Opaque animation options, passed through to the delegate untouched.
///
/// The coordinator attaches no meaning to the bits; a batch that coalesces
/// several edits delivers the union of their options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AnimationOptions(u32);

impl AnimationOptions {
    /// No animation options.
    pub const NONE: Self = Self(0);

    /// Create options from raw bits.
    #[inline]
    pub const fn new(bits: u32) -> Self {
        Self(bits)
    }

    /// The raw bits.
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// The union of two option sets.
    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// Which notifications a delegate wants to receive.
///
/// Probed once when the delegate is registered; the coordinator consults
/// the stored set on every fan-out instead of re-querying the delegate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelegateCapabilities {
    /// Delegate handles `did_insert_sections`.
    pub insert_sections: bool,
    /// Delegate handles `did_delete_sections`.
    pub delete_sections: bool,
    /// Delegate handles `did_insert_nodes`.
    pub insert_nodes: bool,
    /// Delegate handles `did_delete_nodes`.
    pub delete_nodes: bool,
}

impl DelegateCapabilities {
    /// Every notification kind.
    pub const fn all() -> Self {
        Self {
            insert_sections: true,
            delete_sections: true,
            insert_nodes: true,
            delete_nodes: true,
        }
    }

    /// No notifications at all.
    pub const fn none() -> Self {
        Self {
            insert_sections: false,
            delete_sections: false,
            insert_nodes: false,
            delete_nodes: false,
        }
    }
}

impl Default for DelegateCapabilities {
    fn default() -> Self {
        Self::all()
    }
}

/// The external data source the coordinator populates itself from.
///
/// The source is a critical resource: the coordinator brackets each access
/// batch with [`lock`](DataSource::lock)/[`unlock`](DataSource::unlock).
/// With [`CoordinatorConfig::asynchronous_fetching`] enabled, the whole
/// lock/fetch/unlock sequence runs on the pipeline thread instead of the
/// interactive thread, so the source must tolerate off-thread access.
pub trait DataSource: Send + Sync {
    /// Begin an access batch. Default: no-op.
    fn lock(&self) {}

    /// End an access batch. Default: no-op.
    fn unlock(&self) {}

    /// Number of sections.
    fn section_count(&self) -> usize;

    /// Number of items in `section`.
    fn item_count(&self, section: usize) -> usize;

    /// A fresh node for the item at `path`.
    fn node_at(&self, path: IndexPath) -> Node;

    /// The measurement constraint for the item at `path`.
    fn constrained_size_at(&self, path: IndexPath) -> SizeRange;
}

/// Observer of published data changes.
///
/// All methods are invoked on the interactive thread, after the completed
/// store already reflects the change they describe.
pub trait CoordinatorDelegate: Send + Sync {
    /// Which notifications this delegate wants. Read once at registration.
    fn capabilities(&self) -> DelegateCapabilities {
        DelegateCapabilities::all()
    }

    /// A batch bracket has begun committing.
    fn begin_updates(&self) {}

    /// A batch bracket has fully published.
    fn end_updates(&self, _animated: bool) {}

    /// Sections were inserted into the completed store.
    fn did_insert_sections(&self, _indexes: &BTreeSet<usize>, _options: AnimationOptions) {}

    /// Sections were deleted from the completed store.
    fn did_delete_sections(&self, _indexes: &BTreeSet<usize>, _options: AnimationOptions) {}

    /// Nodes were inserted at `paths` (ascending).
    fn did_insert_nodes(&self, _nodes: &[Node], _paths: &[IndexPath], _options: AnimationOptions) {}

    /// Nodes were deleted at `paths` (descending).
    fn did_delete_nodes(&self, _nodes: &[Node], _paths: &[IndexPath], _options: AnimationOptions) {}
}

/// Completion callback for a batch bracket. The flag is `true` when the
/// bracket actually committed (the outermost `end_updates`).
pub type BatchCompletion = Box<dyn FnOnce(bool) + Send>;

/// Completion callback for a full reload.
pub type ReloadCompletion = Box<dyn FnOnce() + Send>;

/// Configuration for creating a [`DataCoordinator`].
#[derive(Debug, Clone, Default)]
pub struct CoordinatorConfig {
    /// Run data-source fetches on the pipeline thread instead of the
    /// interactive thread.
    pub asynchronous_fetching: bool,
    /// Layout worker pool configuration.
    pub layout_pool: LayoutPoolConfig,
}

#[derive(Clone)]
struct DelegateEntry {
    delegate: Arc<dyn CoordinatorDelegate>,
    capabilities: DelegateCapabilities,
}

/// State shared between the interactive thread and the pipeline.
struct Shared {
    /// The published store. Replaced wholesale, never mutated in place.
    completed: RwLock<ElementStore>,
    /// Frozen pre-batch snapshot, present while a batch is in flight.
    external_snapshot: RwLock<Option<ElementStore>>,
    /// Publications and notifications awaiting the interactive thread.
    queue: InvocationQueue,
    /// The registered delegate with its probed capability set.
    delegate: RwLock<Option<DelegateEntry>>,
}

impl Shared {
    fn delegate_entry(&self) -> Option<DelegateEntry> {
        self.delegate.read().clone()
    }
}

/// An item fetched from the data source, awaiting measurement.
struct FetchedItem {
    path: IndexPath,
    node: Node,
    constraint: SizeRange,
}

/// A section fetched from the data source with all of its items.
struct FetchedSection {
    index: usize,
    items: Vec<FetchedItem>,
}

/// The asynchronous data/layout coordinator.
///
/// Not `Sync`: the coordinator belongs to the interactive thread it was
/// created on, and its edit/reader surfaces assert that affinity.
pub struct DataCoordinator {
    affinity: ThreadAffinity,
    source: Arc<dyn DataSource>,
    shared: Arc<Shared>,
    pipeline: EditPipeline,
    pool: Arc<LayoutPool>,
    batch_depth: Cell<usize>,
    pending: RefCell<Vec<(EditOp, AnimationOptions)>>,
    asynchronous_fetching: bool,
    transition_id: AtomicU64,
}

assert_not_impl_any!(DataCoordinator: Sync);

impl DataCoordinator {
    /// Create a coordinator bound to the current (interactive) thread.
    pub fn new(source: Arc<dyn DataSource>, config: CoordinatorConfig) -> TrellisResult<Self> {
        let pool = Arc::new(LayoutPool::new(config.layout_pool)?);
        let pipeline = EditPipeline::new("trellis-edit")?;
        Ok(Self {
            affinity: ThreadAffinity::current(),
            source,
            shared: Arc::new(Shared {
                completed: RwLock::new(ElementStore::new()),
                external_snapshot: RwLock::new(None),
                queue: InvocationQueue::new(),
                delegate: RwLock::new(None),
            }),
            pipeline,
            pool,
            batch_depth: Cell::new(0),
            pending: RefCell::new(Vec::new()),
            asynchronous_fetching: config.asynchronous_fetching,
            transition_id: AtomicU64::new(0),
        })
    }

    /// Register (or clear) the delegate.
    ///
    /// The delegate's capability set is probed here, once; later changes
    /// to what the delegate would answer are not observed.
    pub fn set_delegate(&self, delegate: Option<Arc<dyn CoordinatorDelegate>>) {
        self.affinity.assert_same_thread("set_delegate");
        *self.shared.delegate.write() = delegate.map(|delegate| {
            let capabilities = delegate.capabilities();
            DelegateEntry {
                delegate,
                capabilities,
            }
        });
    }

    // ---------------------------------------------------------------
    // Batch bracket
    // ---------------------------------------------------------------

    /// Open a batch bracket. Edits issued until the matching
    /// [`end_updates`](Self::end_updates) are recorded and coalesced.
    ///
    /// The outermost `begin_updates` drains the pipeline first, so the
    /// batch's edits are computed against a quiesced, fully published
    /// state; the data source's new counts cannot race an in-flight
    /// transaction.
    pub fn begin_updates(&self) {
        self.affinity.assert_same_thread("begin_updates");
        let depth = self.batch_depth.get();
        if depth == 0 {
            self.wait_until_all_updates_committed();
        }
        self.batch_depth.set(depth + 1);
    }

    /// Close a batch bracket.
    ///
    /// The outermost `end_updates` freezes the external snapshot, notifies
    /// the delegate that updates are beginning, canonicalizes the recorded
    /// edits and submits them to the pipeline in strict category order:
    /// reload-sections, reload-items, delete-items, delete-sections,
    /// insert-sections, insert-items. A final transaction clears the
    /// snapshot and delivers `end_updates` plus `completion` on the
    /// interactive thread.
    ///
    /// A nested `end_updates` only decrements the depth; its completion is
    /// invoked immediately with `false`.
    ///
    /// # Panics
    ///
    /// Panics if no bracket is open.
    pub fn end_updates(&self, animated: bool, completion: Option<BatchCompletion>) {
        self.affinity.assert_same_thread("end_updates");
        let depth = self.batch_depth.get();
        assert!(depth > 0, "unbalanced end_updates: no batch bracket is open");
        self.batch_depth.set(depth - 1);
        if depth > 1 {
            if let Some(completion) = completion {
                completion(false);
            }
            return;
        }

        let _span = PerfSpan::new("end_updates");

        // Freeze the pre-batch state for readers.
        {
            let frozen = self.shared.completed.read().deep_copy();
            *self.shared.external_snapshot.write() = Some(frozen);
        }
        if let Some(entry) = self.shared.delegate_entry() {
            entry.delegate.begin_updates();
        }

        let mut change = ChangeSet::default();
        for (op, options) in self.pending.borrow_mut().drain(..) {
            change.record(op, options);
        }
        change.canonicalize();
        tracing::debug!(
            target: "horizon_trellis",
            empty = change.is_empty(),
            deleted_sections = change.deleted_sections.len(),
            inserted_sections = change.inserted_sections.len(),
            deleted_items = change.deleted_items.len(),
            inserted_items = change.inserted_items.len(),
            "committing batch"
        );

        let options = change.options;
        let ctx = self.next_layout_context();
        self.submit_reload_sections(change.reloaded_sections.clone(), options, ctx);
        self.submit_reload_items(change.reloaded_items_ascending(), options, ctx);
        self.submit_delete_items(change.deleted_items_descending(), options);
        self.submit_delete_sections(change.deleted_sections.clone(), options);
        self.submit_insert_sections(change.inserted_sections.clone(), options, ctx);
        self.submit_insert_items(change.inserted_items_ascending(), options, ctx);

        // Close out: unfreeze readers and notify once everything above
        // has published.
        let shared = self.shared.clone();
        let _ = self.pipeline.submit(move |_editing| {
            let queue = shared.queue.clone();
            let shared = shared.clone();
            queue.post(move || {
                *shared.external_snapshot.write() = None;
                if let Some(entry) = shared.delegate_entry() {
                    entry.delegate.end_updates(animated);
                }
                if let Some(completion) = completion {
                    completion(true);
                }
            });
        });
    }

    // ---------------------------------------------------------------
    // Edit API
    // ---------------------------------------------------------------

    /// Insert sections at `indexes`, populated from the data source.
    pub fn insert_sections(&self, indexes: BTreeSet<usize>, options: AnimationOptions) {
        self.affinity.assert_same_thread("insert_sections");
        if indexes.is_empty() {
            return;
        }
        self.record_or_run(EditOp::InsertSections(indexes), options);
    }

    /// Delete the sections at `indexes`.
    pub fn delete_sections(&self, indexes: BTreeSet<usize>, options: AnimationOptions) {
        self.affinity.assert_same_thread("delete_sections");
        if indexes.is_empty() {
            return;
        }
        self.record_or_run(EditOp::DeleteSections(indexes), options);
    }

    /// Re-derive the sections at `indexes` from the data source.
    pub fn reload_sections(&self, indexes: BTreeSet<usize>, options: AnimationOptions) {
        self.affinity.assert_same_thread("reload_sections");
        if indexes.is_empty() {
            return;
        }
        self.record_or_run(EditOp::ReloadSections(indexes), options);
    }

    /// Move a section. Composed as delete-at-`from` plus insert-at-`to`;
    /// node identity is not preserved across the move.
    pub fn move_section(&self, from: usize, to: usize, options: AnimationOptions) {
        self.affinity.assert_same_thread("move_section");
        self.record_or_run(EditOp::MoveSection { from, to }, options);
    }

    /// Insert items at `paths`, fetched from the data source.
    pub fn insert_items(&self, paths: Vec<IndexPath>, options: AnimationOptions) {
        self.affinity.assert_same_thread("insert_items");
        if paths.is_empty() {
            return;
        }
        self.record_or_run(EditOp::InsertItems(paths), options);
    }

    /// Delete the items at `paths`.
    pub fn delete_items(&self, paths: Vec<IndexPath>, options: AnimationOptions) {
        self.affinity.assert_same_thread("delete_items");
        if paths.is_empty() {
            return;
        }
        self.record_or_run(EditOp::DeleteItems(paths), options);
    }

    /// Re-derive the items at `paths` from the data source.
    pub fn reload_items(&self, paths: Vec<IndexPath>, options: AnimationOptions) {
        self.affinity.assert_same_thread("reload_items");
        if paths.is_empty() {
            return;
        }
        self.record_or_run(EditOp::ReloadItems(paths), options);
    }

    /// Move an item. Composed as delete-at-`from` plus insert-at-`to`;
    /// node identity is not preserved across the move.
    pub fn move_item(&self, from: IndexPath, to: IndexPath, options: AnimationOptions) {
        self.affinity.assert_same_thread("move_item");
        self.record_or_run(EditOp::MoveItem { from, to }, options);
    }

    /// Discard everything and repopulate from the data source.
    ///
    /// Drains the pipeline first, then runs one coalesced transaction:
    /// delete all prior sections, insert the source's sections, measure
    /// and insert every item. `completion` fires on the interactive thread
    /// once the completed store reflects the new content.
    ///
    /// # Panics
    ///
    /// Panics if called inside a batch bracket.
    pub fn reload_data(&self, options: AnimationOptions, completion: Option<ReloadCompletion>) {
        self.affinity.assert_same_thread("reload_data");
        assert!(
            self.batch_depth.get() == 0,
            "reload_data may not be called inside a batch bracket"
        );
        self.wait_until_all_updates_committed();

        let ctx = self.next_layout_context();
        let shared = self.shared.clone();
        let pool = self.pool.clone();
        let source = self.source.clone();
        let prefetched = if self.asynchronous_fetching {
            None
        } else {
            Some(fetch_everything(source.as_ref()))
        };
        let _ = self.pipeline.submit(move |editing| {
            let _span = PerfSpan::new("reload_data");
            let fetched = match prefetched {
                Some(fetched) => fetched,
                None => fetch_everything(source.as_ref()),
            };

            let old_sections: BTreeSet<usize> = (0..editing.section_count()).collect();
            editing.delete_sections(&old_sections);

            let new_sections: BTreeSet<usize> = (0..fetched.len()).collect();
            editing.insert_sections((0..fetched.len()).map(|i| (i, Section::new())).collect());

            let items: Vec<FetchedItem> =
                fetched.into_iter().flat_map(|section| section.items).collect();
            measure_fetched(&pool, &items, &ctx);
            let paths: Vec<IndexPath> = items.iter().map(|item| item.path).collect();
            let nodes: Vec<Node> = items.iter().map(|item| item.node.clone()).collect();
            editing.insert_items(items.into_iter().map(|item| (item.path, item.node)).collect());

            let published = editing.deep_copy();
            let queue = shared.queue.clone();
            let shared = shared.clone();
            queue.post(move || {
                *shared.completed.write() = published;
                if let Some(entry) = shared.delegate_entry() {
                    if !old_sections.is_empty() && entry.capabilities.delete_sections {
                        entry.delegate.did_delete_sections(&old_sections, options);
                    }
                    if !new_sections.is_empty() && entry.capabilities.insert_sections {
                        entry.delegate.did_insert_sections(&new_sections, options);
                    }
                    if !paths.is_empty() && entry.capabilities.insert_nodes {
                        entry.delegate.did_insert_nodes(&nodes, &paths, options);
                    }
                }
                if let Some(completion) = completion {
                    completion();
                }
            });
        });
    }

    /// Re-measure every node against `constraint` and republish.
    ///
    /// Structural layout is unchanged, so no delegate notifications are
    /// emitted; readers observe the new sizes on the next publication.
    pub fn relayout_all_nodes(&self, constraint: SizeRange) {
        self.affinity.assert_same_thread("relayout_all_nodes");
        let ctx = self.next_layout_context();
        let shared = self.shared.clone();
        let pool = self.pool.clone();
        let _ = self.pipeline.submit(move |editing| {
            let work: Vec<(Node, SizeRange)> = editing
                .all_items()
                .into_iter()
                .map(|(_, node)| (node, constraint))
                .collect();
            pool.measure_batch(&work, &ctx);
            publish(shared, editing.deep_copy(), |_entry| {});
        });
    }

    // ---------------------------------------------------------------
    // Synchronization
    // ---------------------------------------------------------------

    /// Block until every scheduled transaction has executed and published.
    ///
    /// This is the one place the interactive thread deliberately blocks on
    /// the pipeline; it is required before issuing new section/row counts
    /// that depend on all prior edits being visible.
    pub fn wait_until_all_updates_committed(&self) {
        self.affinity.assert_same_thread("wait_until_all_updates_committed");
        self.pipeline.drain();
        self.shared.queue.pump();
    }

    /// Execute pending publications and delegate notifications.
    ///
    /// The host's event loop calls this at its convenience; it never
    /// blocks. Returns the number of invocations executed.
    pub fn pump(&self) -> usize {
        self.affinity.assert_same_thread("pump");
        self.shared.queue.pump()
    }

    // ---------------------------------------------------------------
    // Reader API
    // ---------------------------------------------------------------

    /// Number of published sections.
    pub fn number_of_sections(&self) -> usize {
        self.affinity.assert_same_thread("number_of_sections");
        self.with_completed(|store| store.section_count())
    }

    /// Number of published items in `section`.
    pub fn number_of_items_in_section(&self, section: usize) -> usize {
        self.affinity.assert_same_thread("number_of_items_in_section");
        self.with_completed(|store| store.item_count(section))
    }

    /// The published node at `path`, if any.
    pub fn node_at(&self, path: IndexPath) -> Option<Node> {
        self.affinity.assert_same_thread("node_at");
        self.with_completed(|store| store.node_at(path))
    }

    /// Batch lookup of published nodes, visited in ascending path order.
    pub fn nodes_at(&self, paths: &[IndexPath]) -> Vec<Node> {
        self.affinity.assert_same_thread("nodes_at");
        self.with_completed(|store| store.nodes_at(paths))
    }

    /// The path of `node` in the published data, by handle identity.
    ///
    /// Linear over the total item count; an introspection aid, not a hot
    /// path.
    pub fn path_for_node(&self, node: &Node) -> Option<IndexPath> {
        self.affinity.assert_same_thread("path_for_node");
        self.with_completed(|store| store.path_for_node(node))
    }

    /// An independent copy of the currently visible data.
    pub fn copy_completed_nodes(&self) -> ElementStore {
        self.affinity.assert_same_thread("copy_completed_nodes");
        self.with_completed(ElementStore::deep_copy)
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    /// Serve readers from the frozen snapshot while a batch is in flight,
    /// else from the live completed store.
    fn with_completed<R>(&self, f: impl FnOnce(&ElementStore) -> R) -> R {
        let snapshot = self.shared.external_snapshot.read();
        if let Some(frozen) = snapshot.as_ref() {
            return f(frozen);
        }
        drop(snapshot);
        let completed = self.shared.completed.read();
        f(&completed)
    }

    fn next_layout_context(&self) -> LayoutContext {
        LayoutContext::new(self.transition_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Record the edit if a bracket is open, else run it as an implicit
    /// single-op batch so every mutation flows through canonicalization.
    fn record_or_run(&self, op: EditOp, options: AnimationOptions) {
        if self.batch_depth.get() > 0 {
            self.pending.borrow_mut().push((op, options));
        } else {
            self.begin_updates();
            self.pending.borrow_mut().push((op, options));
            self.end_updates(true, None);
        }
    }

    fn submit_insert_items(
        &self,
        paths: Vec<IndexPath>,
        options: AnimationOptions,
        ctx: LayoutContext,
    ) {
        if paths.is_empty() {
            return;
        }
        let shared = self.shared.clone();
        let pool = self.pool.clone();
        let source = self.source.clone();
        let prefetched = if self.asynchronous_fetching {
            None
        } else {
            Some(fetch_items(source.as_ref(), &paths))
        };
        let _ = self.pipeline.submit(move |editing| {
            let mut items = match prefetched {
                Some(items) => items,
                None => fetch_items(source.as_ref(), &paths),
            };
            if items.is_empty() {
                return;
            }
            items.sort_unstable_by_key(|item| item.path);
            measure_fetched(&pool, &items, &ctx);
            let paths: Vec<IndexPath> = items.iter().map(|item| item.path).collect();
            let nodes: Vec<Node> = items.iter().map(|item| item.node.clone()).collect();
            editing.insert_items(items.into_iter().map(|item| (item.path, item.node)).collect());
            publish(shared, editing.deep_copy(), move |entry| {
                if entry.capabilities.insert_nodes {
                    entry.delegate.did_insert_nodes(&nodes, &paths, options);
                }
            });
        });
    }

    fn submit_delete_items(&self, paths: Vec<IndexPath>, options: AnimationOptions) {
        if paths.is_empty() {
            return;
        }
        let shared = self.shared.clone();
        let _ = self.pipeline.submit(move |editing| {
            let removed = editing.delete_items(&paths);
            let paths: Vec<IndexPath> = removed.iter().map(|(path, _)| *path).collect();
            let nodes: Vec<Node> = removed.into_iter().map(|(_, node)| node).collect();
            publish(shared, editing.deep_copy(), move |entry| {
                if entry.capabilities.delete_nodes {
                    entry.delegate.did_delete_nodes(&nodes, &paths, options);
                }
            });
        });
    }

    fn submit_reload_items(
        &self,
        paths: Vec<IndexPath>,
        options: AnimationOptions,
        ctx: LayoutContext,
    ) {
        if paths.is_empty() {
            return;
        }
        let shared = self.shared.clone();
        let pool = self.pool.clone();
        let source = self.source.clone();
        let prefetched = if self.asynchronous_fetching {
            None
        } else {
            Some(fetch_items(source.as_ref(), &paths))
        };
        let _ = self.pipeline.submit(move |editing| {
            let removed = editing.delete_items(&paths);
            let removed_paths: Vec<IndexPath> = removed.iter().map(|(path, _)| *path).collect();
            let removed_nodes: Vec<Node> = removed.into_iter().map(|(_, node)| node).collect();

            let mut fresh = match prefetched {
                Some(items) => items,
                None => fetch_items(source.as_ref(), &paths),
            };
            fresh.sort_unstable_by_key(|item| item.path);
            measure_fetched(&pool, &fresh, &ctx);
            let fresh_paths: Vec<IndexPath> = fresh.iter().map(|item| item.path).collect();
            let fresh_nodes: Vec<Node> = fresh.iter().map(|item| item.node.clone()).collect();
            editing.insert_items(fresh.into_iter().map(|item| (item.path, item.node)).collect());

            publish(shared, editing.deep_copy(), move |entry| {
                if entry.capabilities.delete_nodes {
                    entry.delegate.did_delete_nodes(&removed_nodes, &removed_paths, options);
                }
                if entry.capabilities.insert_nodes {
                    entry.delegate.did_insert_nodes(&fresh_nodes, &fresh_paths, options);
                }
            });
        });
    }

    fn submit_insert_sections(
        &self,
        indexes: BTreeSet<usize>,
        options: AnimationOptions,
        ctx: LayoutContext,
    ) {
        if indexes.is_empty() {
            return;
        }
        let shared = self.shared.clone();
        let pool = self.pool.clone();
        let source = self.source.clone();
        let prefetched = if self.asynchronous_fetching {
            None
        } else {
            Some(fetch_sections(source.as_ref(), &indexes))
        };
        let _ = self.pipeline.submit(move |editing| {
            let fetched = match prefetched {
                Some(fetched) => fetched,
                None => fetch_sections(source.as_ref(), &indexes),
            };
            let items: Vec<(Node, SizeRange)> = fetched
                .iter()
                .flat_map(|section| section.items.iter())
                .map(|item| (item.node.clone(), item.constraint))
                .collect();
            pool.measure_batch(&items, &ctx);
            editing.insert_sections(
                fetched
                    .into_iter()
                    .map(|section| {
                        (
                            section.index,
                            Section::from_nodes(
                                section.items.into_iter().map(|item| item.node).collect(),
                            ),
                        )
                    })
                    .collect(),
            );
            publish(shared, editing.deep_copy(), move |entry| {
                if entry.capabilities.insert_sections {
                    entry.delegate.did_insert_sections(&indexes, options);
                }
            });
        });
    }

    fn submit_delete_sections(&self, indexes: BTreeSet<usize>, options: AnimationOptions) {
        if indexes.is_empty() {
            return;
        }
        let shared = self.shared.clone();
        let _ = self.pipeline.submit(move |editing| {
            editing.delete_sections(&indexes);
            publish(shared, editing.deep_copy(), move |entry| {
                if entry.capabilities.delete_sections {
                    entry.delegate.did_delete_sections(&indexes, options);
                }
            });
        });
    }

    fn submit_reload_sections(
        &self,
        indexes: BTreeSet<usize>,
        options: AnimationOptions,
        ctx: LayoutContext,
    ) {
        if indexes.is_empty() {
            return;
        }
        let shared = self.shared.clone();
        let pool = self.pool.clone();
        let source = self.source.clone();
        let prefetched = if self.asynchronous_fetching {
            None
        } else {
            Some(fetch_sections(source.as_ref(), &indexes))
        };
        let _ = self.pipeline.submit(move |editing| {
            editing.delete_sections(&indexes);

            let fetched = match prefetched {
                Some(fetched) => fetched,
                None => fetch_sections(source.as_ref(), &indexes),
            };
            let items: Vec<(Node, SizeRange)> = fetched
                .iter()
                .flat_map(|section| section.items.iter())
                .map(|item| (item.node.clone(), item.constraint))
                .collect();
            pool.measure_batch(&items, &ctx);
            editing.insert_sections(
                fetched
                    .into_iter()
                    .map(|section| {
                        (
                            section.index,
                            Section::from_nodes(
                                section.items.into_iter().map(|item| item.node).collect(),
                            ),
                        )
                    })
                    .collect(),
            );

            publish(shared, editing.deep_copy(), move |entry| {
                if entry.capabilities.delete_sections {
                    entry.delegate.did_delete_sections(&indexes, options);
                }
                if entry.capabilities.insert_sections {
                    entry.delegate.did_insert_sections(&indexes, options);
                }
            });
        });
    }
}

impl Drop for DataCoordinator {
    fn drop(&mut self) {
        self.pipeline.stop_and_join();
    }
}

impl std::fmt::Debug for DataCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataCoordinator")
            .field("batch_depth", &self.batch_depth.get())
            .field("pending_transactions", &self.pipeline.pending_transactions())
            .finish_non_exhaustive()
    }
}

/// Swap the completed store and fan out notifications, on the interactive
/// thread.
fn publish<F>(shared: Arc<Shared>, store: ElementStore, notify: F)
where
    F: FnOnce(&DelegateEntry) + Send + 'static,
{
    let queue = shared.queue.clone();
    queue.post(move || {
        tracing::trace!(
            target: "horizon_trellis",
            sections = store.section_count(),
            items = store.total_item_count(),
            "publishing completed store"
        );
        *shared.completed.write() = store;
        if let Some(entry) = shared.delegate_entry() {
            notify(&entry);
        }
    });
}

/// Measure fetched items in place, blocking until done.
fn measure_fetched(pool: &LayoutPool, items: &[FetchedItem], ctx: &LayoutContext) {
    let work: Vec<(Node, SizeRange)> = items
        .iter()
        .map(|item| (item.node.clone(), item.constraint))
        .collect();
    pool.measure_batch(&work, ctx);
}

/// Fetch the nodes and constraints at `paths`, bracketed by the source lock.
fn fetch_items(source: &dyn DataSource, paths: &[IndexPath]) -> Vec<FetchedItem> {
    if paths.is_empty() {
        return Vec::new();
    }
    source.lock();
    let fetched = paths
        .iter()
        .map(|&path| FetchedItem {
            path,
            node: source.node_at(path),
            constraint: source.constrained_size_at(path),
        })
        .collect();
    source.unlock();
    fetched
}

/// Fetch whole sections (row counts and every item), bracketed by the
/// source lock.
fn fetch_sections(source: &dyn DataSource, indexes: &BTreeSet<usize>) -> Vec<FetchedSection> {
    if indexes.is_empty() {
        return Vec::new();
    }
    source.lock();
    let fetched = indexes
        .iter()
        .map(|&index| FetchedSection {
            index,
            items: (0..source.item_count(index))
                .map(|item| {
                    let path = IndexPath::new(index, item);
                    FetchedItem {
                        path,
                        node: source.node_at(path),
                        constraint: source.constrained_size_at(path),
                    }
                })
                .collect(),
        })
        .collect();
    source.unlock();
    fetched
}

/// Fetch the entire data source, bracketed by the source lock.
fn fetch_everything(source: &dyn DataSource) -> Vec<FetchedSection> {
    source.lock();
    let fetched = (0..source.section_count())
        .map(|index| FetchedSection {
            index,
            items: (0..source.item_count(index))
                .map(|item| {
                    let path = IndexPath::new(index, item);
                    FetchedItem {
                        path,
                        node: source.node_at(path),
                        constraint: source.constrained_size_at(path),
                    }
                })
                .collect(),
        })
        .collect();
    source.unlock();
    fetched
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_animation_options_union() {
        let a = AnimationOptions::new(0b0101);
        let b = AnimationOptions::new(0b0011);
        assert_eq!(a.union(b), AnimationOptions::new(0b0111));
        assert_eq!(AnimationOptions::NONE.bits(), 0);
    }

    #[test]
    fn test_capabilities_defaults() {
        let all = DelegateCapabilities::default();
        assert!(all.insert_sections && all.delete_sections);
        assert!(all.insert_nodes && all.delete_nodes);

        let none = DelegateCapabilities::none();
        assert!(!none.insert_sections && !none.delete_nodes);
    }
}
