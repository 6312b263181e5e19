//! Asynchronous collection data and layout coordination.
//!
//! This crate keeps large, dynamically-changing collections (lists and
//! grids) responsive by moving item measurement and data mutation off the
//! interactive thread:
//!
//! - **Data Coordinator**: accepts section/item edits, coalesces them into
//!   transactions, and publishes consistent snapshots to readers
//! - **Element Store**: the two-level (sections → items) ordered container
//!   behind both the authoritative and the published data
//! - **Layout Pool**: bounded parallel measurement of item content
//! - **Editing Pipeline**: the serial background thread that is the sole
//!   mutator of the authoritative store
//!
//! # Batch Update Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use horizon_trellis::{
//!     AnimationOptions, CoordinatorConfig, DataCoordinator, DataSource, IndexPath,
//!     LayoutContext, MeasureContent, Node, Size, SizeRange,
//! };
//!
//! struct Cell(f32);
//!
//! impl MeasureContent for Cell {
//!     fn measure(&self, constraint: SizeRange, _ctx: &LayoutContext) -> Size {
//!         constraint.constrain(Size::new(320.0, self.0))
//!     }
//! }
//!
//! struct Rows(Vec<Vec<f32>>);
//!
//! impl DataSource for Rows {
//!     fn section_count(&self) -> usize {
//!         self.0.len()
//!     }
//!     fn item_count(&self, section: usize) -> usize {
//!         self.0[section].len()
//!     }
//!     fn node_at(&self, path: IndexPath) -> Node {
//!         Node::new(Cell(self.0[path.section][path.item]))
//!     }
//!     fn constrained_size_at(&self, _path: IndexPath) -> SizeRange {
//!         SizeRange::unconstrained()
//!     }
//! }
//!
//! let coordinator = DataCoordinator::new(
//!     Arc::new(Rows(vec![vec![44.0, 44.0], vec![60.0]])),
//!     CoordinatorConfig::default(),
//! )
//! .unwrap();
//!
//! // Populate from the source.
//! coordinator.reload_data(AnimationOptions::NONE, None);
//! coordinator.wait_until_all_updates_committed();
//!
//! // Coalesce a burst of edits into one transaction.
//! coordinator.begin_updates();
//! coordinator.delete_items(vec![IndexPath::new(0, 1)], AnimationOptions::NONE);
//! coordinator.insert_items(vec![IndexPath::new(1, 0)], AnimationOptions::NONE);
//! coordinator.end_updates(true, None);
//! coordinator.wait_until_all_updates_committed();
//! ```

mod batch;
mod coordinator;
mod dispatch;
mod error;
pub mod geometry;
pub mod index;
pub mod layout;
pub mod logging;
pub mod node;
mod pipeline;
pub mod store;
pub mod thread_check;

pub use coordinator::{
    AnimationOptions, BatchCompletion, CoordinatorConfig, CoordinatorDelegate, DataCoordinator,
    DataSource, DelegateCapabilities, ReloadCompletion,
};
pub use error::{TrellisError, TrellisResult};
pub use geometry::{Point, Rect, Size, SizeRange};
pub use index::IndexPath;
pub use layout::{LayoutContext, LayoutPool, LayoutPoolConfig};
pub use logging::PerfSpan;
pub use node::{MeasureContent, Node};
pub use store::{ElementStore, Section};
pub use thread_check::ThreadAffinity;
