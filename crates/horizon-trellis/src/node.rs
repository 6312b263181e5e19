//! Nodes: opaque measurable content handles.
//!
//! A [`Node`] is a cheap-to-clone handle over one item's measurable
//! content. The content itself is opaque to the coordinator; it only has
//! to know how to measure itself against a [`SizeRange`]. The computed
//! size and the geometry frame live behind the handle so that a node's
//! measurement, performed on a worker thread, is visible to whichever
//! store array currently holds the handle.
//!
//! # Identity
//!
//! Nodes compare by handle identity, not by value: two nodes are the same
//! node only if their handles point at the same allocation. Reverse
//! lookups (`path_for_node`) rely on this.
//!
//! # Example
//!
//! ```
//! use horizon_trellis::{LayoutContext, MeasureContent, Node, Size, SizeRange};
//!
//! struct Label {
//!     intrinsic: Size,
//! }
//!
//! impl MeasureContent for Label {
//!     fn measure(&self, constraint: SizeRange, _ctx: &LayoutContext) -> Size {
//!         constraint.constrain(self.intrinsic)
//!     }
//! }
//!
//! let node = Node::new(Label { intrinsic: Size::new(120.0, 44.0) });
//! node.measure(SizeRange::unconstrained(), &LayoutContext::new(0));
//! assert_eq!(node.calculated_size(), Some(Size::new(120.0, 44.0)));
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use static_assertions::assert_impl_all;

use crate::geometry::{Rect, Size, SizeRange};
use crate::layout::LayoutContext;

/// Measurable content carried by a [`Node`].
///
/// Implementations must be side-effect-free with respect to other nodes:
/// measuring one node never observes or mutates another. This is what
/// makes parallel measurement sound.
pub trait MeasureContent: Send + Sync {
    /// Compute the content's size under the given constraint.
    ///
    /// The returned size is clamped into the constraint by the caller;
    /// implementations may rely on that rather than clamping themselves.
    fn measure(&self, constraint: SizeRange, ctx: &LayoutContext) -> Size;
}

/// Mutable layout state of a node.
#[derive(Debug, Default)]
struct NodeState {
    /// The constraint the node was last measured against.
    constrained_size: Option<SizeRange>,
    /// The measured size, set once measurement completes.
    calculated_size: Option<Size>,
    /// The node's geometry rectangle.
    frame: Rect,
}

struct NodeInner {
    content: Box<dyn MeasureContent>,
    state: Mutex<NodeState>,
}

/// A handle to one item's measurable content.
///
/// Cloning a `Node` clones the handle, not the content: both clones
/// observe the same measurement state. Stores share node handles across
/// their deep copies during the publication window.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

assert_impl_all!(Node: Send, Sync);

impl Node {
    /// Create a node wrapping the given content.
    pub fn new<C: MeasureContent + 'static>(content: C) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                content: Box::new(content),
                state: Mutex::new(NodeState::default()),
            }),
        }
    }

    /// Measure the node against `constraint`, recording the result.
    ///
    /// The measured size is clamped into the constraint, stored as the
    /// calculated size, and the frame is reset to the measured size at the
    /// origin. Returns the clamped size.
    pub fn measure(&self, constraint: SizeRange, ctx: &LayoutContext) -> Size {
        let size = constraint.constrain(self.inner.content.measure(constraint, ctx));
        let mut state = self.inner.state.lock();
        state.constrained_size = Some(constraint);
        state.calculated_size = Some(size);
        state.frame = Rect::from_size(size);
        size
    }

    /// Record a failed measurement as a degenerate zero size.
    ///
    /// Used by the worker pool when a node's measurement panics: the
    /// failure is isolated to this node and the batch continues.
    pub(crate) fn record_failed_measure(&self, constraint: SizeRange) {
        let mut state = self.inner.state.lock();
        state.constrained_size = Some(constraint);
        state.calculated_size = Some(Size::ZERO);
        state.frame = Rect::ZERO;
    }

    /// The constraint the node was last measured against, if any.
    pub fn constrained_size(&self) -> Option<SizeRange> {
        self.inner.state.lock().constrained_size
    }

    /// The measured size, or `None` if the node has not been measured.
    pub fn calculated_size(&self) -> Option<Size> {
        self.inner.state.lock().calculated_size
    }

    /// Whether the node has a calculated size.
    #[inline]
    pub fn is_measured(&self) -> bool {
        self.calculated_size().is_some()
    }

    /// The node's geometry rectangle.
    pub fn frame(&self) -> Rect {
        self.inner.state.lock().frame
    }

    /// Set the node's geometry rectangle.
    pub fn set_frame(&self, frame: Rect) {
        self.inner.state.lock().frame = frame;
    }

    /// Whether two handles refer to the same node.
    #[inline]
    pub fn ptr_eq(a: &Node, b: &Node) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Node")
            .field("calculated_size", &state.calculated_size)
            .field("frame", &state.frame)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;

    struct Fixed(Size);

    impl MeasureContent for Fixed {
        fn measure(&self, _constraint: SizeRange, _ctx: &LayoutContext) -> Size {
            self.0
        }
    }

    #[test]
    fn test_measure_records_state() {
        let node = Node::new(Fixed(Size::new(80.0, 20.0)));
        assert!(!node.is_measured());

        let constraint = SizeRange::unconstrained();
        let size = node.measure(constraint, &LayoutContext::new(1));

        assert_eq!(size, Size::new(80.0, 20.0));
        assert_eq!(node.calculated_size(), Some(size));
        assert_eq!(node.constrained_size(), Some(constraint));
        assert_eq!(node.frame(), Rect::from_size(size));
    }

    #[test]
    fn test_measure_clamps_to_constraint() {
        let node = Node::new(Fixed(Size::new(500.0, 500.0)));
        let constraint = SizeRange::new(Size::ZERO, Size::new(100.0, 100.0));

        let size = node.measure(constraint, &LayoutContext::new(1));
        assert_eq!(size, Size::new(100.0, 100.0));
    }

    #[test]
    fn test_failed_measure_degrades_to_zero() {
        let node = Node::new(Fixed(Size::new(10.0, 10.0)));
        node.record_failed_measure(SizeRange::unconstrained());

        assert_eq!(node.calculated_size(), Some(Size::ZERO));
        assert_eq!(node.frame(), Rect::ZERO);
    }

    #[test]
    fn test_clone_shares_state() {
        let node = Node::new(Fixed(Size::new(10.0, 10.0)));
        let clone = node.clone();

        node.set_frame(Rect::new(5.0, 5.0, 10.0, 10.0));
        assert_eq!(clone.frame().origin, Point::new(5.0, 5.0));
        assert!(Node::ptr_eq(&node, &clone));
    }

    #[test]
    fn test_identity_not_value_equality() {
        let a = Node::new(Fixed(Size::new(10.0, 10.0)));
        let b = Node::new(Fixed(Size::new(10.0, 10.0)));
        assert!(!Node::ptr_eq(&a, &b));
    }
}
