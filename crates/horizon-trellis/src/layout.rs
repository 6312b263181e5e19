//! Parallel batch measurement of nodes.
//!
//! The [`LayoutPool`] measures a set of `(node, constraint)` pairs
//! concurrently on a dedicated rayon pool. Work is partitioned into small
//! fixed-size chunks; chunks are dispatched in super-batches bounded by
//! `worker threads × chunk size` items, and the caller blocks until every
//! chunk of the current super-batch completes before the next one starts.
//! Bounding the in-flight width keeps fan-out under control for huge data
//! sets while still saturating the cores.
//!
//! # Failure semantics
//!
//! A panicking measurement is isolated per node: the node records a zero
//! size and its siblings in the same chunk are unaffected. There are no
//! partial-chunk retries.
//!
//! # Example
//!
//! ```no_run
//! use horizon_trellis::{LayoutContext, LayoutPool, LayoutPoolConfig};
//!
//! let pool = LayoutPool::new(LayoutPoolConfig::default()).unwrap();
//! # let work = Vec::new();
//! pool.measure_batch(&work, &LayoutContext::new(1));
//! ```

use std::panic::{AssertUnwindSafe, catch_unwind};

use rayon::{ThreadPool as RayonThreadPool, ThreadPoolBuilder};

use crate::error::{TrellisError, TrellisResult};
use crate::geometry::SizeRange;
use crate::logging::PerfSpan;
use crate::node::Node;

/// Default number of nodes measured by one worker task.
const DEFAULT_CHUNK_SIZE: usize = 5;

/// Explicit context passed into every layout computation.
///
/// The context tags an in-flight measurement with the data transition that
/// requested it. It is passed by value through the measurement call chain
/// rather than looked up from ambient thread-local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutContext {
    /// Identifier of the data transition this measurement belongs to.
    pub transition_id: u64,
}

impl LayoutContext {
    /// Create a context for the given transition.
    #[inline]
    pub const fn new(transition_id: u64) -> Self {
        Self { transition_id }
    }
}

/// Configuration for creating a [`LayoutPool`].
#[derive(Debug, Clone)]
pub struct LayoutPoolConfig {
    /// Number of worker threads. `None` means use the number of CPU cores.
    pub num_threads: Option<usize>,
    /// Name prefix for worker threads.
    pub thread_name: String,
    /// Number of nodes measured by one worker task.
    pub chunk_size: usize,
}

impl Default for LayoutPoolConfig {
    fn default() -> Self {
        Self {
            num_threads: None,
            thread_name: "trellis-layout".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl LayoutPoolConfig {
    /// Create a configuration with a custom thread count.
    pub fn with_threads(num_threads: usize) -> Self {
        Self {
            num_threads: Some(num_threads),
            ..Default::default()
        }
    }
}

/// A bounded worker pool for parallel node measurement.
///
/// Tasks are stateless and own disjoint nodes; there is no shared mutable
/// state across them, which makes measurement order-independent.
pub struct LayoutPool {
    pool: RayonThreadPool,
    chunk_size: usize,
}

impl LayoutPool {
    /// Create a new layout pool with the given configuration.
    pub fn new(config: LayoutPoolConfig) -> TrellisResult<Self> {
        let name = config.thread_name;
        let mut builder =
            ThreadPoolBuilder::new().thread_name(move |index| format!("{name}-{index}"));

        if let Some(num_threads) = config.num_threads {
            builder = builder.num_threads(num_threads);
        }

        let pool = builder
            .build()
            .map_err(|e| TrellisError::PoolCreation(e.to_string()))?;

        Ok(Self {
            pool,
            chunk_size: config.chunk_size.max(1),
        })
    }

    /// Number of worker threads in the pool.
    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Measure every `(node, constraint)` pair, blocking until done.
    ///
    /// Pairs are processed in super-batches of `num_threads × chunk_size`
    /// items; the call returns only after the final super-batch joins, so
    /// the caller may immediately insert the measured nodes.
    pub fn measure_batch(&self, work: &[(Node, SizeRange)], ctx: &LayoutContext) {
        if work.is_empty() {
            return;
        }
        let _span = PerfSpan::new("measure_batch");
        let width = self.num_threads().max(1) * self.chunk_size;
        tracing::trace!(
            target: "horizon_trellis",
            nodes = work.len(),
            batch_width = width,
            transition_id = ctx.transition_id,
            "measuring node batch"
        );

        for super_batch in work.chunks(width) {
            self.pool.scope(|scope| {
                for chunk in super_batch.chunks(self.chunk_size) {
                    let ctx = *ctx;
                    scope.spawn(move |_| measure_chunk(chunk, ctx));
                }
            });
        }
    }
}

impl std::fmt::Debug for LayoutPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayoutPool")
            .field("num_threads", &self.num_threads())
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

/// Measure one chunk of nodes, isolating per-node failures.
fn measure_chunk(chunk: &[(Node, SizeRange)], ctx: LayoutContext) {
    for (node, constraint) in chunk {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            node.measure(*constraint, &ctx);
        }));
        if outcome.is_err() {
            tracing::warn!(
                target: "horizon_trellis",
                transition_id = ctx.transition_id,
                "node measurement panicked; recording zero size"
            );
            node.record_failed_measure(*constraint);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Size;
    use crate::node::MeasureContent;

    struct Fixed(Size);

    impl MeasureContent for Fixed {
        fn measure(&self, constraint: SizeRange, _ctx: &LayoutContext) -> Size {
            constraint.constrain(self.0)
        }
    }

    struct Panicky;

    impl MeasureContent for Panicky {
        fn measure(&self, _constraint: SizeRange, _ctx: &LayoutContext) -> Size {
            panic!("malformed content")
        }
    }

    #[test]
    fn test_measures_every_node() {
        let pool = LayoutPool::new(LayoutPoolConfig::with_threads(4)).unwrap();
        let work: Vec<(Node, SizeRange)> = (0..137)
            .map(|i| {
                (
                    Node::new(Fixed(Size::new(i as f32, 10.0))),
                    SizeRange::unconstrained(),
                )
            })
            .collect();

        pool.measure_batch(&work, &LayoutContext::new(1));

        for (i, (node, _)) in work.iter().enumerate() {
            assert_eq!(node.calculated_size(), Some(Size::new(i as f32, 10.0)));
        }
    }

    #[test]
    fn test_panicking_node_is_isolated() {
        let pool = LayoutPool::new(LayoutPoolConfig::with_threads(2)).unwrap();
        let mut work: Vec<(Node, SizeRange)> = (0..9)
            .map(|_| {
                (
                    Node::new(Fixed(Size::new(10.0, 10.0))),
                    SizeRange::unconstrained(),
                )
            })
            .collect();
        // A panicking node in the middle of a chunk.
        work.insert(
            4,
            (Node::new(Panicky), SizeRange::unconstrained()),
        );

        pool.measure_batch(&work, &LayoutContext::new(1));

        for (i, (node, _)) in work.iter().enumerate() {
            let expected = if i == 4 {
                Size::ZERO
            } else {
                Size::new(10.0, 10.0)
            };
            assert_eq!(node.calculated_size(), Some(expected), "node {i}");
        }
    }

    #[test]
    fn test_empty_batch_is_no_op() {
        let pool = LayoutPool::new(LayoutPoolConfig::with_threads(1)).unwrap();
        pool.measure_batch(&[], &LayoutContext::new(1));
    }

    #[test]
    fn test_single_thread_pool_completes() {
        // Work larger than one super-batch forces multiple join rounds.
        let pool = LayoutPool::new(LayoutPoolConfig::with_threads(1)).unwrap();
        let work: Vec<(Node, SizeRange)> = (0..23)
            .map(|_| {
                (
                    Node::new(Fixed(Size::new(1.0, 1.0))),
                    SizeRange::unconstrained(),
                )
            })
            .collect();

        pool.measure_batch(&work, &LayoutContext::new(1));
        assert!(work.iter().all(|(node, _)| node.is_measured()));
    }
}
