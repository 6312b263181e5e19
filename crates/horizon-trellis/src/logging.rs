//! Logging helpers for Horizon Trellis.
//!
//! The crate emits structured events through the `tracing` crate under the
//! `horizon_trellis` target; hosts install whatever subscriber they use
//! for the rest of their application.

/// A guard that holds a tracing span open for the duration of an operation.
///
/// Useful for timing pipeline transactions and measurement super-batches:
/// the span closes when the guard drops.
#[derive(Debug)]
pub struct PerfSpan {
    #[allow(dead_code)]
    span: tracing::span::EnteredSpan,
}

impl PerfSpan {
    /// Create a new performance span.
    ///
    /// The span will be active until the guard is dropped.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!(target: "horizon_trellis::perf", "perf", operation = name);
        Self {
            span: span.entered(),
        }
    }
}
