//! Error types for Horizon Trellis.
//!
//! Only genuinely recoverable failures are surfaced as errors. Programmer
//! contract violations (driving the coordinator from the wrong thread,
//! unbalanced batch brackets, out-of-bounds structural indices) are fatal
//! panics, because they indicate a broken invariant that would corrupt
//! subsequent state.

use thiserror::Error;

/// Errors that can occur during coordinator operations.
#[derive(Error, Debug)]
pub enum TrellisError {
    /// The editing pipeline has been stopped and no longer accepts work.
    #[error("editing pipeline has been stopped")]
    PipelineStopped,

    /// Failed to spawn the editing pipeline thread.
    #[error("failed to spawn editing pipeline thread: {0}")]
    PipelineSpawn(String),

    /// Failed to build the layout worker pool.
    #[error("failed to build layout worker pool: {0}")]
    PoolCreation(String),
}

/// A specialized Result type for Horizon Trellis operations.
pub type TrellisResult<T> = Result<T, TrellisError>;
