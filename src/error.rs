//! Error type shared by the windowing and combine core.
//!
//! Failures during accumulation, window merging, or state access are unrecoverable for the
//! bundle being processed: they propagate to the caller, which owns retry policy.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// The window function could not produce a consistent merge partition.
    #[error("unable to merge windows: {0}")]
    WindowMerge(String),

    /// Accumulators that cannot be combined (wrong window arity, mismatched windows, ...).
    #[error("incompatible accumulators: {0}")]
    IncompatibleAccumulators(String),

    /// An accumulator was used after its output had been extracted.
    #[error("accumulator already extracted")]
    AccumulatorExtracted,

    /// A windowing strategy or window function was configured with invalid parameters.
    #[error("invalid windowing configuration: {0}")]
    InvalidWindowing(String),

    /// An element timestamp outside `TIMESTAMP_MIN_VALUE..=TIMESTAMP_MAX_VALUE`.
    #[error("timestamp {0} is outside the event-time range")]
    TimestampOutOfRange(i64),

    /// Watermark bookkeeping observed an impossible state (e.g. low > high).
    #[error("watermark invariant violated: {0}")]
    WatermarkInvariant(String),

    #[error("coder error: {0}")]
    Coder(#[from] postcard::Error),

    /// Bytes that do not decode to the expected shape.
    #[error("malformed encoding: {0}")]
    Encoding(String),

    #[error("state access failed: {0}")]
    State(String),

    #[error("execution failed: {0}")]
    Execution(String),
}
