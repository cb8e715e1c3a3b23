//! Error taxonomy for the aggregation pipeline

use crate::aggr::types::BucketCoordinate;
use thiserror::Error;

/// Errors surfaced by records, the engine, and repository adapters.
///
/// A missing bucket is not an error - point lookups return `Option`.
#[derive(Debug, Error)]
pub enum AggregationError {
    /// The bucket's interval has completed; mutation after close is a
    /// caller-ordering bug, not a recoverable condition
    #[error("bucket {0} is closed and can no longer be updated")]
    BucketClosed(BucketCoordinate),

    /// A row already exists for the natural key. Raised when concurrent
    /// creates race; the loser re-fetches and retries against the winner's
    /// row
    #[error("aggregation row already exists for {0}")]
    DuplicateKey(BucketCoordinate),

    /// The row lost a create race but the winning row was gone on re-fetch
    /// (winner rolled back); retryable by the caller
    #[error("aggregation row for {0} disappeared after a create conflict")]
    RowVanished(BucketCoordinate),

    /// Underlying store I/O or constraint failure; retry policy is the
    /// caller's concern
    #[error("storage failure: {0}")]
    Store(#[from] rusqlite::Error),

    /// A persisted distinct-name set or per-name count column failed to
    /// decode
    #[error("stored row could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
}
