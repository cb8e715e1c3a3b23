//! Repository contract the aggregation engine runs against

use crate::aggr::clock::AggregationInterval;
use crate::aggr::error::AggregationError;
use crate::aggr::record::ActivationAggregation;
use chrono::{NaiveDate, NaiveTime};

/// Point and bulk operations over the aggregation store, valid both on a
/// bare repository and inside a transaction scope.
///
/// The store must enforce uniqueness on the (date, time, interval, group)
/// natural key: concurrent `create` calls racing on the same key resolve to
/// exactly one winner, the loser observing
/// [`AggregationError::DuplicateKey`]. This is the engine's sole
/// concurrency-safety dependency.
pub trait RepositoryOps {
    /// All records for one bucket-time. Single bulk read - the hot
    /// reconciliation path never does per-group point reads.
    fn find_all(
        &self,
        date: NaiveDate,
        time: NaiveTime,
        interval: AggregationInterval,
    ) -> Result<Vec<ActivationAggregation>, AggregationError>;

    /// Point read for one bucket; `None` when no record exists
    fn find_one(
        &self,
        date: NaiveDate,
        time: NaiveTime,
        interval: AggregationInterval,
        group: &str,
    ) -> Result<Option<ActivationAggregation>, AggregationError>;

    /// Insert a fresh open record with zero counts.
    /// Fails with [`AggregationError::DuplicateKey`] if the key exists.
    fn create(
        &self,
        date: NaiveDate,
        time: NaiveTime,
        interval: AggregationInterval,
        group: &str,
    ) -> Result<ActivationAggregation, AggregationError>;

    /// Upsert the record's full counter state. Idempotent.
    fn save(&self, record: &ActivationAggregation) -> Result<(), AggregationError>;

    /// Records whose date falls within `[start, end]`, ordered descending
    /// by date. Reporting path only.
    fn find_by_date_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ActivationAggregation>, AggregationError>;

    /// Date-range query restricted to one interval width, so report sums
    /// don't double-count the same events across widths
    fn find_by_date_range_filtered(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        interval: AggregationInterval,
    ) -> Result<Vec<ActivationAggregation>, AggregationError>;
}

/// Full repository contract: the operations plus a transactional scope.
///
/// `with_transaction` gives the closure read-your-writes consistency and
/// makes its updates visible all-or-nothing: an `Err` return rolls every
/// write back. Isolation must be strong enough that a concurrent reader
/// never observes a record mid-finalize.
pub trait AggregationRepository: RepositoryOps + Send + Sync {
    fn with_transaction(
        &self,
        f: &mut dyn FnMut(&dyn RepositoryOps) -> Result<(), AggregationError>,
    ) -> Result<(), AggregationError>;
}
