//! Aggregation engine - per-event reconciliation and interval boundary
//! closing
//!
//! The engine holds no state of its own and performs no locking; every
//! cross-call consistency guarantee is delegated to the repository (unique
//! natural key + transactional scope).

use crate::aggr::clock::{AggregationInterval, IntervalInfo};
use crate::aggr::error::AggregationError;
use crate::aggr::record::ActivationAggregation;
use crate::aggr::repository::{AggregationRepository, RepositoryOps};
use crate::aggr::types::{ActivationEvent, BucketCoordinate};
use chrono::{NaiveDate, NaiveTime};
use std::collections::HashSet;
use std::sync::Arc;

pub struct AggregationEngine {
    repo: Arc<dyn AggregationRepository>,
}

impl AggregationEngine {
    pub fn new(repo: Arc<dyn AggregationRepository>) -> Self {
        Self { repo }
    }

    /// Reconcile one event into every open interval it falls in, for every
    /// applicable group.
    ///
    /// Each interval runs in its own repository transaction and fails in
    /// isolation: an error in one interval is logged and the remaining
    /// intervals still process. The first error (if any) is returned after
    /// all intervals have been attempted.
    pub fn reconcile(
        &self,
        event: &ActivationEvent,
        open_intervals: &[IntervalInfo],
        applicable_groups: &HashSet<String>,
    ) -> Result<(), AggregationError> {
        if applicable_groups.is_empty() {
            return Ok(());
        }

        let mut first_err = None;

        for info in open_intervals {
            if let Err(e) = self.reconcile_interval(event, info, applicable_groups) {
                log::warn!(
                    "⚠️  Reconcile failed for {} bucket {} {}: {}",
                    info.interval.as_str(),
                    info.date,
                    info.time,
                    e
                );
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// One interval's worth of reconciliation, inside one transaction:
    ///
    /// 1. Bulk-fetch all records for the bucket-time.
    /// 2. Update each fetched record whose group applies, removing the
    ///    group from the working set.
    /// 3. Create (and update) a record for each group left over, recovering
    ///    a lost create race by re-fetching the winner's row.
    /// 4. Save everything touched.
    fn reconcile_interval(
        &self,
        event: &ActivationEvent,
        info: &IntervalInfo,
        applicable_groups: &HashSet<String>,
    ) -> Result<(), AggregationError> {
        self.repo.with_transaction(&mut |ops: &dyn RepositoryOps| {
            let mut remaining: HashSet<String> = applicable_groups.clone();
            let mut touched: Vec<ActivationAggregation> = Vec::new();

            let existing = ops.find_all(info.date, info.time, info.interval)?;
            for mut record in existing {
                // removal marks the group as already having a row; rows for
                // groups the event's actor is not in stay untouched
                if remaining.remove(&record.coordinate().group) {
                    apply_event(&mut record, event, info)?;
                    touched.push(record);
                }
            }

            // create any left over groups
            for group in &remaining {
                let mut record = match ops.create(info.date, info.time, info.interval, group) {
                    Ok(record) => record,
                    Err(AggregationError::DuplicateKey(_)) => {
                        // lost the create race; the winner's row must exist
                        ops.find_one(info.date, info.time, info.interval, group)?
                            .ok_or_else(|| {
                                AggregationError::RowVanished(BucketCoordinate::new(
                                    info.date,
                                    info.time,
                                    info.interval,
                                    group.clone(),
                                ))
                            })?
                    }
                    Err(e) => return Err(e),
                };
                apply_event(&mut record, event, info)?;
                touched.push(record);
            }

            for record in &touched {
                ops.save(record)?;
            }

            Ok(())
        })
    }

    /// Close every record for the given bucket-time: fix each duration at
    /// the interval's full window and freeze distinct-name tracking.
    ///
    /// Runs in one transaction so readers never observe a partially
    /// finalized bucket-time. Records already closed are skipped, keeping a
    /// re-run of the same boundary harmless.
    pub fn close_interval(
        &self,
        interval: AggregationInterval,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<(), AggregationError> {
        self.repo.with_transaction(&mut |ops: &dyn RepositoryOps| {
            let records = ops.find_all(date, time, interval)?;

            for mut record in records {
                if record.is_closed() {
                    log::debug!("Bucket {} already closed, skipping", record.coordinate());
                    continue;
                }
                record.close(interval.total_window_ms())?;
                ops.save(&record)?;
            }

            Ok(())
        })
    }
}

fn apply_event(
    record: &mut ActivationAggregation,
    event: &ActivationEvent,
    info: &IntervalInfo,
) -> Result<(), AggregationError> {
    record.set_elapsed_ms(info.elapsed_ms)?;
    record.record_activation(&event.item_name)
}
