//! Per-bucket counter record and its open/closed lifecycle

use crate::aggr::error::AggregationError;
use crate::aggr::types::BucketCoordinate;
use std::collections::{HashMap, HashSet};

/// Lifecycle state of a bucket. Closing is terminal: a closed bucket never
/// reopens and rejects every mutation.
///
/// The state is an explicit field rather than being inferred from count
/// emptiness, so a bucket closed with zero occurrences stays
/// distinguishable from a freshly created one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketState {
    Open,
    Closed,
}

/// Mutable counter record for one [`BucketCoordinate`].
///
/// Tracks the total activation count and the distinct item names seen
/// while the bucket is open. The per-name counts accumulate across the
/// record's entire life. `unique_names` is cleared at close;
/// `unique_count` freezes at its last open value.
#[derive(Debug, Clone)]
pub struct ActivationAggregation {
    coordinate: BucketCoordinate,
    total_count: u64,
    unique_count: u64,
    unique_names: HashSet<String>,
    count_per_name: HashMap<String, u64>,
    elapsed_ms: i64,
    state: BucketState,
}

impl ActivationAggregation {
    /// Fresh open record with zero counts
    pub fn new(coordinate: BucketCoordinate) -> Self {
        Self {
            coordinate,
            total_count: 0,
            unique_count: 0,
            unique_names: HashSet::new(),
            count_per_name: HashMap::new(),
            elapsed_ms: 0,
            state: BucketState::Open,
        }
    }

    /// Rehydrate a record from persisted parts. Used by repository adapters.
    pub(crate) fn from_parts(
        coordinate: BucketCoordinate,
        total_count: u64,
        unique_count: u64,
        unique_names: HashSet<String>,
        count_per_name: HashMap<String, u64>,
        elapsed_ms: i64,
        state: BucketState,
    ) -> Self {
        Self {
            coordinate,
            total_count,
            unique_count,
            unique_names,
            count_per_name,
            elapsed_ms,
            state,
        }
    }

    pub fn coordinate(&self) -> &BucketCoordinate {
        &self.coordinate
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    /// Distinct item names seen since the bucket opened; frozen at close
    pub fn unique_count(&self) -> u64 {
        self.unique_count
    }

    pub fn unique_names(&self) -> &HashSet<String> {
        &self.unique_names
    }

    pub fn elapsed_ms(&self) -> i64 {
        self.elapsed_ms
    }

    pub fn state(&self) -> BucketState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == BucketState::Closed
    }

    /// Item names with a nonzero count, in no particular order.
    /// Available in any state - per-name counts survive close.
    pub fn counted_names(&self) -> impl Iterator<Item = &str> {
        self.count_per_name.keys().map(|s| s.as_str())
    }

    /// Occurrence count for one item name, 0 if never seen.
    /// Valid in any state.
    pub fn count_for(&self, name: &str) -> u64 {
        self.count_per_name.get(name).copied().unwrap_or(0)
    }

    /// Count one activation of `name`.
    ///
    /// Increments the total, the per-name count (inserting at 0 if the name
    /// is new), and the unique count when the name has not been seen in
    /// this open window.
    pub fn record_activation(&mut self, name: &str) -> Result<(), AggregationError> {
        self.check_open()?;

        if self.unique_names.insert(name.to_string()) {
            self.unique_count += 1;
        }
        self.total_count += 1;
        *self.count_per_name.entry(name.to_string()).or_insert(0) += 1;

        Ok(())
    }

    /// Update the elapsed-so-far duration. Idempotent; callable once per
    /// event batch or more.
    pub fn set_elapsed_ms(&mut self, elapsed_ms: i64) -> Result<(), AggregationError> {
        self.check_open()?;

        self.elapsed_ms = elapsed_ms;
        Ok(())
    }

    /// Complete the bucket's interval: fix the duration at the full window
    /// width, clear the distinct-name set, and transition to Closed.
    ///
    /// Allowed exactly once; a second close is a [`AggregationError::BucketClosed`].
    pub fn close(&mut self, total_window_ms: i64) -> Result<(), AggregationError> {
        self.check_open()?;

        self.elapsed_ms = total_window_ms;
        self.unique_names.clear();
        self.state = BucketState::Closed;
        Ok(())
    }

    fn check_open(&self) -> Result<(), AggregationError> {
        match self.state {
            BucketState::Open => Ok(()),
            BucketState::Closed => Err(AggregationError::BucketClosed(self.coordinate.clone())),
        }
    }
}
