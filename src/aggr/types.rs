//! Core data structures for the aggregation pipeline

use crate::aggr::clock::AggregationInterval;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single activation event: a user activating a named item.
///
/// Events arrive over the ingestion channel (or as JSONL on stdin for the
/// runtime binary) and fan out into one bucket per open interval per
/// applicable group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationEvent {
    /// Event timestamp (UTC)
    pub timestamp: DateTime<Utc>,

    /// User that performed the activation
    pub user_name: String,

    /// Name of the activated item - the deduplication key inside a bucket
    pub item_name: String,
}

impl ActivationEvent {
    /// Parse an ActivationEvent from a JSONL line
    pub fn from_jsonl(line: &str) -> Result<Self, crate::aggr::error::AggregationError> {
        let event: ActivationEvent = serde_json::from_str(line)?;
        Ok(event)
    }

    /// Session context handed to the group resolver
    pub fn session(&self) -> EventSession {
        EventSession {
            user_name: self.user_name.clone(),
        }
    }
}

/// Session context for an event, consumed by [`crate::aggr::groups::GroupResolver`]
#[derive(Debug, Clone)]
pub struct EventSession {
    pub user_name: String,
}

/// Natural key of one aggregation bucket: (date, time-of-day, interval
/// width, group).
///
/// Structurally equal by all four fields; never mutated once a record has
/// been created for it. The repository enforces uniqueness on this key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketCoordinate {
    /// Calendar day the bucket belongs to
    pub date: NaiveDate,

    /// Bucket start time within the day
    pub time: NaiveTime,

    /// Interval width of the bucket
    pub interval: AggregationInterval,

    /// Group the bucket is partitioned by (e.g. "local:Group A")
    pub group: String,
}

impl BucketCoordinate {
    pub fn new(
        date: NaiveDate,
        time: NaiveTime,
        interval: AggregationInterval,
        group: impl Into<String>,
    ) -> Self {
        Self {
            date,
            time,
            interval,
            group: group.into(),
        }
    }
}

impl fmt::Display for BucketCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} [{}]",
            self.date.format("%Y-%m-%d"),
            self.time.format("%H:%M"),
            self.interval.as_str(),
            self.group
        )
    }
}
