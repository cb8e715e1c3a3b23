//! Interval catalog and bucket resolution for event timestamps

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Fixed interval widths events are bucketed into.
///
/// Each interval is aggregated independently from raw events - an hourly
/// bucket is NOT derived by summing its five-minute buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregationInterval {
    FiveMinute,
    Hour,
}

impl AggregationInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationInterval::FiveMinute => "5m",
            AggregationInterval::Hour => "1h",
        }
    }

    pub fn duration_secs(&self) -> i64 {
        match self {
            AggregationInterval::FiveMinute => 5 * 60,
            AggregationInterval::Hour => 60 * 60,
        }
    }

    /// Full window duration once the bucket is closed
    pub fn total_window_ms(&self) -> i64 {
        self.duration_secs() * 1000
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "5m" => Some(AggregationInterval::FiveMinute),
            "1h" => Some(AggregationInterval::Hour),
            _ => None,
        }
    }

    pub fn all() -> [AggregationInterval; 2] {
        [AggregationInterval::FiveMinute, AggregationInterval::Hour]
    }

    /// Start of the bucket containing `ts`, aligned to this interval's width
    pub fn bucket_start(&self, ts: NaiveDateTime) -> NaiveDateTime {
        let secs = ts.time().num_seconds_from_midnight() as i64;
        let width = self.duration_secs();
        let start_secs = (secs - secs % width) as u32;

        // start_secs < 86400 by construction
        let time = NaiveTime::from_num_seconds_from_midnight_opt(start_secs, 0).unwrap();
        NaiveDateTime::new(ts.date(), time)
    }
}

/// One currently-open bucket for an event timestamp, with the elapsed
/// duration from the bucket start to the event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalInfo {
    pub interval: AggregationInterval,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub elapsed_ms: i64,
}

/// Resolves an event timestamp into the set of currently-open buckets.
///
/// Deterministic: the same timestamp and catalog always yield the same
/// bucket coordinates and elapsed durations.
pub struct IntervalClock {
    intervals: Vec<AggregationInterval>,
}

impl IntervalClock {
    pub fn new(intervals: Vec<AggregationInterval>) -> Self {
        Self { intervals }
    }

    pub fn intervals(&self) -> &[AggregationInterval] {
        &self.intervals
    }

    /// Open buckets the timestamp falls in, one per cataloged interval
    pub fn open_intervals_for(&self, timestamp: DateTime<Utc>) -> Vec<IntervalInfo> {
        let ts = timestamp.naive_utc();

        self.intervals
            .iter()
            .map(|interval| {
                let start = interval.bucket_start(ts);
                IntervalInfo {
                    interval: *interval,
                    date: start.date(),
                    time: start.time(),
                    elapsed_ms: (ts - start).num_milliseconds(),
                }
            })
            .collect()
    }
}

impl Default for IntervalClock {
    fn default() -> Self {
        Self::new(AggregationInterval::all().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_interval_str_roundtrip() {
        for interval in AggregationInterval::all() {
            assert_eq!(AggregationInterval::from_str(interval.as_str()), Some(interval));
        }
        assert_eq!(AggregationInterval::from_str("2h"), None);
    }

    #[test]
    fn test_bucket_start_truncation() {
        // 2012-01-16 17:24:04 UTC
        let ts = Utc.timestamp_millis_opt(1326734644000).unwrap().naive_utc();

        let five = AggregationInterval::FiveMinute.bucket_start(ts);
        assert_eq!(five.date(), NaiveDate::from_ymd_opt(2012, 1, 16).unwrap());
        assert_eq!(five.time(), NaiveTime::from_hms_opt(17, 20, 0).unwrap());

        let hour = AggregationInterval::Hour.bucket_start(ts);
        assert_eq!(hour.time(), NaiveTime::from_hms_opt(17, 0, 0).unwrap());
    }

    #[test]
    fn test_open_intervals_elapsed() {
        let clock = IntervalClock::default();
        let ts = Utc.timestamp_millis_opt(1326734644000).unwrap();

        let open = clock.open_intervals_for(ts);
        assert_eq!(open.len(), 2);

        // 17:24:04 is 4m04s into the five-minute bucket, 24m04s into the hour
        assert_eq!(open[0].interval, AggregationInterval::FiveMinute);
        assert_eq!(open[0].elapsed_ms, (4 * 60 + 4) * 1000);
        assert_eq!(open[1].interval, AggregationInterval::Hour);
        assert_eq!(open[1].elapsed_ms, (24 * 60 + 4) * 1000);
    }

    #[test]
    fn test_open_intervals_deterministic() {
        let clock = IntervalClock::default();
        let ts = Utc.timestamp_millis_opt(1326734644000).unwrap();

        assert_eq!(clock.open_intervals_for(ts), clock.open_intervals_for(ts));
    }

    #[test]
    fn test_total_window_ms() {
        assert_eq!(AggregationInterval::FiveMinute.total_window_ms(), 300_000);
        assert_eq!(AggregationInterval::Hour.total_window_ms(), 3_600_000);
    }

    #[test]
    fn test_bucket_start_on_exact_boundary() {
        let ts = NaiveDate::from_ymd_opt(2012, 1, 16)
            .unwrap()
            .and_hms_opt(17, 20, 0)
            .unwrap();

        assert_eq!(AggregationInterval::FiveMinute.bucket_start(ts), ts);
    }
}
