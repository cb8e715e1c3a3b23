//! Event ingestion - async channel processor driving reconciliation and
//! interval boundary closing
//!
//! One `tokio::select!` loop owns both duties, so boundary closing is
//! naturally serialized with reconciliation for the same bucket-time.

use crate::aggr::clock::{AggregationInterval, IntervalClock};
use crate::aggr::engine::AggregationEngine;
use crate::aggr::groups::GroupResolver;
use crate::aggr::types::ActivationEvent;
use chrono::{NaiveDateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};

/// Tracks the current bucket per interval and reports buckets whose window
/// has elapsed since the last check
pub struct BoundaryTracker {
    current: HashMap<AggregationInterval, NaiveDateTime>,
}

impl BoundaryTracker {
    pub fn new(intervals: &[AggregationInterval], now: NaiveDateTime) -> Self {
        Self {
            current: intervals
                .iter()
                .map(|iv| (*iv, iv.bucket_start(now)))
                .collect(),
        }
    }

    /// Advance to `now`, returning (interval, expired bucket start) for
    /// every interval that rolled over
    pub fn advance(&mut self, now: NaiveDateTime) -> Vec<(AggregationInterval, NaiveDateTime)> {
        let mut expired = Vec::new();

        for (iv, tracked) in self.current.iter_mut() {
            let bucket = iv.bucket_start(now);
            if bucket != *tracked {
                expired.push((*iv, *tracked));
                *tracked = bucket;
            }
        }

        expired
    }
}

/// Start event ingestion from the activation event channel.
///
/// Main loop:
/// 1. Receives events and reconciles them into every open bucket
/// 2. Ticks a boundary timer and closes buckets whose window elapsed
///
/// Runs until the channel is closed (producer shutdown). Buckets still
/// open at shutdown stay open; a later run's boundary pass closes them.
pub async fn run_aggregation_loop(
    mut rx: mpsc::Receiver<ActivationEvent>,
    engine: Arc<AggregationEngine>,
    clock: Arc<IntervalClock>,
    resolver: Arc<dyn GroupResolver>,
    boundary_tick_ms: u64,
) {
    log::info!("🚀 Starting aggregation loop");
    log::info!("   ├─ Boundary tick: {}ms", boundary_tick_ms);
    log::info!("   └─ Waiting for events...");

    let mut tracker = BoundaryTracker::new(clock.intervals(), Utc::now().naive_utc());
    let mut boundary_timer = interval(Duration::from_millis(boundary_tick_ms));
    let mut event_count = 0u64;
    let mut last_log_time = std::time::Instant::now();
    let channel_capacity = 10_000; // Match EVENT_CHANNEL_BUFFER default

    loop {
        tokio::select! {
            maybe_event = rx.recv() => {
                // Channel closed (producer shutdown)
                let Some(event) = maybe_event else {
                    log::warn!("⚠️  Event channel closed, stopping aggregation loop");
                    break;
                };

                match resolver.groups_for(&event.session()).await {
                    Ok(groups) => {
                        let open = clock.open_intervals_for(event.timestamp);
                        if let Err(e) = engine.reconcile(&event, &open, &groups) {
                            log::warn!("⚠️  Event '{}' by {} not fully reconciled: {}",
                                event.item_name, event.user_name, e);
                        }
                    }
                    Err(e) => {
                        log::warn!("⚠️  Group resolution failed for {}: {}", event.user_name, e);
                    }
                }

                event_count += 1;

                // Log throughput every 10 seconds
                if last_log_time.elapsed().as_secs() >= 10 {
                    let events_per_sec = event_count as f64 / last_log_time.elapsed().as_secs_f64();
                    log::info!("📊 Ingestion rate: {:.1} events/sec (total: {})", events_per_sec, event_count);
                    last_log_time = std::time::Instant::now();
                    event_count = 0;

                    let channel_usage = rx.len();
                    if channel_usage > channel_capacity / 2 {
                        log::warn!("⚠️  Channel usage high: {}/{} ({}%)",
                            channel_usage, channel_capacity,
                            (channel_usage * 100) / channel_capacity);
                    }
                }
            }

            _ = boundary_timer.tick() => {
                for (iv, start) in tracker.advance(Utc::now().naive_utc()) {
                    match engine.close_interval(iv, start.date(), start.time()) {
                        Ok(_) => {
                            log::info!("🔒 Closed {} bucket {} {}", iv.as_str(), start.date(), start.time());
                        }
                        Err(e) => {
                            log::error!("❌ Failed to close {} bucket {} {}: {}",
                                iv.as_str(), start.date(), start.time(), e);
                        }
                    }
                }
            }
        }
    }

    log::info!("✅ Aggregation loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggr::groups::StaticGroupResolver;
    use crate::aggr::repository::RepositoryOps;
    use crate::aggr::sqlite::SqliteAggregationRepository;
    use chrono::{NaiveDate, TimeZone};
    use std::collections::HashSet;

    #[test]
    fn test_boundary_tracker_reports_rollover() {
        let start = NaiveDate::from_ymd_opt(2012, 1, 16)
            .unwrap()
            .and_hms_opt(17, 24, 4)
            .unwrap();
        let mut tracker = BoundaryTracker::new(&AggregationInterval::all(), start);

        // still inside both buckets
        let expired = tracker.advance(start + chrono::Duration::seconds(30));
        assert!(expired.is_empty());

        // past the five-minute boundary, still inside the hour
        let expired = tracker.advance(
            NaiveDate::from_ymd_opt(2012, 1, 16)
                .unwrap()
                .and_hms_opt(17, 25, 1)
                .unwrap(),
        );
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, AggregationInterval::FiveMinute);
        assert_eq!(
            expired[0].1.time(),
            chrono::NaiveTime::from_hms_opt(17, 20, 0).unwrap()
        );

        // past the hour boundary
        let expired = tracker.advance(
            NaiveDate::from_ymd_opt(2012, 1, 16)
                .unwrap()
                .and_hms_opt(18, 0, 0)
                .unwrap(),
        );
        assert_eq!(expired.len(), 2);
    }

    #[test]
    fn test_boundary_tracker_idempotent_within_bucket() {
        let start = NaiveDate::from_ymd_opt(2012, 1, 16)
            .unwrap()
            .and_hms_opt(17, 21, 0)
            .unwrap();
        let mut tracker = BoundaryTracker::new(&AggregationInterval::all(), start);

        assert!(tracker.advance(start).is_empty());
        assert!(tracker.advance(start + chrono::Duration::seconds(1)).is_empty());
    }

    #[tokio::test]
    async fn test_loop_reconciles_received_events() {
        let repo = Arc::new(SqliteAggregationRepository::open_in_memory().unwrap());
        let engine = Arc::new(AggregationEngine::new(repo.clone()));
        let clock = Arc::new(IntervalClock::default());

        let mut memberships = HashMap::new();
        memberships.insert(
            "drew".to_string(),
            HashSet::from(["local:Group A".to_string()]),
        );
        let resolver: Arc<dyn GroupResolver> = Arc::new(StaticGroupResolver::new(memberships));

        let (tx, rx) = mpsc::channel(100);
        let handle = tokio::spawn(run_aggregation_loop(rx, engine, clock, resolver, 60_000));

        let timestamp = Utc.timestamp_millis_opt(1326734644000).unwrap();
        for item in ["joe", "john"] {
            tx.send(ActivationEvent {
                timestamp,
                user_name: "drew".to_string(),
                item_name: item.to_string(),
            })
            .await
            .unwrap();
        }

        // give the loop time to process
        tokio::time::sleep(Duration::from_millis(200)).await;

        let record = repo
            .find_one(
                NaiveDate::from_ymd_opt(2012, 1, 16).unwrap(),
                chrono::NaiveTime::from_hms_opt(17, 20, 0).unwrap(),
                AggregationInterval::FiveMinute,
                "local:Group A",
            )
            .unwrap()
            .expect("event should have created the bucket record");
        assert_eq!(record.total_count(), 2);
        assert_eq!(record.unique_count(), 2);

        drop(tx);
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }
}
