//! # Bucketed Event Aggregation
//!
//! Maintains running counts of activation events, bucketed simultaneously
//! across multiple fixed-width intervals (five-minute, hourly) and
//! partitioned by organizational group, with distinct-name deduplication
//! inside each open bucket.
//!
//! ## Architecture
//!
//! ```text
//! ActivationEvent
//!     ↓
//! GroupResolver (session → applicable groups)
//!     ↓
//! IntervalClock (timestamp → open buckets + elapsed durations)
//!     ↓
//! AggregationEngine::reconcile()
//!     ↓
//! AggregationRepository (SQLite: one row per bucket, unique natural key)
//!
//! boundary timer → AggregationEngine::close_interval() → buckets Closed
//! ```
//!
//! Key principle: each interval width aggregates independently from raw
//! events. Hourly counts are never derived by summing five-minute buckets.
//!
//! ## Module Organization
//!
//! - `types` - Core data structures (ActivationEvent, BucketCoordinate)
//! - `clock` - Interval catalog and bucket resolution
//! - `record` - Per-bucket counter record and open/closed lifecycle
//! - `engine` - Reconciliation and boundary closing
//! - `repository` - Store contract the engine runs against
//! - `sqlite` - SQLite repository implementation
//! - `groups` - Group membership resolution
//! - `ingestion` - Async channel loop driving the engine
//! - `report` - Popularity report over the stored buckets
//! - `config` - Environment configuration
//! - `error` - Error taxonomy

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod groups;
pub mod ingestion;
pub mod record;
pub mod report;
pub mod repository;
pub mod sqlite;
pub mod types;

// Re-export commonly used types
pub use clock::{AggregationInterval, IntervalClock, IntervalInfo};
pub use config::AggregatorConfig;
pub use engine::AggregationEngine;
pub use error::AggregationError;
pub use groups::{GroupResolver, StaticGroupResolver};
pub use ingestion::{run_aggregation_loop, BoundaryTracker};
pub use record::{ActivationAggregation, BucketState};
pub use report::{build_popularity_report, write_report_jsonl, PopularityEntry};
pub use repository::{AggregationRepository, RepositoryOps};
pub use sqlite::SqliteAggregationRepository;
pub use types::{ActivationEvent, BucketCoordinate, EventSession};
