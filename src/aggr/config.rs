//! Aggregator configuration from environment variables

use std::env;

/// Configuration for the aggregation runtime
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Path to SQLite database file
    pub db_path: String,

    /// Channel buffer size for event ingestion (events)
    pub channel_buffer: usize,

    /// Interval boundary check period in milliseconds
    pub boundary_tick_ms: u64,

    /// Optional path to the group membership JSON file
    pub groups_file: Option<String>,

    /// Master enable flag for the runtime binary
    pub enabled: bool,
}

impl AggregatorConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `EVENTFLOW_DB_PATH` (default: /var/lib/eventflow/eventflow.db)
    /// - `EVENT_CHANNEL_BUFFER` (default: 10000)
    /// - `BOUNDARY_TICK_INTERVAL_MS` (default: 1000)
    /// - `EVENTFLOW_GROUPS_FILE` (default: unset)
    /// - `ENABLE_AGGREGATOR` (default: false)
    pub fn from_env() -> Self {
        Self {
            db_path: env::var("EVENTFLOW_DB_PATH")
                .unwrap_or_else(|_| "/var/lib/eventflow/eventflow.db".to_string()),

            channel_buffer: env::var("EVENT_CHANNEL_BUFFER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10_000),

            boundary_tick_ms: env::var("BOUNDARY_TICK_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1_000),

            groups_file: env::var("EVENTFLOW_GROUPS_FILE").ok(),

            enabled: env::var("ENABLE_AGGREGATOR")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(false),
        }
    }
}
