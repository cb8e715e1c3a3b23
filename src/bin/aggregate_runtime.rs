//! Aggregation Runtime
//!
//! This binary wires the full pipeline together:
//! - Opens the SQLite database and bootstraps the schema
//! - Loads group memberships for the resolver
//! - Reads activation events as JSONL from stdin into an mpsc channel
//! - Runs the aggregation loop (reconciliation + boundary closing)
//!
//! Usage:
//!   cargo run --release --bin aggregate_runtime < events.jsonl
//!
//! Environment variables:
//!   EVENTFLOW_DB_PATH - SQLite database path (default: /var/lib/eventflow/eventflow.db)
//!   ENABLE_AGGREGATOR - Master switch (default: false)
//!   EVENT_CHANNEL_BUFFER - Channel size (default: 10000)
//!   BOUNDARY_TICK_INTERVAL_MS - Boundary check period (default: 1000)
//!   EVENTFLOW_GROUPS_FILE - Group membership JSON file

use dotenv::dotenv;
use eventflow::aggr::{
    clock::IntervalClock,
    config::AggregatorConfig,
    engine::AggregationEngine,
    groups::{GroupResolver, StaticGroupResolver},
    ingestion::run_aggregation_loop,
    sqlite::SqliteAggregationRepository,
    types::ActivationEvent,
};
use log::{error, info, warn};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::init();

    info!("🚀 Eventflow Aggregation Runtime");

    let config = AggregatorConfig::from_env();

    if !config.enabled {
        info!("⚠️  Aggregator is DISABLED (set ENABLE_AGGREGATOR=true to activate)");
        info!("   └─ Exiting gracefully...");
        return Ok(());
    }

    info!("✅ Aggregator ENABLED");
    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Channel buffer: {} events", config.channel_buffer);
    info!("   ├─ Boundary tick: {}ms", config.boundary_tick_ms);
    info!(
        "   └─ Groups file: {}",
        config.groups_file.as_deref().unwrap_or("(none)")
    );

    // Initialize database (idempotent schema bootstrap)
    let repo = Arc::new(SqliteAggregationRepository::open(&config.db_path)?);
    info!("✅ Database initialized");

    let resolver: Arc<dyn GroupResolver> = match &config.groups_file {
        Some(path) => Arc::new(StaticGroupResolver::from_json_file(path)?),
        None => {
            warn!("⚠️  No EVENTFLOW_GROUPS_FILE set - every event resolves to zero groups");
            Arc::new(StaticGroupResolver::empty())
        }
    };

    let engine = Arc::new(AggregationEngine::new(repo));
    let clock = Arc::new(IntervalClock::default());

    let (tx, rx) = mpsc::channel::<ActivationEvent>(config.channel_buffer);
    info!("✅ Event channel created (buffer: {})", config.channel_buffer);

    // stdin JSONL producer: one ActivationEvent per line
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match ActivationEvent::from_jsonl(line) {
                        Ok(event) => {
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("⚠️  Skipping malformed event line: {}", e),
                    }
                }
                Ok(None) => break, // EOF
                Err(e) => {
                    error!("❌ stdin read failed: {}", e);
                    break;
                }
            }
        }
        // dropping tx closes the channel and stops the loop
    });

    run_aggregation_loop(rx, engine, clock, resolver, config.boundary_tick_ms).await;

    info!("✅ Runtime shut down");
    Ok(())
}
