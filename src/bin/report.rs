//! Popularity report over the stored aggregation buckets
//!
//! Prints report rows as JSONL to stdout, or writes them to a file when
//! REPORT_OUTPUT_PATH is set.
//!
//! Environment variables:
//!   EVENTFLOW_DB_PATH - SQLite database path
//!   REPORT_DAYS - Days back from the end date, inclusive (default: 30, max: 365)
//!   REPORT_END_DATE - End date YYYY-MM-DD (default: today)
//!   REPORT_INTERVAL - Interval width to aggregate, "5m" or "1h" (default: 1h)
//!   REPORT_SIZE_LIMIT - Maximum number of rows (default: 100)
//!   REPORT_OUTPUT_PATH - JSONL output file (default: stdout)

use chrono::{NaiveDate, Utc};
use dotenv::dotenv;
use eventflow::aggr::{
    clock::AggregationInterval,
    config::AggregatorConfig,
    report::{build_popularity_report, write_report_jsonl, DEFAULT_REPORT_DAYS, DEFAULT_SIZE_LIMIT},
    sqlite::SqliteAggregationRepository,
};
use log::info;
use std::env;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::init();

    let config = AggregatorConfig::from_env();

    let days: i64 = env::var("REPORT_DAYS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_REPORT_DAYS);

    let end = env::var("REPORT_END_DATE")
        .ok()
        .and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
        .unwrap_or_else(|| Utc::now().date_naive());

    let interval = env::var("REPORT_INTERVAL")
        .ok()
        .and_then(|s| AggregationInterval::from_str(&s))
        .unwrap_or(AggregationInterval::Hour);

    let size_limit: usize = env::var("REPORT_SIZE_LIMIT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_SIZE_LIMIT);

    info!(
        "📊 Building {} popularity report: {} days back from {}",
        interval.as_str(),
        days,
        end
    );

    let repo = SqliteAggregationRepository::open(&config.db_path)?;
    let entries = build_popularity_report(&repo, interval, end, days, size_limit)?;

    match env::var("REPORT_OUTPUT_PATH").ok() {
        Some(path) => write_report_jsonl(&path, &entries)?,
        None => {
            for entry in &entries {
                println!("{}", serde_json::to_string(entry)?);
            }
        }
    }

    info!("✅ Report complete: {} rows", entries.len());
    Ok(())
}
