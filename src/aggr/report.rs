//! Per-name popularity report over a days-back window, with JSONL export
//!
//! Consumes the repository's reporting queries only; the aggregation hot
//! path never runs these.

use crate::aggr::clock::AggregationInterval;
use crate::aggr::error::AggregationError;
use crate::aggr::repository::RepositoryOps;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

pub const DEFAULT_REPORT_DAYS: i64 = 30;
pub const MAX_REPORT_DAYS: i64 = 365;
pub const DEFAULT_SIZE_LIMIT: usize = 100;

/// One report row: an item name and its merged activation count across
/// every bucket in the window
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PopularityEntry {
    pub item_name: String,
    pub count: u64,
}

/// Build the popularity report for `days` calendar days counting backwards
/// from `end` (inclusive).
///
/// Sums each name's per-bucket counts across all groups and days of a
/// single interval width - mixing widths would count the same events
/// twice. Rows are sorted by count descending (name ascending on ties) and
/// truncated to `size_limit`. `days` is clamped to [0, 365].
pub fn build_popularity_report(
    repo: &dyn RepositoryOps,
    interval: AggregationInterval,
    end: NaiveDate,
    days: i64,
    size_limit: usize,
) -> Result<Vec<PopularityEntry>, AggregationError> {
    let days = days.clamp(0, MAX_REPORT_DAYS);
    let start = end - chrono::Duration::days(days);

    let records = repo.find_by_date_range_filtered(start, end, interval)?;
    log::debug!(
        "Report window {} .. {} ({}): {} bucket records",
        start,
        end,
        interval.as_str(),
        records.len()
    );

    let mut totals: HashMap<String, u64> = HashMap::new();
    for record in &records {
        for name in record.counted_names() {
            *totals.entry(name.to_string()).or_insert(0) += record.count_for(name);
        }
    }

    let mut entries: Vec<PopularityEntry> = totals
        .into_iter()
        .map(|(item_name, count)| PopularityEntry { item_name, count })
        .collect();
    entries.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.item_name.cmp(&b.item_name))
    });
    entries.truncate(size_limit);

    Ok(entries)
}

/// Write report rows as JSONL, one entry per line, replacing any existing
/// file
pub fn write_report_jsonl(
    path: impl AsRef<Path>,
    entries: &[PopularityEntry],
) -> Result<(), AggregationError> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path.as_ref())?;
    let mut writer = BufWriter::new(file);

    for entry in entries {
        let json = serde_json::to_string(entry)?;
        writeln!(writer, "{}", json)?;
    }
    writer.flush()?;

    log::info!(
        "📝 Wrote {} report rows to {}",
        entries.len(),
        path.as_ref().display()
    );
    Ok(())
}
