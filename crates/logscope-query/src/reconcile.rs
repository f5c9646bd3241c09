//! Result reconciliation
//!
//! Raw backend rows become either deduplicated log entries or per-bucket
//! counts. Anything that does not line up with the requested window is an
//! error, never clamped.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, NaiveDateTime, Utc};
use logscope_backend::ResultRow;
use logscope_types::{
    ElaboratedTimeRange, HistogramSeries, LogEntry, QueryStatistics, TimeRange,
};
use serde_json::Value;

use crate::compiler::{
    BREAKDOWN_FIELD, BUCKET_FIELD, COUNT_FIELD, MESSAGE_FIELD, POINTER_FIELD, TIMESTAMP_FIELD,
};
use crate::error::{QueryError, QueryResult};

const BACKEND_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Format epoch milliseconds the way the backend prints timestamps
pub fn format_backend_timestamp(timestamp_ms: i64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(timestamp_ms) {
        Some(ts) => ts.format(BACKEND_TIMESTAMP_FORMAT).to_string(),
        None => timestamp_ms.to_string(),
    }
}

/// Parse a backend timestamp (UTC, space separated) or RFC 3339
fn parse_backend_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, BACKEND_TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|ts| ts.with_timezone(&Utc))
        })
}

fn required<'a>(row: &'a ResultRow, field: &str) -> QueryResult<&'a str> {
    row.get(field)
        .ok_or_else(|| QueryError::MalformedRow(format!("row is missing {field}")))
}

fn required_timestamp(row: &ResultRow, field: &str) -> QueryResult<DateTime<Utc>> {
    let raw = required(row, field)?;
    parse_backend_timestamp(raw)
        .ok_or_else(|| QueryError::MalformedRow(format!("unparseable {field} {raw:?}")))
}

/// JSON documents are kept structured, everything else stays a string
fn parse_payload(message: &str) -> Value {
    let trimmed = message.trim();
    if trimmed.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            if value.is_object() {
                return value;
            }
        }
    }
    Value::String(message.to_string())
}

// ============================================================================
// Entries
// ============================================================================

/// Builds log entries from fetch rows, dropping rows already seen
pub struct EntryReconciler {
    /// Window the query was submitted with
    window: TimeRange,

    /// Pointer ids already turned into entries
    seen: HashSet<String>,

    entries: Vec<LogEntry>,

    /// Next entry ID
    next_id: u64,
}

impl EntryReconciler {
    pub fn new(window: TimeRange) -> Self {
        Self {
            window,
            seen: HashSet::new(),
            entries: Vec::new(),
            next_id: 0,
        }
    }

    /// Add a batch; returns how many rows were new
    pub fn ingest(&mut self, rows: &[ResultRow]) -> QueryResult<usize> {
        let mut added = 0;

        for row in rows {
            let pointer = required(row, POINTER_FIELD)?;
            let message = required(row, MESSAGE_FIELD)?;
            let timestamp = required_timestamp(row, TIMESTAMP_FIELD)?;

            let timestamp_ms = timestamp.timestamp_millis();
            if !self.window.contains(timestamp_ms) {
                return Err(QueryError::RangeViolation(format!(
                    "entry at {timestamp_ms} is outside {}..={}",
                    self.window.start, self.window.end
                )));
            }

            if !self.seen.insert(pointer.to_string()) {
                continue;
            }

            self.entries
                .push(LogEntry::new(self.next_id, timestamp, parse_payload(message)));
            self.next_id += 1;
            added += 1;
        }

        Ok(added)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check the deduplicated count against the backend and hand out the entries
    pub fn finish(self, stats: Option<&QueryStatistics>) -> QueryResult<Vec<LogEntry>> {
        if let Some(stats) = stats {
            let count = self.entries.len() as u64;
            if count != stats.num_results {
                return Err(QueryError::Reconciliation(format!(
                    "received {count} distinct entries but backend reported {}",
                    stats.num_results
                )));
            }
        }
        Ok(self.entries)
    }
}

// ============================================================================
// Histogram
// ============================================================================

/// Folds bucket rows into one dense series per breakdown value
pub struct HistogramReconciler {
    elaborated: ElaboratedTimeRange,

    /// Whether rows carry a breakdown column
    with_breakdown: bool,

    /// Counts keyed by breakdown value, then bucket index
    series: BTreeMap<Option<String>, Vec<Option<u64>>>,
}

impl HistogramReconciler {
    pub fn new(elaborated: ElaboratedTimeRange, with_breakdown: bool) -> Self {
        Self {
            elaborated,
            with_breakdown,
            series: BTreeMap::new(),
        }
    }

    pub fn elaborated(&self) -> &ElaboratedTimeRange {
        &self.elaborated
    }

    /// Add a batch; counts are summed with what earlier batches delivered
    pub fn ingest(&mut self, rows: &[ResultRow]) -> QueryResult<()> {
        let buckets = self.elaborated.bucket_count();

        for row in rows {
            let bucket_ms = required_timestamp(row, BUCKET_FIELD)?.timestamp_millis();
            let index = self.elaborated.bucket_index(bucket_ms).ok_or_else(|| {
                QueryError::RangeViolation(format!(
                    "bucket {bucket_ms} is not a {} boundary in {}..={}",
                    self.elaborated.bucket_spec.name,
                    self.elaborated.time_range.start,
                    self.elaborated.time_range.end
                ))
            })?;

            let count = parse_count(required(row, COUNT_FIELD)?)?;

            let key = if self.with_breakdown {
                row.get(BREAKDOWN_FIELD).map(str::to_string)
            } else {
                None
            };

            let counts = self
                .series
                .entry(key)
                .or_insert_with(|| vec![None; buckets]);
            let total = counts[index].unwrap_or(0).checked_add(count).ok_or_else(|| {
                QueryError::MalformedRow(format!("count in bucket {bucket_ms} overflows"))
            })?;
            counts[index] = Some(total);
        }

        Ok(())
    }

    /// Current series, `None` breakdown first, then by value
    pub fn series(&self) -> Vec<HistogramSeries> {
        self.series
            .iter()
            .map(|(breakdown, counts)| HistogramSeries {
                breakdown: breakdown.clone(),
                counts: counts.clone(),
            })
            .collect()
    }
}

/// Counts come back as text, sometimes with a trailing `.0`
fn parse_count(raw: &str) -> QueryResult<u64> {
    if let Ok(count) = raw.parse::<u64>() {
        return Ok(count);
    }
    match raw.parse::<f64>() {
        Ok(count) if count >= 0.0 && count.fract() == 0.0 => Ok(count as u64),
        _ => Err(QueryError::MalformedRow(format!("unparseable count {raw:?}"))),
    }
}
