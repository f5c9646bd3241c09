//! Shared types for logscope
//!
//! This crate contains the data model shared by the query core, the backend
//! client and the binary, plus the messages exchanged with the UI layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Time Types
// ============================================================================

/// Absolute time range in epoch milliseconds, both ends inclusive
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Build a range from two instants
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self::new(start.timestamp_millis(), end.timestamp_millis())
    }

    /// Total span in milliseconds (zero for an inverted range, saturating)
    pub fn span_ms(&self) -> i64 {
        self.end.saturating_sub(self.start).max(0)
    }

    /// Check the `start <= end` invariant
    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }

    /// Check if a timestamp falls inside the range
    pub fn contains(&self, timestamp_ms: i64) -> bool {
        timestamp_ms >= self.start && timestamp_ms <= self.end
    }
}

/// One rung of the bucket granularity ladder
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketSpec {
    /// Short label, e.g. "5m"
    pub name: &'static str,

    /// Bucket width
    #[serde(rename = "durationInMs")]
    pub duration_ms: i64,

    /// chrono format string used to label a bucket of this width
    pub display_format: &'static str,
}

impl BucketSpec {
    pub const fn new(name: &'static str, duration_ms: i64, display_format: &'static str) -> Self {
        Self {
            name,
            duration_ms,
            display_format,
        }
    }

    /// Render a bucket boundary with this spec's display format
    pub fn format_timestamp(&self, timestamp_ms: i64) -> String {
        match DateTime::<Utc>::from_timestamp_millis(timestamp_ms) {
            Some(ts) => ts.format(self.display_format).to_string(),
            None => timestamp_ms.to_string(),
        }
    }
}

/// A time range snapped to bucket boundaries, with every boundary listed
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElaboratedTimeRange {
    /// Snapped range; `end` is the last boundary
    pub time_range: TimeRange,

    /// Chosen granularity
    pub bucket_spec: BucketSpec,

    /// Ascending bucket start boundaries
    pub timestamps: Vec<i64>,
}

impl ElaboratedTimeRange {
    /// Index of a bucket boundary, if it is one of ours
    pub fn bucket_index(&self, timestamp_ms: i64) -> Option<usize> {
        self.timestamps.binary_search(&timestamp_ms).ok()
    }

    pub fn bucket_count(&self) -> usize {
        self.timestamps.len()
    }
}

// ============================================================================
// Query Types
// ============================================================================

/// One or more property paths; a compound selector means "any of these"
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertySelector {
    Single(String),
    AnyOf(Vec<String>),
}

impl PropertySelector {
    pub fn single(path: impl Into<String>) -> Self {
        Self::Single(path.into())
    }

    /// Property paths in declaration order
    pub fn paths(&self) -> &[String] {
        match self {
            Self::Single(path) => std::slice::from_ref(path),
            Self::AnyOf(paths) => paths,
        }
    }
}

impl From<&str> for PropertySelector {
    fn from(path: &str) -> Self {
        Self::Single(path.to_string())
    }
}

/// A scalar filter operand
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Bool(bool),
    Number(serde_json::Number),
    String(String),
}

impl From<&str> for ScalarValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<i64> for ScalarValue {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<bool> for ScalarValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Structured filter applied to a data source query
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DataSourceFilter {
    /// Include or exclude a set of values on one or more properties
    Match {
        selector: PropertySelector,
        include: bool,
        exact: bool,
        values: Vec<ScalarValue>,
    },
    /// Property presence test
    Exists {
        selector: PropertySelector,
        exists: bool,
        #[serde(default)]
        consider_nulls: bool,
    },
}

/// A single query kind in a query set
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DataSourceQuery {
    FetchEntries {
        #[serde(default)]
        filters: Vec<DataSourceFilter>,
    },
    BuildHistogram {
        #[serde(default)]
        filters: Vec<DataSourceFilter>,
        #[serde(default)]
        breakdown: Option<PropertySelector>,
        #[serde(default)]
        saved_search_id: Option<String>,
    },
}

impl DataSourceQuery {
    pub fn filters(&self) -> &[DataSourceFilter] {
        match self {
            Self::FetchEntries { filters } | Self::BuildHistogram { filters, .. } => filters,
        }
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FetchEntries { .. } => "fetchEntries",
            Self::BuildHistogram { .. } => "buildHistogram",
        }
    }
}

/// Scan statistics reported by the backend when a query completes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryStatistics {
    pub records_scanned: u64,
    pub records_matched: u64,
    pub num_results: u64,
}

// ============================================================================
// Log Types
// ============================================================================

/// Log severity level
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
    Unknown,
}

impl LogLevel {
    /// Parse log level from common formats
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" | "trc" | "trce" => Self::Trace,
            "debug" | "dbg" | "debg" => Self::Debug,
            "info" | "inf" | "information" => Self::Info,
            "warn" | "warning" | "wrn" => Self::Warn,
            "error" | "err" | "erro" => Self::Error,
            "fatal" | "panic" | "critical" | "crit" | "ftl" => Self::Fatal,
            _ => Self::Unknown,
        }
    }

    /// Map numeric (bunyan/pino style) levels
    pub fn from_number(num: u64) -> Self {
        match num {
            0..=10 => Self::Trace,
            11..=20 => Self::Debug,
            21..=30 => Self::Info,
            31..=40 => Self::Warn,
            41..=50 => Self::Error,
            _ => Self::Fatal,
        }
    }

    /// Short display string (3 chars)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "TRC",
            Self::Debug => "DBG",
            Self::Info => "INF",
            Self::Warn => "WRN",
            Self::Error => "ERR",
            Self::Fatal => "FTL",
            Self::Unknown => "???",
        }
    }
}

/// A single log entry returned by a fetch query
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LogEntry {
    /// Sequence number assigned in arrival order within one run
    pub id: u64,

    /// Event timestamp
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    /// Parsed message: a JSON document, or a string for plain-text lines
    pub payload: Value,
}

impl LogEntry {
    pub fn new(id: u64, timestamp: DateTime<Utc>, payload: Value) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }

    /// Get the message content (from JSON field or raw line)
    pub fn message(&self) -> String {
        match &self.payload {
            Value::String(s) => s.clone(),
            Value::Object(fields) => {
                for key in &["message", "msg", "log", "text", "body"] {
                    if let Some(Value::String(s)) = fields.get(*key) {
                        return s.clone();
                    }
                }
                self.payload.to_string()
            }
            other => other.to_string(),
        }
    }

    /// Detect the severity from common level fields
    pub fn level(&self) -> LogLevel {
        let Value::Object(fields) = &self.payload else {
            return LogLevel::Unknown;
        };

        let level_fields = [
            "level",
            "lvl",
            "severity",
            "log.level",
            "loglevel",
            "log_level",
            "Level",
            "LEVEL",
        ];

        for field in level_fields {
            match fields.get(field) {
                Some(Value::String(s)) => return LogLevel::from_str(s),
                Some(Value::Number(n)) => {
                    if let Some(num) = n.as_u64() {
                        return LogLevel::from_number(num);
                    }
                }
                _ => {}
            }
        }

        LogLevel::Unknown
    }
}

/// Counts for one breakdown value, aligned with `ElaboratedTimeRange::timestamps`
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistogramSeries {
    /// Breakdown value, `None` for rows without the breakdown property
    pub breakdown: Option<String>,

    /// One slot per bucket; `None` means no data for that bucket
    pub counts: Vec<Option<u64>>,
}

impl HistogramSeries {
    pub fn total(&self) -> u64 {
        self.counts.iter().flatten().sum()
    }
}

// ============================================================================
// Application Protocol
// ============================================================================

/// Requests sent by the UI layer
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientRequest {
    Query {
        time_range: TimeRange,
        queries: Vec<DataSourceQuery>,
    },
    StopQuery,
}

/// Messages sent back to the UI layer
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    SendEntries {
        entries: Vec<LogEntry>,
        #[serde(skip_serializing_if = "Option::is_none")]
        stats: Option<QueryStatistics>,
    },
    SendHistogram {
        elaborated_time_range: ElaboratedTimeRange,
        histogram: Vec<HistogramSeries>,
        done: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        saved_search_id: Option<String>,
    },
    DoneLoadingEntries {
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
}
