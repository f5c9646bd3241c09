//! Query core for logscope
//!
//! This crate turns a time range and a set of structured queries into
//! backend queries, drives them to completion and reconciles the results
//! into log entries and histogram series.

mod buckets;
mod compiler;
mod error;
mod orchestrator;
mod reconcile;
mod runner;
mod session;

#[cfg(test)]
mod testing;

pub use buckets::{
    BUCKET_CATALOG, MAX_BUCKET_COUNT, MIN_BUCKET_COUNT, catalog, check_catalog, elaborate,
    elaborate_with,
};
pub use compiler::{
    FETCH_RESULT_LIMIT, HISTOGRAM_RESULT_LIMIT, compile, duration_literal, result_limit,
};
pub use error::{QueryError, QueryResult};
pub use orchestrator::{MIN_SET_BUCKET_MS, QuerySet};
pub use reconcile::{EntryReconciler, HistogramReconciler, format_backend_timestamp};
pub use runner::{Backoff, DeliveryPolicy, PollConfig, QueryDescriptor, QueryRunner};
pub use session::Session;

// Re-export types used in our public API
pub use logscope_types::{
    BucketSpec, ClientRequest, DataSourceFilter, DataSourceQuery, ElaboratedTimeRange,
    HistogramSeries, LogEntry, PropertySelector, QueryStatistics, ScalarValue, ServerMessage,
    TimeRange,
};
