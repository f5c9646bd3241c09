//! Query error types
//!
//! Every variant is fatal to the single query that raised it.

use thiserror::Error;

use logscope_backend::BackendError;

/// Errors that can occur while elaborating, compiling or running a query
#[derive(Error, Debug)]
pub enum QueryError {
    /// Range start is after its end
    #[error("Invalid time range: start {start} is after end {end}")]
    InvalidTimeRange { start: i64, end: i64 },

    /// Requested or derived bucket resolution is unusable
    #[error("Bucket size error: {0}")]
    BucketSize(String),

    /// Bucket duration has no backend duration literal
    #[error("Bucket duration of {0}ms cannot be written as a duration literal")]
    NonIntegralDuration(i64),

    /// Filter shape the backend cannot express
    #[error("Unsupported filter: {0}")]
    UnsupportedFilter(String),

    /// Backend response violated the status/shape contract
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Result row is missing a required field
    #[error("Malformed row: {0}")]
    MalformedRow(String),

    /// Backend returned data outside the requested window or bucket set
    #[error("Range violation: {0}")]
    RangeViolation(String),

    /// Local totals disagree with backend statistics
    #[error("Reconciliation error: {0}")]
    Reconciliation(String),

    /// Transport-level failure talking to the backend
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Result type alias for query operations
pub type QueryResult<T> = Result<T, QueryError>;
