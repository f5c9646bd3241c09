//! Log-query backend client for logscope
//!
//! This crate defines the outbound "start query, poll for results" protocol
//! as a trait, its wire types, and an HTTP implementation.

mod client;
mod error;
mod protocol;

pub use client::{HttpBackend, HttpBackendConfig};
pub use error::BackendError;
pub use protocol::{
    GetQueryResultsResponse, LogsBackend, QueryStatus, ResultField, ResultRow, ScanStatistics,
    StartQueryRequest, StartQueryResponse,
};

// Re-export types that are used in our public API
pub use logscope_types::TimeRange;
