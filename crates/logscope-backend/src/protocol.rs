use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;

use logscope_types::TimeRange;

use crate::BackendError;

/// Asynchronous log-query backend
///
/// A query is submitted once and then polled by id until it reaches a
/// terminal status. Implementations only move bytes; status and shape
/// validation is left to the caller.
#[async_trait]
pub trait LogsBackend: Send + Sync {
    /// Submit a query; the response should carry the backend's query id
    async fn start_query(
        &self,
        request: StartQueryRequest,
    ) -> Result<StartQueryResponse, BackendError>;

    /// Fetch the current status and rows of a submitted query
    async fn get_query_results(
        &self,
        query_id: &str,
    ) -> Result<GetQueryResultsResponse, BackendError>;

    /// Ask the backend to stop working on a query
    async fn stop_query(&self, query_id: &str) -> Result<(), BackendError>;
}

/// Everything needed to submit one query
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StartQueryRequest {
    pub log_group_names: Vec<String>,
    pub time_range: TimeRange,
    pub query_string: String,
    pub limit: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartQueryResponse {
    #[serde(default)]
    pub query_id: Option<String>,
}

/// Query status as reported by the backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum QueryStatus {
    Scheduled,
    Running,
    Complete,
    Failed,
    Cancelled,
    Timeout,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Scheduled => "Scheduled",
            Self::Running => "Running",
            Self::Complete => "Complete",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
            Self::Timeout => "Timeout",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// A single `field = value` cell of a result row
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ResultField {
    pub field: String,
    #[serde(default)]
    pub value: Option<String>,
}

impl ResultField {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: Some(value.into()),
        }
    }
}

/// One result row, as an ordered list of cells
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct ResultRow(pub Vec<ResultField>);

impl ResultRow {
    /// Value of the first cell named `field`
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|cell| cell.field == field)
            .and_then(|cell| cell.value.as_deref())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ResultRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(field, value)| ResultField::new(field, value))
                .collect(),
        )
    }
}

/// Scan statistics; the backend reports them as doubles
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStatistics {
    #[serde(default)]
    pub records_matched: f64,
    #[serde(default)]
    pub records_scanned: f64,
    #[serde(default)]
    pub bytes_scanned: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetQueryResultsResponse {
    #[serde(default)]
    pub status: Option<QueryStatus>,
    #[serde(default)]
    pub results: Vec<ResultRow>,
    #[serde(default)]
    pub statistics: Option<ScanStatistics>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_deserialize() {
        let json = r#"{
            "status": "Running",
            "results": [[
                {"field": "@timestamp", "value": "2024-01-15 10:30:00.000"},
                {"field": "@ptr", "value": "abc"}
            ]],
            "statistics": {"recordsMatched": 1.0, "recordsScanned": 20.0, "bytesScanned": 512.0}
        }"#;
        let response: GetQueryResultsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.status, Some(QueryStatus::Running));
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].get("@ptr"), Some("abc"));
        assert_eq!(response.results[0].get("@message"), None);
        assert_eq!(response.statistics.unwrap().records_scanned, 20.0);
    }

    #[test]
    fn test_unknown_status() {
        let response: GetQueryResultsResponse =
            serde_json::from_str(r#"{"status": "Exploded"}"#).unwrap();
        assert_eq!(response.status, Some(QueryStatus::Unknown));
        assert!(response.results.is_empty());
        assert!(response.statistics.is_none());
    }

    #[test]
    fn test_missing_query_id() {
        let response: StartQueryResponse = serde_json::from_str("{}").unwrap();
        assert!(response.query_id.is_none());
    }
}
