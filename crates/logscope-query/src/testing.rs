//! In-memory backend for tests

use std::collections::VecDeque;

use async_trait::async_trait;
use logscope_backend::{
    BackendError, GetQueryResultsResponse, LogsBackend, QueryStatus, ResultRow, ScanStatistics,
    StartQueryRequest, StartQueryResponse,
};
use parking_lot::Mutex;

use crate::reconcile::format_backend_timestamp;

/// Poll responses for every query whose text contains `needle`
struct Script {
    needle: String,
    polls: VecDeque<GetQueryResultsResponse>,
}

/// Backend that replays scripted poll responses
///
/// Queries are routed to the first script whose needle occurs in the query
/// text; the query id is `q-<script index>`. Once a script runs dry it keeps
/// reporting `Running` with no rows.
pub(crate) struct ScriptedBackend {
    issue_ids: bool,
    scripts: Mutex<Vec<Script>>,
    submitted: Mutex<Vec<StartQueryRequest>>,
    stopped: Mutex<Vec<String>>,
    polls: Mutex<usize>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            issue_ids: true,
            scripts: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
            stopped: Mutex::new(Vec::new()),
            polls: Mutex::new(0),
        }
    }

    pub fn without_query_id() -> Self {
        Self {
            issue_ids: false,
            ..Self::new()
        }
    }

    pub fn script(&self, needle: &str, polls: Vec<GetQueryResultsResponse>) {
        self.scripts.lock().push(Script {
            needle: needle.to_string(),
            polls: polls.into(),
        });
    }

    pub fn poll_count(&self) -> usize {
        *self.polls.lock()
    }

    pub fn submitted(&self) -> Vec<StartQueryRequest> {
        self.submitted.lock().clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.stopped.lock().clone()
    }
}

#[async_trait]
impl LogsBackend for ScriptedBackend {
    async fn start_query(
        &self,
        request: StartQueryRequest,
    ) -> Result<StartQueryResponse, BackendError> {
        let index = self
            .scripts
            .lock()
            .iter()
            .position(|script| request.query_string.contains(&script.needle));
        self.submitted.lock().push(request);

        let Some(index) = index else {
            return Err(BackendError::Transport("no script for query".to_string()));
        };

        Ok(StartQueryResponse {
            query_id: self.issue_ids.then(|| format!("q-{index}")),
        })
    }

    async fn get_query_results(
        &self,
        query_id: &str,
    ) -> Result<GetQueryResultsResponse, BackendError> {
        *self.polls.lock() += 1;

        let index: usize = query_id
            .strip_prefix("q-")
            .and_then(|i| i.parse().ok())
            .ok_or_else(|| BackendError::Transport(format!("unknown query {query_id}")))?;

        let next = self
            .scripts
            .lock()
            .get_mut(index)
            .and_then(|script| script.polls.pop_front());

        Ok(next.unwrap_or_else(|| running(vec![])))
    }

    async fn stop_query(&self, query_id: &str) -> Result<(), BackendError> {
        self.stopped.lock().push(query_id.to_string());
        Ok(())
    }
}

pub(crate) fn poll(
    status: Option<QueryStatus>,
    results: Vec<ResultRow>,
    statistics: Option<ScanStatistics>,
) -> GetQueryResultsResponse {
    GetQueryResultsResponse {
        status,
        results,
        statistics,
    }
}

fn stats(matched: u64, scanned: u64) -> ScanStatistics {
    ScanStatistics {
        records_matched: matched as f64,
        records_scanned: scanned as f64,
        bytes_scanned: (scanned * 100) as f64,
    }
}

/// `Running` poll; rows carry placeholder statistics
pub(crate) fn running(rows: Vec<ResultRow>) -> GetQueryResultsResponse {
    let statistics = Some(stats(rows.len() as u64, 10));
    poll(Some(QueryStatus::Running), rows, statistics)
}

pub(crate) fn complete(rows: Vec<ResultRow>, matched: u64, scanned: u64) -> GetQueryResultsResponse {
    poll(Some(QueryStatus::Complete), rows, Some(stats(matched, scanned)))
}

pub(crate) fn entry_row(ptr: &str, timestamp_ms: i64, message: &str) -> ResultRow {
    [
        ("@timestamp", format_backend_timestamp(timestamp_ms)),
        ("@message", message.to_string()),
        ("@ptr", ptr.to_string()),
    ]
    .into_iter()
    .collect()
}

pub(crate) fn bucket_row(timestamp_ms: i64, count: u64, breakdown: Option<&str>) -> ResultRow {
    let mut row: ResultRow = [
        ("bucket", format_backend_timestamp(timestamp_ms)),
        ("count", count.to_string()),
    ]
    .into_iter()
    .collect();
    if let Some(value) = breakdown {
        row.0.push(logscope_backend::ResultField::new("breakdown", value));
    }
    row
}
