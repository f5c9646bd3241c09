//! Submit/poll state machine for a single backend query
//!
//! A query moves `Submitting -> Polling -> {Completed | Cancelled | Failed}`.
//! Row batches are handed to the caller over a channel; the runner keeps no
//! state that outlives one `run` call.

use std::sync::Arc;
use std::time::Duration;

use logscope_backend::{
    GetQueryResultsResponse, LogsBackend, QueryStatus, ResultRow, ScanStatistics,
    StartQueryRequest,
};
use logscope_types::QueryStatistics;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{QueryError, QueryResult};

/// Default delay between polls while results keep arriving
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Default growth of the poll delay after an empty poll
pub const DEFAULT_BACKOFF_FACTOR: f64 = 1.5;

/// Polling parameters
#[derive(Clone, Debug)]
pub struct PollConfig {
    pub base_interval: Duration,
    pub backoff_factor: f64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            base_interval: DEFAULT_POLL_INTERVAL,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
        }
    }
}

/// When row batches are forwarded to the caller
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryPolicy {
    /// Every non-empty batch, as soon as it is polled (aggregations)
    Incremental,
    /// Only the batch that arrives with `Complete` (entry fetches; mid-flight
    /// rows are unstable)
    OnComplete,
}

/// Poll delay that grows while nothing arrives and resets when rows do
#[derive(Clone, Debug)]
pub struct Backoff {
    base_ms: f64,
    factor: f64,
    current_ms: f64,
}

impl Backoff {
    pub fn new(config: &PollConfig) -> Self {
        let base_ms = config.base_interval.as_secs_f64() * 1000.0;
        Self {
            base_ms,
            factor: config.backoff_factor,
            current_ms: base_ms,
        }
    }

    /// Delay to wait after a poll
    pub fn next_delay(&mut self, saw_rows: bool) -> Duration {
        let delay_ms = if saw_rows {
            self.current_ms = self.base_ms;
            self.base_ms
        } else {
            let delay_ms = self.current_ms;
            self.current_ms *= self.factor;
            delay_ms
        };
        Duration::from_micros((delay_ms * 1000.0).round() as u64)
    }
}

/// Cancellation capability for a running query or query set
///
/// Stopping is idempotent and never fails. Handles for a query set stop
/// every sub-query derived from them.
#[derive(Clone, Debug, Default)]
pub struct QueryDescriptor {
    token: CancellationToken,
}

impl QueryDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop the query; takes effect before the next poll
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Token for one sub-query; stopping it leaves siblings alone
    pub(crate) fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Drives one query through submit and poll
#[derive(Clone)]
pub struct QueryRunner {
    backend: Arc<dyn LogsBackend>,
    config: PollConfig,
}

impl QueryRunner {
    pub fn new(backend: Arc<dyn LogsBackend>, config: PollConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Run a query to completion
    ///
    /// Batches are sent on `batches` according to `policy`. Returns the
    /// backend's statistics on completion, or `None` if the query was
    /// cancelled or matched nothing.
    pub async fn run(
        &self,
        request: StartQueryRequest,
        policy: DeliveryPolicy,
        cancel: CancellationToken,
        batches: mpsc::UnboundedSender<Vec<ResultRow>>,
    ) -> QueryResult<Option<QueryStatistics>> {
        if cancel.is_cancelled() {
            debug!("query cancelled before submit");
            return Ok(None);
        }

        let response = self.backend.start_query(request).await?;
        let query_id = response
            .query_id
            .ok_or_else(|| QueryError::Protocol("backend returned no query id".to_string()))?;
        info!(%query_id, ?policy, "query submitted");

        let mut backoff = Backoff::new(&self.config);

        loop {
            if cancel.is_cancelled() {
                debug!(%query_id, "query cancelled");
                self.stop_backend_query(&query_id).await;
                return Ok(None);
            }

            let polled = match self.backend.get_query_results(&query_id).await {
                Ok(response) => check_response(&response).map(|status| (response, status)),
                Err(err) => Err(err.into()),
            };
            let (response, status) = match polled {
                Ok(polled) => polled,
                Err(err) => {
                    self.stop_backend_query(&query_id).await;
                    return Err(err);
                }
            };

            let saw_rows = !response.results.is_empty();
            let num_results = response.results.len() as u64;
            let complete = status == QueryStatus::Complete;

            if saw_rows && (complete || policy == DeliveryPolicy::Incremental) {
                if batches.send(response.results).is_err() {
                    debug!(%query_id, "batch receiver closed, abandoning query");
                    self.stop_backend_query(&query_id).await;
                    return Ok(None);
                }
                tokio::task::yield_now().await;
            }

            if complete {
                let stats = completed_statistics(response.statistics, num_results);
                info!(%query_id, ?stats, "query complete");
                return Ok(stats);
            }

            let delay = backoff.next_delay(saw_rows);
            debug!(%query_id, %status, rows = num_results, ?delay, "query still running");

            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn stop_backend_query(&self, query_id: &str) {
        if let Err(err) = self.backend.stop_query(query_id).await {
            debug!(%query_id, error = %err, "failed to stop backend query");
        }
    }
}

/// Validate status and shape of a poll response
fn check_response(response: &GetQueryResultsResponse) -> QueryResult<QueryStatus> {
    let status = response
        .status
        .ok_or_else(|| QueryError::Protocol("poll response has no status".to_string()))?;

    match status {
        QueryStatus::Scheduled | QueryStatus::Running | QueryStatus::Complete => {}
        other => {
            return Err(QueryError::Protocol(format!(
                "unexpected query status {other}"
            )));
        }
    }

    if !response.results.is_empty() && response.statistics.is_none() {
        return Err(QueryError::Protocol(
            "poll response has rows but no statistics".to_string(),
        ));
    }

    Ok(status)
}

/// Statistics are dropped when nothing was scanned or matched
fn completed_statistics(
    stats: Option<ScanStatistics>,
    num_results: u64,
) -> Option<QueryStatistics> {
    let stats = stats?;
    if stats.records_matched <= 0.0 || stats.records_scanned <= 0.0 {
        return None;
    }

    Some(QueryStatistics {
        records_scanned: stats.records_scanned as u64,
        records_matched: stats.records_matched as u64,
        num_results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedBackend, complete, entry_row, poll, running};
    use logscope_types::TimeRange;
    use tokio::time::Instant;

    const BASE: Duration = Duration::from_millis(100);

    fn runner(backend: &Arc<ScriptedBackend>) -> QueryRunner {
        QueryRunner::new(
            backend.clone(),
            PollConfig {
                base_interval: BASE,
                backoff_factor: 1.5,
            },
        )
    }

    fn request() -> StartQueryRequest {
        StartQueryRequest {
            log_group_names: vec!["/app".to_string()],
            time_range: TimeRange::new(0, 60_000),
            query_string: "fields @timestamp".to_string(),
            limit: Some(5000),
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Vec<ResultRow>>) -> Vec<Vec<ResultRow>> {
        let mut batches = Vec::new();
        while let Ok(batch) = rx.try_recv() {
            batches.push(batch);
        }
        batches
    }

    #[test]
    fn test_backoff_sequence() {
        let mut backoff = Backoff::new(&PollConfig {
            base_interval: BASE,
            backoff_factor: 1.5,
        });
        assert_eq!(backoff.next_delay(false), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(false), Duration::from_millis(150));
        assert_eq!(backoff.next_delay(false), Duration::from_millis(225));
        assert_eq!(backoff.next_delay(true), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(false), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(false), Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_polls_back_off() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.script(
            "fields",
            vec![running(vec![]), running(vec![]), running(vec![]), complete(vec![], 0, 0)],
        );
        let (tx, _rx) = mpsc::unbounded_channel();

        let started = Instant::now();
        let stats = runner(&backend)
            .run(request(), DeliveryPolicy::Incremental, CancellationToken::new(), tx)
            .await
            .unwrap();

        // 100 + 150 + 225
        assert_eq!(started.elapsed(), Duration::from_millis(475));
        assert_eq!(stats, None);
        assert_eq!(backend.poll_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rows_reset_backoff() {
        let backend = Arc::new(ScriptedBackend::new());
        let row = entry_row("p1", 1_000, "hello");
        backend.script(
            "fields",
            vec![
                running(vec![]),
                running(vec![]),
                running(vec![row.clone()]),
                running(vec![]),
                complete(vec![row], 1, 10),
            ],
        );
        let (tx, _rx) = mpsc::unbounded_channel();

        let started = Instant::now();
        runner(&backend)
            .run(request(), DeliveryPolicy::Incremental, CancellationToken::new(), tx)
            .await
            .unwrap();

        // 100 + 150, then rows reset to 100, then 100 again
        assert_eq!(started.elapsed(), Duration::from_millis(450));
    }

    #[tokio::test(start_paused = true)]
    async fn test_incremental_delivers_every_batch() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.script(
            "fields",
            vec![
                running(vec![entry_row("p1", 1_000, "a")]),
                running(vec![]),
                complete(vec![entry_row("p1", 1_000, "a"), entry_row("p2", 2_000, "b")], 2, 40),
            ],
        );
        let (tx, mut rx) = mpsc::unbounded_channel();

        let stats = runner(&backend)
            .run(request(), DeliveryPolicy::Incremental, CancellationToken::new(), tx)
            .await
            .unwrap();

        let batches = drain(&mut rx);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[1].len(), 2);
        assert_eq!(
            stats,
            Some(QueryStatistics {
                records_scanned: 40,
                records_matched: 2,
                num_results: 2,
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_complete_discards_mid_flight_rows() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.script(
            "fields",
            vec![
                running(vec![entry_row("p9", 1_000, "provisional")]),
                complete(vec![entry_row("p1", 1_000, "final")], 1, 5),
            ],
        );
        let (tx, mut rx) = mpsc::unbounded_channel();

        runner(&backend)
            .run(request(), DeliveryPolicy::OnComplete, CancellationToken::new(), tx)
            .await
            .unwrap();

        let batches = drain(&mut rx);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].get("@ptr"), Some("p1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_poll_delivers_nothing() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.script("fields", vec![complete(vec![entry_row("p1", 1_000, "a")], 1, 1)]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let descriptor = QueryDescriptor::new();
        descriptor.stop();
        descriptor.stop();

        let stats = runner(&backend)
            .run(request(), DeliveryPolicy::Incremental, descriptor.child_token(), tx)
            .await
            .unwrap();

        assert_eq!(stats, None);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(backend.poll_count(), 0);
        assert!(backend.submitted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_polling() {
        let backend = Arc::new(ScriptedBackend::new());
        // Script never completes; exhausted scripts keep reporting Running
        backend.script("fields", vec![running(vec![])]);
        let (tx, _rx) = mpsc::unbounded_channel();

        let descriptor = QueryDescriptor::new();
        let stopper = descriptor.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1_000)).await;
            stopper.stop();
        });

        let stats = runner(&backend)
            .run(request(), DeliveryPolicy::Incremental, descriptor.child_token(), tx)
            .await
            .unwrap();

        assert_eq!(stats, None);
        assert!(backend.poll_count() >= 2);
        assert_eq!(backend.stopped(), vec!["q-0".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_query_id() {
        let backend = Arc::new(ScriptedBackend::without_query_id());
        backend.script("fields", vec![complete(vec![], 0, 0)]);
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = runner(&backend)
            .run(request(), DeliveryPolicy::Incremental, CancellationToken::new(), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Protocol(msg) if msg.contains("query id")));
        assert_eq!(backend.submitted().len(), 1);
        assert_eq!(backend.poll_count(), 0);
    }

    #[tokio::test]
    async fn test_unexpected_status() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.script("fields", vec![poll(Some(QueryStatus::Failed), vec![], None)]);
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = runner(&backend)
            .run(request(), DeliveryPolicy::Incremental, CancellationToken::new(), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Protocol(msg) if msg.contains("Failed")));
        assert_eq!(backend.stopped(), vec!["q-0".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_status() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.script("fields", vec![poll(None, vec![], None)]);
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = runner(&backend)
            .run(request(), DeliveryPolicy::OnComplete, CancellationToken::new(), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_rows_without_statistics() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.script(
            "fields",
            vec![poll(
                Some(QueryStatus::Running),
                vec![entry_row("p1", 1_000, "a")],
                None,
            )],
        );
        let (tx, mut rx) = mpsc::unbounded_channel();

        let err = runner(&backend)
            .run(request(), DeliveryPolicy::Incremental, CancellationToken::new(), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Protocol(_)));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_is_not_fatal() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.script(
            "fields",
            vec![
                poll(Some(QueryStatus::Scheduled), vec![], None),
                running(vec![]),
                complete(vec![entry_row("p1", 1_000, "a")], 1, 7),
            ],
        );
        let (tx, mut rx) = mpsc::unbounded_channel();

        let started = Instant::now();
        let stats = runner(&backend)
            .run(request(), DeliveryPolicy::OnComplete, CancellationToken::new(), tx)
            .await
            .unwrap();

        // Scheduled backs off like any other empty poll
        assert_eq!(started.elapsed(), Duration::from_millis(250));
        assert_eq!(backend.poll_count(), 3);
        assert_eq!(drain(&mut rx).len(), 1);
        assert_eq!(stats.map(|s| s.num_results), Some(1));
        assert!(backend.stopped().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_failure_stops_backend_query() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.script(
            "fields",
            vec![
                running(vec![]),
                poll(
                    Some(QueryStatus::Running),
                    vec![entry_row("p1", 1_000, "a")],
                    None,
                ),
            ],
        );
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = runner(&backend)
            .run(request(), DeliveryPolicy::Incremental, CancellationToken::new(), tx)
            .await
            .unwrap_err();

        assert!(matches!(err, QueryError::Protocol(_)));
        assert_eq!(backend.poll_count(), 2);
        assert_eq!(backend.stopped(), vec!["q-0".to_string()]);
    }

    #[test]
    fn test_zero_matched_statistics_are_dropped() {
        let stats = ScanStatistics {
            records_matched: 0.0,
            records_scanned: 100.0,
            bytes_scanned: 1.0,
        };
        assert_eq!(completed_statistics(Some(stats), 0), None);

        let stats = ScanStatistics {
            records_matched: 3.0,
            records_scanned: 100.0,
            bytes_scanned: 1.0,
        };
        assert_eq!(
            completed_statistics(Some(stats), 3),
            Some(QueryStatistics {
                records_scanned: 100,
                records_matched: 3,
                num_results: 3,
            })
        );
        assert_eq!(completed_statistics(None, 0), None);
    }
}
