//! Query set orchestration
//!
//! One request fans out into one runner per query kind. All runners share a
//! single elaborated time range and a composite stop handle, and each one
//! reports its own outcome.

use futures::future::join_all;
use logscope_backend::{LogsBackend, ResultRow, StartQueryRequest};
use logscope_types::{
    DataSourceQuery, ElaboratedTimeRange, PropertySelector, ServerMessage, TimeRange,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::buckets::elaborate;
use crate::compiler::{compile, result_limit};
use crate::error::{QueryError, QueryResult};
use crate::reconcile::{EntryReconciler, HistogramReconciler};
use crate::runner::{DeliveryPolicy, PollConfig, QueryDescriptor, QueryRunner};

/// Finest bucket the backend can resolve
pub const MIN_SET_BUCKET_MS: i64 = 1000;

/// Runs sets of queries against one backend and a fixed list of log groups
pub struct QuerySet {
    runner: QueryRunner,
    log_groups: Vec<String>,
}

impl QuerySet {
    pub fn new(backend: Arc<dyn LogsBackend>, log_groups: Vec<String>, config: PollConfig) -> Self {
        Self {
            runner: QueryRunner::new(backend, config),
            log_groups,
        }
    }

    pub fn log_groups(&self) -> &[String] {
        &self.log_groups
    }

    /// Run every query in `queries` over `time_range`
    ///
    /// `on_started` receives the stop handle before any work begins. Results
    /// go to `emit`; the last message is always `DoneLoadingEntries`.
    pub async fn run<F>(
        &self,
        time_range: TimeRange,
        queries: Vec<DataSourceQuery>,
        on_started: F,
        emit: mpsc::UnboundedSender<ServerMessage>,
    ) where
        F: FnOnce(QueryDescriptor),
    {
        let descriptor = QueryDescriptor::new();
        on_started(descriptor.clone());
        self.run_with(descriptor, time_range, queries, emit).await;
    }

    /// Like [`QuerySet::run`] with a caller-supplied stop handle
    pub async fn run_with(
        &self,
        descriptor: QueryDescriptor,
        time_range: TimeRange,
        queries: Vec<DataSourceQuery>,
        emit: mpsc::UnboundedSender<ServerMessage>,
    ) {
        let failures = self
            .run_set(&descriptor, time_range, &queries, &emit)
            .await;

        let error_message = if failures.is_empty() {
            None
        } else {
            Some(failures.join("; "))
        };

        let _ = emit.send(ServerMessage::DoneLoadingEntries { error_message });
    }

    /// Returns one message per failed sub-query
    async fn run_set(
        &self,
        descriptor: &QueryDescriptor,
        time_range: TimeRange,
        queries: &[DataSourceQuery],
        emit: &mpsc::UnboundedSender<ServerMessage>,
    ) -> Vec<String> {
        let elaborated = match elaborate_for_set(time_range) {
            Ok(elaborated) => elaborated,
            Err(err) => {
                warn!(error = %err, "rejected query set");
                return vec![err.to_string()];
            }
        };

        info!(
            queries = queries.len(),
            bucket = elaborated.bucket_spec.name,
            buckets = elaborated.bucket_count(),
            "starting query set"
        );

        let elaborated = &elaborated;
        let outcomes = join_all(queries.iter().map(|query| {
            let cancel = descriptor.child_token();
            async move {
                let outcome = self.run_one(query, elaborated, cancel, emit).await;
                (query.kind(), outcome)
            }
        }))
        .await;

        outcomes
            .into_iter()
            .filter_map(|(kind, outcome)| {
                outcome.err().map(|err| {
                    warn!(kind, error = %err, "query failed");
                    format!("{kind}: {err}")
                })
            })
            .collect()
    }

    async fn run_one(
        &self,
        query: &DataSourceQuery,
        elaborated: &ElaboratedTimeRange,
        cancel: CancellationToken,
        emit: &mpsc::UnboundedSender<ServerMessage>,
    ) -> QueryResult<()> {
        let request = StartQueryRequest {
            log_group_names: self.log_groups.clone(),
            time_range: elaborated.time_range,
            query_string: compile(query, &elaborated.bucket_spec)?,
            limit: Some(result_limit(query)),
        };

        match query {
            DataSourceQuery::FetchEntries { .. } => {
                self.fetch_entries(request, elaborated, cancel, emit).await
            }
            DataSourceQuery::BuildHistogram {
                breakdown,
                saved_search_id,
                ..
            } => {
                self.build_histogram(
                    request,
                    elaborated,
                    breakdown.as_ref(),
                    saved_search_id.clone(),
                    cancel,
                    emit,
                )
                .await
            }
        }
    }

    async fn fetch_entries(
        &self,
        request: StartQueryRequest,
        elaborated: &ElaboratedTimeRange,
        cancel: CancellationToken,
        emit: &mpsc::UnboundedSender<ServerMessage>,
    ) -> QueryResult<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<ResultRow>>();

        let run = self
            .runner
            .run(request, DeliveryPolicy::OnComplete, cancel.clone(), tx);

        let consume = async {
            let mut reconciler = EntryReconciler::new(elaborated.time_range);
            while let Some(batch) = rx.recv().await {
                if let Err(err) = reconciler.ingest(&batch) {
                    cancel.cancel();
                    return Err(err);
                }
            }
            Ok(reconciler)
        };

        let (stats, reconciler) = tokio::join!(run, consume);
        let reconciler = reconciler?;
        let stats = stats?;

        if cancel.is_cancelled() {
            return Ok(());
        }

        let entries = reconciler.finish(stats.as_ref())?;
        info!(entries = entries.len(), "entries loaded");
        send(emit, ServerMessage::SendEntries { entries, stats }, &cancel);
        Ok(())
    }

    async fn build_histogram(
        &self,
        request: StartQueryRequest,
        elaborated: &ElaboratedTimeRange,
        breakdown: Option<&PropertySelector>,
        saved_search_id: Option<String>,
        cancel: CancellationToken,
        emit: &mpsc::UnboundedSender<ServerMessage>,
    ) -> QueryResult<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<ResultRow>>();

        let run = self
            .runner
            .run(request, DeliveryPolicy::Incremental, cancel.clone(), tx);

        let consume = async {
            let mut reconciler = HistogramReconciler::new(elaborated.clone(), breakdown.is_some());
            while let Some(batch) = rx.recv().await {
                if let Err(err) = reconciler.ingest(&batch) {
                    cancel.cancel();
                    return Err(err);
                }
                let message = ServerMessage::SendHistogram {
                    elaborated_time_range: elaborated.clone(),
                    histogram: reconciler.series(),
                    done: false,
                    saved_search_id: saved_search_id.clone(),
                };
                send(emit, message, &cancel);
            }
            Ok(reconciler)
        };

        let (stats, reconciler) = tokio::join!(run, consume);
        let reconciler = reconciler?;
        stats?;

        if cancel.is_cancelled() {
            return Ok(());
        }

        send(
            emit,
            ServerMessage::SendHistogram {
                elaborated_time_range: elaborated.clone(),
                histogram: reconciler.series(),
                done: true,
                saved_search_id,
            },
            &cancel,
        );
        Ok(())
    }
}

/// Shared layout for a set; a natural bucket finer than the backend can
/// resolve rejects the whole set
fn elaborate_for_set(time_range: TimeRange) -> QueryResult<ElaboratedTimeRange> {
    let elaborated = elaborate(time_range, None)?;
    if elaborated.bucket_spec.duration_ms < MIN_SET_BUCKET_MS {
        return Err(QueryError::BucketSize(format!(
            "bucket {} is finer than {MIN_SET_BUCKET_MS}ms",
            elaborated.bucket_spec.name
        )));
    }
    Ok(elaborated)
}

/// Nobody listening means nobody wants the rest of this query
fn send(emit: &mpsc::UnboundedSender<ServerMessage>, message: ServerMessage, cancel: &CancellationToken) {
    if emit.send(message).is_err() {
        cancel.cancel();
    }
}
