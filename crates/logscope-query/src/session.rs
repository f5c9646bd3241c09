//! Client-facing session
//!
//! A session owns at most one running query set. Starting a new one stops
//! the previous set; its results stop flowing but it still reports
//! `DoneLoadingEntries`.

use std::sync::Arc;

use logscope_types::{ClientRequest, DataSourceQuery, ServerMessage, TimeRange};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::orchestrator::QuerySet;
use crate::runner::QueryDescriptor;

struct ActiveQuery {
    descriptor: QueryDescriptor,
    task: JoinHandle<()>,
}

/// Dispatches client requests to a [`QuerySet`]
pub struct Session {
    query_set: Arc<QuerySet>,
    emit: mpsc::UnboundedSender<ServerMessage>,
    current: Option<ActiveQuery>,
}

impl Session {
    pub fn new(query_set: Arc<QuerySet>, emit: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self {
            query_set,
            emit,
            current: None,
        }
    }

    /// Handle one client request
    pub fn handle(&mut self, request: ClientRequest) {
        match request {
            ClientRequest::Query {
                time_range,
                queries,
            } => self.start(time_range, queries),
            ClientRequest::StopQuery => self.stop(),
        }
    }

    /// Start a query set, stopping whatever was running
    pub fn start(&mut self, time_range: TimeRange, queries: Vec<DataSourceQuery>) {
        self.stop();

        let descriptor = QueryDescriptor::new();
        let query_set = Arc::clone(&self.query_set);
        let emit = self.emit.clone();
        let task = tokio::spawn({
            let descriptor = descriptor.clone();
            async move {
                query_set
                    .run_with(descriptor, time_range, queries, emit)
                    .await;
            }
        });

        self.current = Some(ActiveQuery { descriptor, task });
    }

    /// Stop the running query set, if any
    pub fn stop(&mut self) {
        if let Some(active) = self.current.take() {
            debug!("stopping query set");
            active.descriptor.stop();
        }
    }

    /// Whether a query set is still producing results
    pub fn is_running(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|active| !active.descriptor.is_stopped() && !active.task.is_finished())
    }

    /// Wait for the running query set to finish on its own
    pub async fn finished(&mut self) {
        if let Some(active) = self.current.as_mut() {
            let _ = (&mut active.task).await;
        }
        self.current = None;
    }

    /// Handle requests until the sender side closes
    pub async fn serve(mut self, mut requests: mpsc::UnboundedReceiver<ClientRequest>) {
        while let Some(request) = requests.recv().await {
            self.handle(request);
        }
        self.stop();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(active) = self.current.take() {
            active.descriptor.stop();
            active.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::PollConfig;
    use crate::testing::{ScriptedBackend, complete, entry_row, running};
    use std::time::Duration;

    const HOUR: i64 = 3_600_000;

    fn session(backend: &Arc<ScriptedBackend>) -> (Session, mpsc::UnboundedReceiver<ServerMessage>) {
        let query_set = QuerySet::new(
            backend.clone(),
            vec!["/app/api".to_string()],
            PollConfig {
                base_interval: Duration::from_millis(50),
                backoff_factor: 1.5,
            },
        );
        let (tx, rx) = mpsc::unbounded_channel();
        (Session::new(Arc::new(query_set), tx), rx)
    }

    fn fetch_request() -> ClientRequest {
        ClientRequest::Query {
            time_range: TimeRange::new(0, HOUR),
            queries: vec![DataSourceQuery::FetchEntries { filters: vec![] }],
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    fn done() -> ServerMessage {
        ServerMessage::DoneLoadingEntries {
            error_message: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_runs_to_completion() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.script(
            "@ptr",
            vec![running(vec![]), complete(vec![entry_row("a", 5_000, "up")], 1, 3)],
        );
        let (mut session, mut rx) = session(&backend);

        session.handle(fetch_request());
        assert!(session.is_running());
        session.finished().await;
        assert!(!session.is_running());

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 2);
        assert!(matches!(
            &messages[0],
            ServerMessage::SendEntries { entries, stats: Some(_) } if entries.len() == 1
        ));
        assert_eq!(messages[1], done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_query_stops_previous() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.script("@ptr", vec![running(vec![])]);
        let (mut session, mut rx) = session(&backend);

        session.handle(fetch_request());
        tokio::time::sleep(Duration::from_secs(1)).await;
        session.handle(fetch_request());
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(backend.submitted().len(), 2);
        assert_eq!(backend.stopped(), vec!["q-0".to_string()]);
        assert!(session.is_running());
        assert_eq!(drain(&mut rx), vec![done()]);

        session.handle(ClientRequest::StopQuery);
        session.handle(ClientRequest::StopQuery);
        assert!(!session.is_running());
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(backend.stopped().len(), 2);
        assert_eq!(drain(&mut rx), vec![done()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_without_query_is_noop() {
        let backend = Arc::new(ScriptedBackend::new());
        let (mut session, mut rx) = session(&backend);

        session.stop();
        session.handle(ClientRequest::StopQuery);

        assert!(!session.is_running());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_serve_until_requests_close() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.script("@ptr", vec![running(vec![])]);
        let (session, mut rx) = session(&backend);

        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let server = tokio::spawn(session.serve(requests_rx));

        requests_tx.send(fetch_request()).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        drop(requests_tx);
        server.await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(backend.stopped(), vec!["q-0".to_string()]);
        assert_eq!(drain(&mut rx), vec![done()]);
    }
}
