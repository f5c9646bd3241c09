use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{
    BackendError, GetQueryResultsResponse, LogsBackend, StartQueryRequest, StartQueryResponse,
};

const TARGET_PREFIX: &str = "Logs_20140328";
const JSON_CONTENT_TYPE: &str = "application/x-amz-json-1.1";

/// Configuration for the HTTP backend
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    /// Gateway URL that accepts the JSON protocol (and signs requests upstream)
    pub endpoint: String,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:4566".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// JSON-over-HTTP implementation of [`LogsBackend`]
pub struct HttpBackend {
    client: Client,
    endpoint: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartQueryBody<'a> {
    log_group_names: &'a [String],
    start_time: i64,
    end_time: i64,
    query_string: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u32>,
}

impl<'a> StartQueryBody<'a> {
    /// The backend takes whole epoch seconds; widen so no millisecond is lost
    fn from_request(request: &'a StartQueryRequest) -> Self {
        Self {
            log_group_names: &request.log_group_names,
            start_time: request.time_range.start.div_euclid(1000),
            end_time: (request.time_range.end + 999).div_euclid(1000),
            query_string: &request.query_string,
            limit: request.limit,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryIdBody<'a> {
    query_id: &'a str,
}

#[derive(serde::Deserialize)]
struct ErrorBody {
    #[serde(default, alias = "Message")]
    message: Option<String>,
    #[serde(default, rename = "__type")]
    kind: Option<String>,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> Result<Self, BackendError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call<B, R>(&self, operation: &str, body: &B) -> Result<R, BackendError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let payload = serde_json::to_vec(body)?;
        tracing::trace!(operation, bytes = payload.len(), "backend request");

        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .header("X-Amz-Target", format!("{TARGET_PREFIX}.{operation}"))
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                message: error_message(&text),
            });
        }

        Ok(serde_json::from_str(&text)?)
    }
}

/// Pull a readable message out of an error body
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            message: Some(message),
            ..
        }) => message,
        Ok(ErrorBody {
            kind: Some(kind), ..
        }) => kind,
        _ => body.trim().to_string(),
    }
}

#[async_trait]
impl LogsBackend for HttpBackend {
    async fn start_query(
        &self,
        request: StartQueryRequest,
    ) -> Result<StartQueryResponse, BackendError> {
        self.call("StartQuery", &StartQueryBody::from_request(&request))
            .await
    }

    async fn get_query_results(
        &self,
        query_id: &str,
    ) -> Result<GetQueryResultsResponse, BackendError> {
        self.call("GetQueryResults", &QueryIdBody { query_id }).await
    }

    async fn stop_query(&self, query_id: &str) -> Result<(), BackendError> {
        let _: serde_json::Value = self.call("StopQuery", &QueryIdBody { query_id }).await?;
        Ok(())
    }
}
