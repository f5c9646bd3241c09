use thiserror::Error;

/// Errors raised while talking to the log-query backend
#[derive(Error, Debug)]
pub enum BackendError {
    /// Request could not be sent or the response body could not be read
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend answered with a non-success status
    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },

    /// Response body was not the JSON we expected
    #[error("failed to decode backend response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Transport failure outside of HTTP
    #[error("transport error: {0}")]
    Transport(String),
}
