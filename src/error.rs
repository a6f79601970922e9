//! Error types for the depth replication and quoting pipeline

use thiserror::Error;

/// Errors produced by the depthflow core and its transport adapters
#[derive(Error, Debug)]
pub enum DepthFlowError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("rate limited by venue{}", retry_after_ms.map(|ms| format!(" (retry after {ms} ms)")).unwrap_or_default())]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("venue returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode payload: {0}")]
    Decode(String),

    #[error("depth frame rejected: {0}")]
    VersionReject(String),

    #[error("order violates symbol filters: {0}")]
    FilterReject(String),

    #[error("account snapshot stale ({age_ms} ms old)")]
    StaleAccount { age_ms: i64 },

    #[error("ledger arithmetic overflow")]
    Overflow,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("operation on a stopped component")]
    Shutdown,

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for DepthFlowError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        DepthFlowError::WebSocket(err.to_string())
    }
}

impl From<serde_json::Error> for DepthFlowError {
    fn from(err: serde_json::Error) -> Self {
        DepthFlowError::Decode(err.to_string())
    }
}

impl From<reqwest::Error> for DepthFlowError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return DepthFlowError::Timeout(err.to_string());
        }
        if let Some(status) = err.status() {
            if status.as_u16() == 429 {
                return DepthFlowError::RateLimited {
                    retry_after_ms: None,
                };
            }
            return DepthFlowError::Status {
                status: status.as_u16(),
                body: err.to_string(),
            };
        }
        DepthFlowError::Decode(err.to_string())
    }
}

impl DepthFlowError {
    /// True for 429 responses, which arm the quoter's backoff gate.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, DepthFlowError::RateLimited { .. })
    }
}

pub type Result<T> = std::result::Result<T, DepthFlowError>;
