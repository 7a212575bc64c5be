//! RPC error types.

use thiserror::Error;

/// JSON-RPC 2.0 standard error codes.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("HTTP error calling {method} at {url}: {source}")]
    Http {
        method: String,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} from {method} at {url}: {body}")]
    HttpStatus { method: String, url: String, status: u16, body: String },

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("RPC error {code} from {method}: {message}")]
    Rpc { code: i64, message: String, method: String },

    #[error("no result in response to {context}")]
    NoResult { context: String },

    #[error("request timed out")]
    Timeout,

    #[error("authentication failed at {url}")]
    AuthFailed { url: String },

    #[error("daemon busy during {context}")]
    Busy { context: String },

    #[error("daemon unreachable: {0}")]
    Unreachable(String),

    #[error("{0}")]
    Other(String),
}

impl RpcError {
    /// Failures worth retrying: the daemon may answer the same request later.
    pub fn is_retryable(&self) -> bool {
        match self {
            RpcError::Http { source, .. } => source.is_timeout() || source.is_connect() || source.is_request(),
            RpcError::HttpStatus { status, .. } => *status >= 500,
            RpcError::Timeout | RpcError::Busy { .. } | RpcError::Unreachable(_) => true,
            _ => false,
        }
    }

    /// Whether the failure was a timeout rather than a refused connection.
    pub fn is_timeout(&self) -> bool {
        match self {
            RpcError::Timeout => true,
            RpcError::Http { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}
