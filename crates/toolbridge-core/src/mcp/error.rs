use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("MCP error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("MCP connection closed before a response to request {id}")]
    ConnectionClosed { id: u64 },

    #[error("MCP request '{method}' timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("SSE stream ended before the server announced its message endpoint")]
    MissingEndpoint,

    #[error("invalid endpoint URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unexpected {method} result: {reason}")]
    Protocol { method: String, reason: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
