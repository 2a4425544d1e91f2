//! Error types of the tool gateway

use thiserror::Error;

use super::protocol::JsonRpcError;

/// JSON-RPC level failures (the request itself could not be served)
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<McpError> for JsonRpcError {
    fn from(err: McpError) -> Self {
        let code = match &err {
            McpError::MethodNotFound(_) => JsonRpcError::METHOD_NOT_FOUND,
            McpError::InvalidParams(_) => JsonRpcError::INVALID_PARAMS,
            McpError::Internal(_) => JsonRpcError::INTERNAL_ERROR,
        };
        JsonRpcError::new(code, err.to_string())
    }
}

/// Tool call failures, reported to the caller as an `isError` result
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("{0:#}")]
    Delivery(#[from] anyhow::Error),
}
