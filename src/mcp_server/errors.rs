//! Tool server error types.

use thiserror::Error;

use crate::protocol::{error_codes, JsonRpcError};

/// Errors a [`ToolHandler`](super::ToolHandler) reports for one request.
///
/// These become JSON-RPC error responses; the serving loop keeps running.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// `tools/call` named a tool this server does not expose.
    #[error("unknown tool: '{name}'")]
    UnknownTool { name: String },

    /// Request parameters did not have the expected shape.
    #[error("invalid params: {reason}")]
    InvalidParams { reason: String },

    /// The method is not part of the tool protocol.
    #[error("method not found: '{method}'")]
    MethodNotFound { method: String },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl From<HandlerError> for JsonRpcError {
    fn from(e: HandlerError) -> Self {
        let code = match &e {
            HandlerError::UnknownTool { .. } | HandlerError::InvalidParams { .. } => {
                error_codes::INVALID_PARAMS
            }
            HandlerError::MethodNotFound { .. } => error_codes::METHOD_NOT_FOUND,
            HandlerError::Internal { .. } => error_codes::INTERNAL_ERROR,
        };
        JsonRpcError::new(code, e.to_string())
    }
}

/// Errors that stop the serving loop itself.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("i/o error on server channel: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}
