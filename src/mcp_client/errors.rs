//! Backend client error types.

use thiserror::Error;

/// Errors raised while launching, initializing, or talking to a backend.
///
/// None of these ever reach the gateway's caller directly: the supervisor
/// logs them and marks the session failed, and the dispatcher folds them into
/// warning outcomes.
#[derive(Debug, Error)]
pub enum McpError {
    /// The descriptor's script does not exist under the backends directory.
    #[error("backend '{name}': script not found at {path}")]
    ScriptNotFound { name: String, path: String },

    /// No launcher is registered for the script's extension.
    #[error("backend '{name}': unsupported script type '{script}'")]
    UnsupportedScript { name: String, script: String },

    /// A backend process failed to start.
    #[error("failed to spawn backend '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    /// The initialization handshake or tool discovery failed.
    #[error("backend '{name}' initialization failed: {reason}")]
    InitFailed { name: String, reason: String },

    /// JSON-RPC communication error (malformed message, I/O error, closed pipe).
    #[error("transport error for backend '{server}': {reason}")]
    TransportError { server: String, reason: String },

    /// Backend returned a JSON-RPC error response.
    #[error("backend error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// A reply arrived but did not have the expected shape.
    #[error("malformed reply from backend '{server}': {reason}")]
    MalformedReply { server: String, reason: String },

    /// A handshake step or tool call exceeded its deadline.
    #[error("backend '{server}': {operation} timed out after {timeout_ms}ms")]
    Timeout {
        server: String,
        operation: String,
        timeout_ms: u64,
    },

    /// The session is not in a state that accepts calls.
    #[error("backend '{name}' is not ready (state: {state})")]
    NotReady { name: String, state: String },
}

impl McpError {
    /// Whether the error means the backend's channel is gone for good.
    pub fn is_channel_loss(&self) -> bool {
        matches!(self, McpError::TransportError { .. })
    }
}
