//! JSON-RPC over a duplex byte channel.
//!
//! Handles low-level communication with a backend:
//! - Writing JSON-RPC requests and notifications, one JSON object per line
//! - Reading lines until the response with the matching `id` arrives
//! - Skipping log output and backend-initiated messages on the way
//!
//! The channel is normally a child's stdin/stdout, but any async byte stream
//! pair works, which is how the tests drive it in memory.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::Mutex;

use super::errors::McpError;
use crate::protocol::{error_codes, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

// ─── Request ID Generator ────────────────────────────────────────────────────

/// Global monotonic request ID counter.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a unique request ID.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Transport ───────────────────────────────────────────────────────────────

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type BoxedReader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;

/// Both halves of the channel. Locked together so one exchange owns the
/// stream from request write to response read.
struct Channel {
    /// `None` once the channel has been closed from our side.
    writer: Option<BoxedWriter>,
    reader: BoxedReader,
}

/// Bi-directional JSON-RPC transport to a single backend.
pub struct StdioTransport {
    server_name: String,
    channel: Mutex<Channel>,
}

impl StdioTransport {
    /// Create a transport over arbitrary async byte streams.
    pub fn new<W, R>(server_name: &str, writer: W, reader: R) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            server_name: server_name.to_string(),
            channel: Mutex::new(Channel {
                writer: Some(Box::new(writer)),
                reader: BufReader::new(Box::new(reader)),
            }),
        }
    }

    /// Create a transport from a child process's stdin/stdout.
    pub fn from_child(server_name: &str, stdin: ChildStdin, stdout: ChildStdout) -> Self {
        Self::new(server_name, stdin, stdout)
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Send a JSON-RPC request and wait for the matching response.
    ///
    /// Holds the channel for the whole exchange, so concurrent callers on the
    /// same backend are served one at a time. Lines that are not the reply
    /// (backend log output, stale replies to abandoned requests, backend
    /// notifications) are skipped.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = next_request_id();
        let req = JsonRpcRequest::new(id, method, params);

        let json = serde_json::to_string(&req).map_err(|e| McpError::TransportError {
            server: self.server_name.clone(),
            reason: format!("failed to serialize request: {e}"),
        })?;

        let mut channel = self.channel.lock().await;
        self.write_line(&mut channel, json).await?;

        let mut line_buf = Vec::new();
        loop {
            line_buf.clear();
            let bytes_read = channel
                .reader
                .read_until(b'\n', &mut line_buf)
                .await
                .map_err(|e| McpError::TransportError {
                    server: self.server_name.clone(),
                    reason: format!("failed to read from stdout: {e}"),
                })?;

            if bytes_read == 0 {
                return Err(McpError::TransportError {
                    server: self.server_name.clone(),
                    reason: "backend stdout closed (process may have exited)".into(),
                });
            }

            let Ok(line) = std::str::from_utf8(&line_buf) else {
                tracing::trace!(
                    server = %self.server_name,
                    line = %String::from_utf8_lossy(&line_buf).trim(),
                    "non-UTF-8 output"
                );
                continue;
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                Ok(resp) if resp.answers(id) => return Ok(resp),
                Ok(resp) => {
                    tracing::debug!(
                        server = %self.server_name,
                        expected_id = id,
                        got_id = ?resp.id,
                        method = ?resp.method,
                        "skipping unrelated message"
                    );
                }
                Err(_) => {
                    tracing::trace!(server = %self.server_name, line = %trimmed, "non-JSON-RPC output");
                }
            }
        }
    }

    /// Send a JSON-RPC notification (no response expected).
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let notification = JsonRpcNotification::new(method, params);

        let json = serde_json::to_string(&notification).map_err(|e| McpError::TransportError {
            server: self.server_name.clone(),
            reason: format!("failed to serialize notification: {e}"),
        })?;

        let mut channel = self.channel.lock().await;
        self.write_line(&mut channel, json).await
    }

    /// Close our writing half. A well-behaved backend exits on stdin EOF.
    pub async fn close(&self) {
        let mut channel = self.channel.lock().await;
        if let Some(mut writer) = channel.writer.take() {
            let _ = writer.shutdown().await;
        }
    }

    async fn write_line(&self, channel: &mut Channel, mut json: String) -> Result<(), McpError> {
        let writer = channel
            .writer
            .as_mut()
            .ok_or_else(|| McpError::TransportError {
                server: self.server_name.clone(),
                reason: "channel already closed".into(),
            })?;

        json.push('\n');
        writer
            .write_all(json.as_bytes())
            .await
            .map_err(|e| McpError::TransportError {
                server: self.server_name.clone(),
                reason: format!("failed to write to stdin: {e}"),
            })?;
        writer.flush().await.map_err(|e| McpError::TransportError {
            server: self.server_name.clone(),
            reason: format!("failed to flush stdin: {e}"),
        })
    }
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response, converting errors to `McpError`.
pub fn extract_result(response: JsonRpcResponse) -> Result<serde_json::Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or(McpError::ServerError {
        code: error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".into(),
        data: None,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
