//! JSON-RPC serving loop.
//!
//! Reads one request per line, answers on the writer one response per line.
//! `tools/call` requests run as separate tasks so a slow tool does not hold up
//! the rest; everything else is answered inline, in order. The loop ends when
//! the reader reaches EOF, after in-flight calls have been answered.

use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use super::errors::{HandlerError, ServeError};
use super::ToolHandler;
use crate::protocol::jsonrpc::JSONRPC_VERSION;
use crate::protocol::{
    error_codes, CallToolParams, IncomingMessage, InitializeResult, JsonRpcError,
    ListToolsResult, OutgoingResponse, PROTOCOL_VERSION,
};

type SharedWriter<W> = Arc<Mutex<W>>;

/// Serve `handler` over a reader/writer pair until the reader closes.
pub async fn serve<H, R, W>(handler: Arc<H>, reader: R, writer: W) -> Result<(), ServeError>
where
    H: ToolHandler,
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let writer: SharedWriter<W> = Arc::new(Mutex::new(writer));
    let mut reader = BufReader::new(reader);
    let mut line_buf = Vec::new();
    let mut in_flight: JoinSet<()> = JoinSet::new();

    tracing::debug!(server = %handler.server_info().name, "tool server loop starting");

    loop {
        line_buf.clear();
        if reader.read_until(b'\n', &mut line_buf).await? == 0 {
            break;
        }
        while in_flight.try_join_next().is_some() {}

        let line = match std::str::from_utf8(&line_buf) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "request line is not valid UTF-8");
                let response = OutgoingResponse::failure(
                    serde_json::Value::Null,
                    JsonRpcError::new(error_codes::PARSE_ERROR, format!("invalid UTF-8: {e}")),
                );
                write_response(&writer, &response).await?;
                continue;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let message: IncomingMessage = match serde_json::from_str(trimmed) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, raw = %trimmed, "failed to parse JSON-RPC request");
                let response = OutgoingResponse::failure(
                    serde_json::Value::Null,
                    JsonRpcError::new(error_codes::PARSE_ERROR, e.to_string()),
                );
                write_response(&writer, &response).await?;
                continue;
            }
        };

        let Some(id) = message.id.clone() else {
            handle_notification(&message);
            continue;
        };

        if !message.jsonrpc.is_empty() && message.jsonrpc != JSONRPC_VERSION {
            let response = OutgoingResponse::failure(
                id,
                JsonRpcError::new(
                    error_codes::INVALID_REQUEST,
                    format!("unsupported jsonrpc version '{}'", message.jsonrpc),
                ),
            );
            write_response(&writer, &response).await?;
            continue;
        }

        if message.method == "tools/call" {
            let handler = Arc::clone(&handler);
            let writer = Arc::clone(&writer);
            in_flight.spawn(async move {
                let response = respond(handler.as_ref(), id, &message).await;
                if let Err(e) = write_response(&writer, &response).await {
                    tracing::error!(error = %e, "failed to write tools/call response");
                }
            });
        } else {
            let response = respond(handler.as_ref(), id, &message).await;
            write_response(&writer, &response).await?;
        }
    }

    while in_flight.join_next().await.is_some() {}
    tracing::debug!("tool server input closed");
    Ok(())
}

/// Answer one request.
async fn respond<H: ToolHandler>(
    handler: &H,
    id: serde_json::Value,
    message: &IncomingMessage,
) -> OutgoingResponse {
    let start = Instant::now();
    let result = dispatch(handler, message).await;
    let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    match result {
        Ok(value) => {
            tracing::debug!(method = %message.method, elapsed_ms, "request completed");
            OutgoingResponse::success(id, value)
        }
        Err(e) => {
            tracing::warn!(method = %message.method, elapsed_ms, error = %e, "request failed");
            OutgoingResponse::failure(id, e.into())
        }
    }
}

async fn dispatch<H: ToolHandler>(
    handler: &H,
    message: &IncomingMessage,
) -> Result<serde_json::Value, HandlerError> {
    match message.method.as_str() {
        "initialize" => {
            handler.initialize(&message.params).await?;
            let requested = message
                .params
                .get("protocolVersion")
                .and_then(|v| v.as_str())
                .unwrap_or(PROTOCOL_VERSION);
            to_value(InitializeResult {
                protocol_version: requested.to_string(),
                capabilities: serde_json::json!({ "tools": { "listChanged": false } }),
                server_info: Some(handler.server_info()),
                instructions: handler.instructions(),
            })
        }
        "ping" => Ok(serde_json::json!({})),
        "tools/list" => to_value(ListToolsResult {
            tools: handler.list_tools().await,
            next_cursor: None,
        }),
        "tools/call" => {
            let params: CallToolParams = serde_json::from_value(message.params.clone())
                .map_err(|e| HandlerError::InvalidParams {
                    reason: format!("tools/call: {e}"),
                })?;
            tracing::info!(tool = %params.name, "dispatching tool call");
            let result = handler.call_tool(&params.name, params.arguments).await?;
            to_value(result)
        }
        other => Err(HandlerError::MethodNotFound {
            method: other.to_string(),
        }),
    }
}

fn handle_notification(message: &IncomingMessage) {
    match message.method.as_str() {
        "notifications/initialized" | "initialized" => {
            tracing::info!("client finished initialization");
        }
        other => {
            tracing::debug!(method = %other, "ignoring notification");
        }
    }
}

fn to_value<T: serde::Serialize>(value: T) -> Result<serde_json::Value, HandlerError> {
    serde_json::to_value(value).map_err(|e| HandlerError::Internal {
        reason: e.to_string(),
    })
}

async fn write_response<W>(writer: &SharedWriter<W>, response: &OutgoingResponse) -> Result<(), ServeError>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut json = serde_json::to_string(response)?;
    json.push('\n');
    let mut writer = writer.lock().await;
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
