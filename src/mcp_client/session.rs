//! Backend session: one child process, one channel, one handshake.
//!
//! A session is created per descriptor, spawned with piped stdio, and driven
//! through the MCP handshake (`initialize`, `notifications/initialized`,
//! `tools/list`). Only a session that completes the handshake is returned to
//! the caller; failures kill the child and surface as `McpError`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};

use super::errors::McpError;
use super::launcher::Launch;
use super::transport::{extract_result, StdioTransport};
use super::types::{BackendDescriptor, SessionState};
use crate::protocol::{
    CallToolParams, CallToolResult, Implementation, InitializeParams, InitializeResult,
    JsonRpcResponse, ListToolsResult, ToolDefinition, PROTOCOL_VERSION,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Timeout for graceful shutdown before force-killing.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Lines of backend stderr kept for failure diagnostics.
const STDERR_TAIL_LINES: usize = 20;

/// Cap on diagnostic stderr attached to an error message.
const STDERR_MAX_CHARS: usize = 2000;

/// Upper bound on `tools/list` pages, in case a backend keeps handing out cursors.
const MAX_TOOL_PAGES: usize = 64;

// ─── BackendSession ──────────────────────────────────────────────────────────

/// A backend that completed the handshake, with its channel and tools.
pub struct BackendSession {
    name: String,
    transport: StdioTransport,
    /// `None` for in-memory sessions, and after shutdown.
    process: StdMutex<Option<Child>>,
    state: StdMutex<SessionState>,
    tools: Vec<ToolDefinition>,
    server_info: Option<Implementation>,
}

impl BackendSession {
    /// Spawn the backend described by `descriptor` and run the handshake.
    ///
    /// Each handshake step is bounded by `init_timeout`. On any failure the
    /// child is killed and the error carries the tail of its stderr.
    pub async fn spawn(
        descriptor: &BackendDescriptor,
        launch: &Launch,
        init_timeout: Duration,
    ) -> Result<Self, McpError> {
        let name = descriptor.name.as_str();
        let mut state = SessionState::Created;

        let mut cmd = Command::new(&launch.command);
        cmd.args(&launch.args);

        // Windows: prevent console window from appearing for child processes
        #[cfg(target_os = "windows")]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: name.to_string(),
            reason: format!("{} {}: {e}", launch.command, launch.script.display()),
        })?;

        let stdin = child.stdin.take().ok_or(McpError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdout".into(),
        })?;
        let stderr_tail = child
            .stderr
            .take()
            .map(|stderr| forward_stderr(name, stderr))
            .unwrap_or_default();

        advance(name, &mut state, SessionState::Spawned);
        tracing::debug!(
            server = name,
            pid = ?child.id(),
            command = %launch.command,
            script = %launch.script.display(),
            "backend process spawned"
        );

        let transport = StdioTransport::from_child(name, stdin, stdout);

        advance(name, &mut state, SessionState::Initializing);
        match handshake(&transport, name, init_timeout).await {
            Ok((info, tools)) => {
                advance(name, &mut state, SessionState::Ready);
                Ok(Self::ready(name, transport, Some(child), info, tools))
            }
            Err(e) => {
                let _ = child.kill().await;
                // Give the forwarder a moment to drain what the process wrote before dying.
                tokio::time::sleep(Duration::from_millis(50)).await;
                let stderr_ctx = stderr_tail.snapshot();
                if !stderr_ctx.is_empty() {
                    tracing::warn!(
                        server = name,
                        stderr = %stderr_ctx,
                        "backend stderr captured on failure"
                    );
                }
                Err(with_stderr(e, &stderr_ctx))
            }
        }
    }

    /// Run the handshake over an existing channel that has no process behind it.
    pub async fn connect(
        name: &str,
        transport: StdioTransport,
        init_timeout: Duration,
    ) -> Result<Self, McpError> {
        let mut state = SessionState::Initializing;
        let (info, tools) = handshake(&transport, name, init_timeout).await?;
        advance(name, &mut state, SessionState::Ready);
        Ok(Self::ready(name, transport, None, info, tools))
    }

    fn ready(
        name: &str,
        transport: StdioTransport,
        process: Option<Child>,
        info: InitializeResult,
        tools: Vec<ToolDefinition>,
    ) -> Self {
        Self {
            name: name.to_string(),
            transport,
            process: StdMutex::new(process),
            state: StdMutex::new(SessionState::Ready),
            tools,
            server_info: info.server_info,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tools discovered during the handshake.
    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    /// `serverInfo` the backend reported, if any.
    pub fn server_info(&self) -> Option<&Implementation> {
        self.server_info.as_ref()
    }

    pub fn state(&self) -> SessionState {
        lock(&self.state).clone()
    }

    /// Whether calls may be forwarded. Notices a child that exited on its own.
    pub fn is_ready(&self) -> bool {
        if !lock(&self.state).is_ready() {
            return false;
        }
        let exited = lock(&self.process)
            .as_mut()
            .map(|child| !matches!(child.try_wait(), Ok(None)))
            .unwrap_or(false);
        if exited {
            self.mark_terminated("backend process exited");
            return false;
        }
        true
    }

    /// Forward a `tools/call` to this backend.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
        timeout: Duration,
    ) -> Result<CallToolResult, McpError> {
        let state = self.state();
        if !state.is_ready() {
            return Err(McpError::NotReady {
                name: self.name.clone(),
                state: state.to_string(),
            });
        }

        let params = serde_json::to_value(CallToolParams {
            name: tool_name.to_string(),
            arguments,
        })
        .map_err(|e| McpError::TransportError {
            server: self.name.clone(),
            reason: format!("failed to encode call parameters: {e}"),
        })?;

        let response = tokio::time::timeout(
            timeout,
            self.transport.request("tools/call", Some(params)),
        )
        .await
        .map_err(|_| McpError::Timeout {
            server: self.name.clone(),
            operation: format!("tools/call '{tool_name}'"),
            timeout_ms: duration_ms(timeout),
        })?
        .map_err(|e| {
            if e.is_channel_loss() {
                self.mark_terminated(&e.to_string());
            }
            e
        })?;

        let result = extract_result(response)?;
        serde_json::from_value(result).map_err(|e| McpError::MalformedReply {
            server: self.name.clone(),
            reason: format!("invalid tools/call result: {e}"),
        })
    }

    /// Close the channel and stop the child: stdin EOF first, kill after
    /// [`SHUTDOWN_TIMEOUT`].
    pub async fn shutdown(&self) {
        self.mark_terminated("gateway shutdown");
        self.transport.close().await;

        let child = lock(&self.process).take();
        let Some(mut child) = child else {
            return;
        };

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(server = %self.name, %status, "backend exited");
            }
            _ => {
                tracing::warn!(server = %self.name, "backend did not exit in time, killing");
                let _ = child.kill().await;
            }
        }
    }

    fn mark_terminated(&self, reason: &str) {
        let mut state = lock(&self.state);
        if *state != SessionState::Terminated {
            tracing::warn!(server = %self.name, from = state.label(), reason, "session terminated");
            *state = SessionState::Terminated;
        }
    }
}

// ─── Handshake ───────────────────────────────────────────────────────────────

/// `initialize` → `notifications/initialized` → `tools/list` (all pages).
async fn handshake(
    transport: &StdioTransport,
    server_name: &str,
    init_timeout: Duration,
) -> Result<(InitializeResult, Vec<ToolDefinition>), McpError> {
    let params = InitializeParams {
        protocol_version: PROTOCOL_VERSION.to_string(),
        capabilities: serde_json::json!({}),
        client_info: Implementation::gateway(),
    };
    let params = serde_json::to_value(params).map_err(|e| McpError::InitFailed {
        name: server_name.to_string(),
        reason: format!("failed to encode initialize params: {e}"),
    })?;

    let response = step(
        server_name,
        "initialize",
        init_timeout,
        transport.request("initialize", Some(params)),
    )
    .await?;
    let result = extract_result(response).map_err(|e| init_failed(server_name, e))?;
    let info: InitializeResult =
        serde_json::from_value(result).map_err(|e| McpError::InitFailed {
            name: server_name.to_string(),
            reason: format!("failed to parse initialize response: {e}"),
        })?;

    tracing::debug!(
        server = server_name,
        protocol_version = %info.protocol_version,
        server_info = ?info.server_info,
        "initialize accepted"
    );
    if info.capabilities.get("tools").is_none() {
        tracing::warn!(
            server = server_name,
            "backend did not advertise the tools capability, listing anyway"
        );
    }

    transport
        .notify("notifications/initialized", None)
        .await
        .map_err(|e| init_failed(server_name, e))?;

    let tools = list_tools(transport, server_name, init_timeout).await?;
    Ok((info, tools))
}

async fn list_tools(
    transport: &StdioTransport,
    server_name: &str,
    init_timeout: Duration,
) -> Result<Vec<ToolDefinition>, McpError> {
    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;

    for _ in 0..MAX_TOOL_PAGES {
        let params = cursor
            .as_ref()
            .map(|c| serde_json::json!({ "cursor": c }));
        let response = step(
            server_name,
            "tools/list",
            init_timeout,
            transport.request("tools/list", params),
        )
        .await?;
        let result = extract_result(response).map_err(|e| init_failed(server_name, e))?;
        let page: ListToolsResult =
            serde_json::from_value(result).map_err(|e| McpError::InitFailed {
                name: server_name.to_string(),
                reason: format!("failed to parse tools/list response: {e}"),
            })?;

        tools.extend(page.tools);
        match page.next_cursor {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => return Ok(tools),
        }
    }

    tracing::warn!(
        server = server_name,
        pages = MAX_TOOL_PAGES,
        "tools/list pagination did not terminate, keeping tools seen so far"
    );
    Ok(tools)
}

/// Await one handshake request under the init deadline.
async fn step<F>(
    server_name: &str,
    operation: &str,
    init_timeout: Duration,
    fut: F,
) -> Result<JsonRpcResponse, McpError>
where
    F: std::future::Future<Output = Result<JsonRpcResponse, McpError>>,
{
    tokio::time::timeout(init_timeout, fut)
        .await
        .map_err(|_| McpError::Timeout {
            server: server_name.to_string(),
            operation: operation.to_string(),
            timeout_ms: duration_ms(init_timeout),
        })?
        .map_err(|e| init_failed(server_name, e))
}

fn init_failed(server_name: &str, e: McpError) -> McpError {
    match e {
        McpError::InitFailed { .. } | McpError::Timeout { .. } => e,
        other => McpError::InitFailed {
            name: server_name.to_string(),
            reason: other.to_string(),
        },
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn advance(server_name: &str, state: &mut SessionState, next: SessionState) {
    tracing::debug!(server = server_name, from = %state, to = %next, "session state");
    *state = next;
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Last few stderr lines of a backend, shared with its forwarding task.
#[derive(Clone, Default)]
struct StderrTail {
    lines: Arc<StdMutex<VecDeque<String>>>,
}

impl StderrTail {
    fn push(&self, line: String) {
        let mut lines = lock(&self.lines);
        if lines.len() == STDERR_TAIL_LINES {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    fn snapshot(&self) -> String {
        let joined = lock(&self.lines)
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n");
        if joined.chars().count() > STDERR_MAX_CHARS {
            let mut cut: String = joined.chars().take(STDERR_MAX_CHARS).collect();
            cut.push_str("...(truncated)");
            cut
        } else {
            joined
        }
    }
}

/// Drain a backend's stderr into the log for its whole life.
///
/// Reading continuously keeps a chatty backend from blocking on a full pipe.
fn forward_stderr(server_name: &str, stderr: ChildStderr) -> StderrTail {
    let tail = StderrTail::default();
    let sink = tail.clone();
    let server = server_name.to_string();

    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(server = %server, "stderr: {line}");
            sink.push(line);
        }
    });

    tail
}

fn with_stderr(e: McpError, stderr: &str) -> McpError {
    if stderr.is_empty() {
        return e;
    }
    let suffix = format!(" | stderr: {}", stderr.trim());
    match e {
        McpError::InitFailed { name, reason } => McpError::InitFailed {
            name,
            reason: format!("{reason}{suffix}"),
        },
        McpError::Timeout {
            server,
            operation,
            timeout_ms,
        } => McpError::InitFailed {
            reason: format!("{operation} timed out after {timeout_ms}ms{suffix}"),
            name: server,
        },
        other => other,
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
