//! Tool call dispatch: name lookup, forwarding, reply normalization.
//!
//! [`Gateway::proxy_tool_call`] never fails. Every problem the caller can
//! run into (bad input, unknown tool, dead backend, backend error) comes
//! back as a [`DispatchOutcome`] whose text the caller can show as-is.

use serde_json::Value;
use thiserror::Error;

use super::Gateway;
use crate::mcp_client::McpError;
use crate::protocol::CallToolResult;

/// Prefix of every warning text.
pub const WARNING_MARKER: &str = "⚠️ ";

/// How many similar names an unknown-tool warning suggests.
const MAX_SUGGESTIONS: usize = 3;

/// A dispatch that did not reach (or did not get a usable answer from) a backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchWarning {
    #[error("⚠️ tool name is missing")]
    MissingToolName,

    #[error("⚠️ arguments must be an object, got {kind}")]
    InvalidArguments { kind: &'static str },

    #[error("⚠️ unknown tool: {name}{}", suggestion_hint(.suggestions))]
    UnknownTool {
        name: String,
        suggestions: Vec<String>,
    },

    #[error("⚠️ backend '{backend}' is not connected")]
    BackendUnavailable { backend: String },

    #[error("⚠️ tool call failed: {reason}")]
    CallFailed { tool: String, reason: String },

    #[error("⚠️ tool '{tool}' timed out after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },
}

fn suggestion_hint(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" (did you mean: {}?)", suggestions.join(", "))
    }
}

/// Result of one `proxy_tool_call`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// First text content of the backend's reply, verbatim.
    Success(String),
    /// The backend answered with a tool-level error; its text, verbatim.
    BackendError(String),
    /// The gateway could not complete the call.
    Warning(DispatchWarning),
}

impl DispatchOutcome {
    /// Text payload handed back to the caller.
    pub fn text(&self) -> String {
        match self {
            DispatchOutcome::Success(text) | DispatchOutcome::BackendError(text) => text.clone(),
            DispatchOutcome::Warning(warning) => warning.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DispatchOutcome::Success(_))
    }

    pub fn into_call_result(self) -> CallToolResult {
        match self {
            DispatchOutcome::Success(text) => CallToolResult::text(text),
            other => CallToolResult::error_text(other.text()),
        }
    }
}

impl From<DispatchWarning> for DispatchOutcome {
    fn from(warning: DispatchWarning) -> Self {
        DispatchOutcome::Warning(warning)
    }
}

impl Gateway {
    /// Route one tool call to the backend that owns `tool`.
    ///
    /// Missing or null `args` become `{}`.
    pub async fn proxy_tool_call(&self, tool: &str, args: Option<Value>) -> DispatchOutcome {
        let outcome = self.dispatch(tool.trim(), args).await;
        match &outcome {
            DispatchOutcome::Success(_) => {
                tracing::info!(tool, "tool call succeeded");
            }
            DispatchOutcome::BackendError(text) => {
                tracing::warn!(tool, error = %text, "backend reported tool error");
            }
            DispatchOutcome::Warning(warning) => {
                tracing::warn!(tool, warning = %warning, "tool call not completed");
            }
        }
        outcome
    }

    async fn dispatch(&self, tool: &str, args: Option<Value>) -> DispatchOutcome {
        if tool.is_empty() {
            return DispatchWarning::MissingToolName.into();
        }

        let arguments = match args {
            None | Some(Value::Null) => Value::Object(serde_json::Map::new()),
            Some(obj @ Value::Object(_)) => obj,
            Some(other) => {
                return DispatchWarning::InvalidArguments {
                    kind: json_kind(&other),
                }
                .into();
            }
        };

        let Some(backend) = self.registry.backend_for(tool) else {
            return DispatchWarning::UnknownTool {
                name: tool.to_string(),
                suggestions: self.registry.find_similar(tool, MAX_SUGGESTIONS),
            }
            .into();
        };

        let Some(session) = self.sessions.get(backend).filter(|s| s.is_ready()) else {
            return DispatchWarning::BackendUnavailable {
                backend: backend.to_string(),
            }
            .into();
        };

        tracing::debug!(tool, backend, "forwarding tool call");
        match session.call_tool(tool, arguments, self.call_timeout).await {
            Ok(result) => normalize_reply(tool, result),
            Err(McpError::Timeout { timeout_ms, .. }) => DispatchWarning::Timeout {
                tool: tool.to_string(),
                timeout_ms,
            }
            .into(),
            Err(McpError::NotReady { name, .. }) => {
                DispatchWarning::BackendUnavailable { backend: name }.into()
            }
            Err(e) => DispatchWarning::CallFailed {
                tool: tool.to_string(),
                reason: e.to_string(),
            }
            .into(),
        }
    }
}

/// Keep the first content element's text; anything else is a failed call.
fn normalize_reply(tool: &str, result: CallToolResult) -> DispatchOutcome {
    match result.first_text() {
        Some(text) if result.is_error => DispatchOutcome::BackendError(text.to_string()),
        Some(text) => DispatchOutcome::Success(text.to_string()),
        None => DispatchWarning::CallFailed {
            tool: tool.to_string(),
            reason: if result.content.is_empty() {
                "reply has no content".to_string()
            } else {
                "first content element is not text".to_string()
            },
        }
        .into(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::gateway::GatewayBuilder;
    use crate::mcp_server::manifest::{Manifest, ManifestTool};
    use crate::protocol::ContentBlock;
    use crate::test_support::{in_memory_session, weather_manifest};

    async fn gateway_with(manifests: Vec<(&str, Manifest)>, call_timeout: Duration) -> Gateway {
        let mut builder = GatewayBuilder::default().call_timeout(call_timeout);
        for (name, manifest) in manifests {
            let session = in_memory_session(name, manifest, Duration::from_secs(5))
                .await
                .unwrap();
            builder.add_session(session);
        }
        builder.build()
    }

    async fn weather_gateway() -> Gateway {
        gateway_with(vec![("weather", weather_manifest())], Duration::from_secs(5)).await
    }

    #[tokio::test]
    async fn test_success_returns_backend_text_verbatim() {
        let gateway = weather_gateway().await;
        let outcome = gateway
            .proxy_tool_call("query_weather", Some(serde_json::json!({"city_code": "110000"})))
            .await;
        assert_eq!(outcome, DispatchOutcome::Success("北京: 晴, 25°C".into()));
        assert_eq!(outcome.text(), "北京: 晴, 25°C");
    }

    #[tokio::test]
    async fn test_missing_args_become_empty_object() {
        let gateway = weather_gateway().await;
        let outcome = gateway.proxy_tool_call("echo_args", None).await;
        assert_eq!(outcome.text(), "{}");

        let outcome = gateway.proxy_tool_call("echo_args", Some(Value::Null)).await;
        assert_eq!(outcome.text(), "{}");
    }

    #[tokio::test]
    async fn test_non_object_args_rejected() {
        let gateway = weather_gateway().await;
        let outcome = gateway
            .proxy_tool_call("echo_args", Some(serde_json::json!([1, 2])))
            .await;
        assert_eq!(
            outcome,
            DispatchOutcome::Warning(DispatchWarning::InvalidArguments { kind: "array" })
        );
        assert!(outcome.text().starts_with(WARNING_MARKER));
    }

    #[tokio::test]
    async fn test_missing_tool_name() {
        let gateway = weather_gateway().await;
        let outcome = gateway.proxy_tool_call("  ", None).await;
        assert_eq!(outcome.text(), "⚠️ tool name is missing");
    }

    #[tokio::test]
    async fn test_unknown_tool_warns_with_suggestions() {
        let gateway = weather_gateway().await;
        let outcome = gateway.proxy_tool_call("query_wether", None).await;
        let text = outcome.text();
        assert!(text.starts_with("⚠️ unknown tool: query_wether"), "{text}");
        assert!(text.contains("query_weather"));

        let outcome = gateway.proxy_tool_call("generate_image", None).await;
        assert_eq!(outcome.text(), "⚠️ unknown tool: generate_image");
    }

    #[tokio::test]
    async fn test_backend_error_passed_through() {
        let mut broken = ManifestTool::reply("take_photo", "camera unavailable");
        broken.is_error = true;
        let manifest = Manifest {
            name: Some("camera".into()),
            tools: vec![broken],
            hang_on_initialize: false,
        };
        let gateway = gateway_with(vec![("camera", manifest)], Duration::from_secs(5)).await;

        let outcome = gateway.proxy_tool_call("take_photo", None).await;
        assert_eq!(outcome, DispatchOutcome::BackendError("camera unavailable".into()));
        assert!(outcome.clone().into_call_result().is_error);
    }

    #[tokio::test]
    async fn test_slow_tool_times_out() {
        let mut slow = ManifestTool::reply("slow", "late");
        slow.delay_ms = 2_000;
        let manifest = Manifest {
            name: None,
            tools: vec![slow],
            hang_on_initialize: false,
        };
        let gateway = gateway_with(vec![("slow", manifest)], Duration::from_millis(100)).await;

        let outcome = gateway.proxy_tool_call("slow", None).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Warning(DispatchWarning::Timeout {
                tool: "slow".into(),
                timeout_ms: 100,
            })
        );
    }

    #[tokio::test]
    async fn test_terminated_backend_reported_unavailable() {
        let gateway = weather_gateway().await;
        gateway.shutdown().await;

        let outcome = gateway.proxy_tool_call("query_weather", None).await;
        assert_eq!(outcome.text(), "⚠️ backend 'weather' is not connected");
    }

    #[test]
    fn test_non_text_reply_is_call_failure() {
        let result = CallToolResult {
            content: vec![ContentBlock::Image {
                data: "AAAA".into(),
                mime_type: "image/png".into(),
            }],
            is_error: false,
        };
        let outcome = normalize_reply("take_photo", result);
        assert!(outcome.text().contains("first content element is not text"));

        let outcome = normalize_reply("x", CallToolResult { content: vec![], is_error: false });
        assert!(outcome.text().contains("reply has no content"));
    }

    #[test]
    fn test_into_call_result_flags_warnings() {
        let ok = DispatchOutcome::Success("fine".into()).into_call_result();
        assert!(!ok.is_error);
        let warned = DispatchOutcome::from(DispatchWarning::MissingToolName).into_call_result();
        assert!(warned.is_error);
        assert_eq!(warned.first_text(), Some("⚠️ tool name is missing"));
    }
}
