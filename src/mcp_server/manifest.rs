//! Manifest-driven tool server used by `demo-backend`.
//!
//! A manifest is a JSON file listing tools and what each one answers:
//!
//! ```json
//! {
//!   "name": "weather",
//!   "tools": [
//!     {"name": "query_weather", "reply": "weather for {city_code}: sunny"},
//!     {"name": "echo_args", "echo": true}
//!   ]
//! }
//! ```
//!
//! `reply` is a template: `{key}` is replaced with the argument `key`.
//! `echo` returns the arguments object as compact JSON. `is_error` flags
//! the reply as a tool-level error, and `delay_ms` sleeps before answering.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::errors::HandlerError;
use super::ToolHandler;
use crate::protocol::{CallToolResult, Implementation, ToolDefinition};

/// Parsed manifest file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tools: Vec<ManifestTool>,
    /// Never answer `initialize`; simulates a backend that hangs at startup.
    #[serde(default)]
    pub hang_on_initialize: bool,
}

impl Manifest {
    /// Read and parse a manifest file.
    pub fn load(path: &Path) -> Result<Self, HandlerError> {
        let raw = std::fs::read_to_string(path).map_err(|e| HandlerError::Internal {
            reason: format!("failed to read manifest {}: {e}", path.display()),
        })?;
        serde_json::from_str(&raw).map_err(|e| HandlerError::Internal {
            reason: format!("failed to parse manifest {}: {e}", path.display()),
        })
    }
}

/// One tool of a manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Option<serde_json::Value>,
    #[serde(default)]
    pub reply: Option<String>,
    #[serde(default)]
    pub echo: bool,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub delay_ms: u64,
}

impl ManifestTool {
    /// A tool answering with a fixed (template) text.
    pub fn reply(name: &str, reply: &str) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            input_schema: None,
            reply: Some(reply.to_string()),
            echo: false,
            is_error: false,
            delay_ms: 0,
        }
    }

    /// A tool answering with its own arguments.
    pub fn echo(name: &str) -> Self {
        Self {
            echo: true,
            reply: None,
            ..Self::reply(name, "")
        }
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self
                .input_schema
                .clone()
                .unwrap_or_else(|| serde_json::json!({"type": "object"})),
        }
    }

    fn answer(&self, arguments: &serde_json::Value) -> String {
        if self.echo {
            return serde_json::to_string(arguments).unwrap_or_default();
        }
        render_template(self.reply.as_deref().unwrap_or(""), arguments)
    }
}

/// Serves a [`Manifest`].
pub struct ManifestHandler {
    manifest: Manifest,
}

impl ManifestHandler {
    pub fn new(manifest: Manifest) -> Self {
        Self { manifest }
    }
}

#[async_trait]
impl ToolHandler for ManifestHandler {
    fn server_info(&self) -> Implementation {
        Implementation {
            name: self
                .manifest
                .name
                .clone()
                .unwrap_or_else(|| "demo-backend".to_string()),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    async fn initialize(&self, _params: &serde_json::Value) -> Result<(), HandlerError> {
        if self.manifest.hang_on_initialize {
            tracing::warn!("manifest asks to hang on initialize");
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn list_tools(&self) -> Vec<ToolDefinition> {
        self.manifest.tools.iter().map(ManifestTool::definition).collect()
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallToolResult, HandlerError> {
        let tool = self
            .manifest
            .tools
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| HandlerError::UnknownTool {
                name: name.to_string(),
            })?;

        if tool.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(tool.delay_ms)).await;
        }

        let text = tool.answer(&arguments);
        Ok(if tool.is_error {
            CallToolResult::error_text(text)
        } else {
            CallToolResult::text(text)
        })
    }
}

/// Replace `{key}` with the value of argument `key`. Strings are inserted
/// raw, other values as JSON. Unmatched placeholders are left alone.
fn render_template(template: &str, arguments: &serde_json::Value) -> String {
    let mut out = template.to_string();
    if let Some(args) = arguments.as_object() {
        for (key, value) in args {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out = out.replace(&format!("{{{key}}}"), &rendered);
        }
    }
    out
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_template() {
        let args = serde_json::json!({"city_code": "110000", "days": 3});
        assert_eq!(
            render_template("{city_code} for {days} days, {missing}", &args),
            "110000 for 3 days, {missing}"
        );
    }

    #[test]
    fn test_manifest_parse_defaults() {
        let manifest: Manifest =
            serde_json::from_str(r#"{"tools": [{"name": "a", "reply": "x"}]}"#).unwrap();
        assert!(!manifest.hang_on_initialize);
        assert_eq!(manifest.tools[0].definition().input_schema["type"], "object");
    }

    #[tokio::test]
    async fn test_call_flags_error_tools() {
        let mut tool = ManifestTool::reply("broken", "camera unavailable");
        tool.is_error = true;
        let handler = ManifestHandler::new(Manifest {
            name: None,
            tools: vec![tool],
            hang_on_initialize: false,
        });

        let result = handler.call_tool("broken", serde_json::json!({})).await.unwrap();
        assert!(result.is_error);
        assert_eq!(result.first_text(), Some("camera unavailable"));
        assert_eq!(handler.server_info().name, "demo-backend");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_handler_error() {
        let handler = ManifestHandler::new(Manifest::default());
        let err = handler.call_tool("nope", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, HandlerError::UnknownTool { .. }));
    }
}
