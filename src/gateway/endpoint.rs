//! The gateway as a tool server: one advertised tool, `proxy_tool_call`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::Gateway;
use crate::mcp_server::{HandlerError, ToolHandler};
use crate::protocol::{CallToolResult, Implementation, ToolDefinition};

/// The only tool the gateway advertises.
pub const PROXY_TOOL_NAME: &str = "proxy_tool_call";

/// Arguments of `proxy_tool_call`.
#[derive(Debug, Default, Deserialize)]
struct ProxyArgs {
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    args: Option<Value>,
}

impl ProxyArgs {
    /// Accept `{tool, args}` as well as the wrapped `{params: {tool, args}}` form.
    fn from_arguments(arguments: Value) -> Result<Self, HandlerError> {
        let arguments = match arguments {
            Value::Null => return Ok(Self::default()),
            Value::Object(mut map) if !map.contains_key("tool") && map.contains_key("params") => {
                map.remove("params").unwrap_or(Value::Null)
            }
            other => other,
        };
        if arguments.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(arguments).map_err(|e| HandlerError::InvalidParams {
            reason: format!("{PROXY_TOOL_NAME}: {e}"),
        })
    }
}

impl Gateway {
    /// Definition of `proxy_tool_call`, listing the tools currently routed.
    pub fn proxy_tool_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: PROXY_TOOL_NAME.to_string(),
            description: format!(
                "Forward a tool call to the backend that provides the tool.\n\n{}",
                self.registry().catalog_summary()
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "tool": {
                        "type": "string",
                        "description": "Name of the tool to call"
                    },
                    "args": {
                        "type": "object",
                        "description": "Arguments passed to the tool"
                    }
                },
                "required": ["tool"]
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for Gateway {
    fn server_info(&self) -> Implementation {
        Implementation::gateway()
    }

    fn instructions(&self) -> Option<String> {
        Some(format!(
            "Call {PROXY_TOOL_NAME} with {{\"tool\": <name>, \"args\": {{...}}}}. {} tools available.",
            self.registry().len()
        ))
    }

    async fn list_tools(&self) -> Vec<ToolDefinition> {
        vec![self.proxy_tool_definition()]
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, HandlerError> {
        if name != PROXY_TOOL_NAME {
            return Err(HandlerError::UnknownTool {
                name: name.to_string(),
            });
        }

        let args = ProxyArgs::from_arguments(arguments)?;
        let outcome = self
            .proxy_tool_call(args.tool.as_deref().unwrap_or(""), args.args)
            .await;
        Ok(outcome.into_call_result())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::gateway::GatewayBuilder;
    use crate::mcp_server::serve;
    use crate::test_support::{in_memory_session, weather_manifest};
    use tokio::io::{duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader};

    async fn weather_gateway() -> Gateway {
        let session = in_memory_session("weather", weather_manifest(), Duration::from_secs(5))
            .await
            .unwrap();
        let mut builder = GatewayBuilder::default();
        builder.add_session(session);
        builder.build()
    }

    #[test]
    fn test_proxy_args_accepts_both_shapes() {
        let flat = ProxyArgs::from_arguments(serde_json::json!({"tool": "a", "args": {"x": 1}})).unwrap();
        assert_eq!(flat.tool.as_deref(), Some("a"));
        assert_eq!(flat.args, Some(serde_json::json!({"x": 1})));

        let wrapped =
            ProxyArgs::from_arguments(serde_json::json!({"params": {"tool": "b"}})).unwrap();
        assert_eq!(wrapped.tool.as_deref(), Some("b"));
        assert!(wrapped.args.is_none());

        let empty = ProxyArgs::from_arguments(Value::Null).unwrap();
        assert!(empty.tool.is_none());
    }

    #[test]
    fn test_proxy_args_rejects_non_string_tool() {
        let err = ProxyArgs::from_arguments(serde_json::json!({"tool": 5})).unwrap_err();
        assert!(matches!(err, HandlerError::InvalidParams { .. }));
    }

    #[tokio::test]
    async fn test_lists_single_proxy_tool() {
        let gateway = weather_gateway().await;
        let tools = gateway.list_tools().await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, PROXY_TOOL_NAME);
        assert_eq!(tools[0].input_schema["required"], serde_json::json!(["tool"]));
        assert!(tools[0].description.contains("query_weather"));
        assert!(tools[0].description.contains("echo_args"));
    }

    #[tokio::test]
    async fn test_call_tool_maps_outcomes() {
        let gateway = weather_gateway().await;

        let ok = gateway
            .call_tool(
                PROXY_TOOL_NAME,
                serde_json::json!({"tool": "query_weather", "args": {"city_code": "110000"}}),
            )
            .await
            .unwrap();
        assert!(!ok.is_error);
        assert_eq!(ok.first_text(), Some("北京: 晴, 25°C"));

        let warned = gateway
            .call_tool(PROXY_TOOL_NAME, serde_json::json!({"tool": "generate_image"}))
            .await
            .unwrap();
        assert!(warned.is_error);
        assert_eq!(warned.first_text(), Some("⚠️ unknown tool: generate_image"));

        let err = gateway.call_tool("query_weather", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, HandlerError::UnknownTool { .. }));
    }

    #[tokio::test]
    async fn test_gateway_served_over_json_rpc() {
        let gateway = Arc::new(weather_gateway().await);
        let (client, server) = duplex(64 * 1024);
        let (server_read, server_write) = split(server);
        let task = tokio::spawn(serve(Arc::clone(&gateway), server_read, server_write));

        let (client_read, mut client_write) = split(client);
        let call = r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"proxy_tool_call","arguments":{"params":{"tool":"echo_args","args":{"city":"上海"}}}}}"#;
        client_write.write_all(format!("{call}\n").as_bytes()).await.unwrap();

        let mut lines = BufReader::new(client_read).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let resp: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(resp["id"], 1);
        assert_eq!(resp["result"]["content"][0]["text"], r#"{"city":"上海"}"#);
        assert_eq!(resp["result"]["isError"], false);

        client_write.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }
}
