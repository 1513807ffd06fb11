//! Tool server runtime: the caller-facing side of the protocol.
//!
//! A [`ToolHandler`] describes a set of tools; [`serve`] speaks line-delimited
//! JSON-RPC on a byte channel on its behalf. The gateway serves itself this
//! way, so to its caller it is indistinguishable from any leaf tool server.
//! The manifest handler backs the `demo-backend` binary.

pub mod endpoint;
pub mod errors;
pub mod manifest;

use async_trait::async_trait;

use crate::protocol::{CallToolResult, Implementation, ToolDefinition};

pub use endpoint::serve;
pub use errors::{HandlerError, ServeError};

/// The tools a server exposes and how to run them.
#[async_trait]
pub trait ToolHandler: Send + Sync + 'static {
    /// Reported as `serverInfo` in the `initialize` reply.
    fn server_info(&self) -> Implementation;

    /// Optional usage notes returned with `initialize`.
    fn instructions(&self) -> Option<String> {
        None
    }

    /// Hook run before the `initialize` reply is sent.
    async fn initialize(&self, _params: &serde_json::Value) -> Result<(), HandlerError> {
        Ok(())
    }

    async fn list_tools(&self) -> Vec<ToolDefinition>;

    /// Run one tool. Tool-level failures belong in `CallToolResult::is_error`;
    /// `Err` is for protocol-level problems such as an unknown tool name.
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallToolResult, HandlerError>;
}
