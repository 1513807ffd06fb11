//! Wire protocol shared by both sides of the gateway.
//!
//! Line-delimited JSON-RPC 2.0 carrying the MCP tool methods. The gateway is
//! a client of every backend and a server to its own caller, so the same
//! message types are used in both directions.

pub mod jsonrpc;
pub mod messages;

pub use jsonrpc::{
    error_codes, IncomingMessage, JsonRpcError, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, OutgoingResponse,
};
pub use messages::{
    CallToolParams, CallToolResult, ContentBlock, Implementation, InitializeParams,
    InitializeResult, ListToolsResult, ToolDefinition, PROTOCOL_VERSION,
};
