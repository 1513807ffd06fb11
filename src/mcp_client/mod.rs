//! MCP Client: the gateway's outward side, one session per backend.
//!
//! This module handles:
//! - Resolving backend scripts and picking an interpreter by extension
//! - Spawning backend child processes with piped stdio
//! - JSON-RPC 2.0 communication over process stdio
//! - The initialize / tools/list handshake, bounded by a deadline
//! - Routing tool names to backends, with an explicit collision policy
//!
//! The [`SessionSupervisor`] starts every configured backend and hands the
//! result to a [`GatewayBuilder`](crate::gateway::GatewayBuilder).

pub mod errors;
pub mod launcher;
pub mod registry;
pub mod session;
pub mod supervisor;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use errors::McpError;
pub use launcher::{parse_launcher_overrides, Launch, LauncherTable};
pub use registry::{CollisionPolicy, ToolRegistry};
pub use session::BackendSession;
pub use supervisor::{SessionSupervisor, SupervisorSettings};
pub use types::{BackendDescriptor, BackendReport, SessionState};
