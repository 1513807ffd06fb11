//! Shared fixtures for unit tests: in-memory backends over `tokio::io::duplex`.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{duplex, split};

use crate::mcp_client::transport::StdioTransport;
use crate::mcp_client::{BackendSession, McpError};
use crate::mcp_server::manifest::{Manifest, ManifestHandler, ManifestTool};
use crate::mcp_server::serve;

/// A weather backend: `query_weather` answers with a fixed forecast,
/// `echo_args` returns its arguments.
pub(crate) fn weather_manifest() -> Manifest {
    Manifest {
        name: Some("weather".to_string()),
        tools: vec![
            ManifestTool::reply("query_weather", "北京: 晴, 25°C"),
            ManifestTool::echo("echo_args"),
        ],
        hang_on_initialize: false,
    }
}

/// Serve `manifest` on one end of a duplex pipe and handshake a session on the other.
pub(crate) async fn in_memory_session(
    name: &str,
    manifest: Manifest,
    init_timeout: Duration,
) -> Result<BackendSession, McpError> {
    let (client, server) = duplex(64 * 1024);
    let (server_read, server_write) = split(server);
    let handler = Arc::new(ManifestHandler::new(manifest));
    tokio::spawn(async move {
        let _ = serve(handler, server_read, server_write).await;
    });

    let (client_read, client_write) = split(client);
    BackendSession::connect(
        name,
        StdioTransport::new(name, client_write, client_read),
        init_timeout,
    )
    .await
}
