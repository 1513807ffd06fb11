//! A leaf tool server driven by a manifest file.
//!
//! Usage: `demo-backend <manifest.json>`. Serves MCP on stdin/stdout until
//! stdin closes; logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use mcp_gateway::mcp_server::manifest::{Manifest, ManifestHandler};
use mcp_gateway::mcp_server::serve;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("demo_backend=info,mcp_gateway=info,warn")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let path: PathBuf = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: demo-backend <manifest.json>")?;

    let manifest = Manifest::load(&path)?;
    tracing::info!(
        manifest = %path.display(),
        name = ?manifest.name,
        tools = manifest.tools.len(),
        "demo backend starting"
    );

    serve(
        Arc::new(ManifestHandler::new(manifest)),
        tokio::io::stdin(),
        tokio::io::stdout(),
    )
    .await
    .context("demo backend serving loop failed")?;

    tracing::info!("demo backend input closed, exiting");
    Ok(())
}
