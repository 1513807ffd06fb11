use std::time::Duration;

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(mcp_gateway::run());
    // A pending stdin read sits on a blocking thread and would hold up a plain drop.
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}
