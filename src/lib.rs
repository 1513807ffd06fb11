pub mod gateway;
pub mod mcp_client;
pub mod mcp_server;
pub mod protocol;

#[cfg(test)]
pub(crate) mod test_support;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use gateway::{load_backend_descriptors, GatewayConfig, LogFormat};
use mcp_client::SessionSupervisor;

/// Log file name inside `GATEWAY_LOG_DIR`.
const LOG_FILE_NAME: &str = "gateway.log";

/// Rotated log files kept next to the live one.
const LOG_FILES_KEPT: u32 = 3;

/// Initialize the tracing subscriber.
///
/// stdout carries the protocol, so logs go to stderr, or to a rotating
/// `gateway.log` when a log directory is configured:
/// 1. Rotates existing logs (gateway.log → gateway.log.1 → .2 → .3, keeps last 3).
/// 2. Opens a fresh gateway.log with a line-flushing writer for crash resilience.
fn init_tracing(config: &GatewayConfig) {
    use std::io::IsTerminal;
    use tracing_subscriber::fmt;
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::EnvFilter;

    let mut file_error = None;
    let (writer, ansi, log_path) = match config.log_dir.as_deref().map(open_log_file) {
        Some(Ok((writer, path))) => (BoxMakeWriter::new(writer), false, Some(path)),
        Some(Err(e)) => {
            file_error = Some(e);
            (BoxMakeWriter::new(std::io::stderr), false, None)
        }
        None => (
            BoxMakeWriter::new(std::io::stderr),
            std::io::stderr().is_terminal(),
            None,
        ),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mcp_gateway=info,warn"));

    let builder = fmt::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(true)
        .with_thread_ids(false);

    let installed = match config.log_format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    if let Err(e) = installed {
        eprintln!("mcp-gateway: failed to initialize logging: {e}");
    }

    if let Some(e) = file_error {
        tracing::warn!(error = %e, "could not open log file, logging to stderr");
    }

    // Startup banner, so the right log file is easy to find
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = ?log_path.as_ref().map(|p| p.display().to_string()),
        pid = std::process::id(),
        "=== MCP gateway starting ==="
    );
}

fn open_log_file(log_dir: &Path) -> std::io::Result<(FlushingWriter, std::path::PathBuf)> {
    std::fs::create_dir_all(log_dir)?;
    let log_path = log_dir.join(LOG_FILE_NAME);

    // Rotate: gateway.log.2 → .3, .1 → .2, gateway.log → .1
    rotate_log_file(&log_path, LOG_FILES_KEPT);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    Ok((FlushingWriter::new(log_file), log_path))
}

/// Rotate log files: `gateway.log` → `gateway.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    // Delete the oldest
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    // Shift: .{n-1} → .{n}
    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    // Current → .1
    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write.
///
/// Without explicit flushing, the last lines before a crash or a kill can be
/// lost, and those are the ones that explain it.
#[derive(Clone)]
struct FlushingWriter {
    file: Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Resolves when the process is asked to stop (Ctrl-C, or SIGTERM on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl-C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}

/// Run the gateway until stdin closes or a shutdown signal arrives.
///
/// Backends are started sequentially before the gateway answers its first
/// request; every backend is stopped before this returns.
pub async fn run() -> anyhow::Result<()> {
    // Tracing first, before any tracing::info!() calls
    let config = GatewayConfig::from_env();
    init_tracing(&config);
    config.log_resolved();

    let descriptors = load_backend_descriptors(&config.config_file);
    let supervisor = SessionSupervisor::new(config.supervisor_settings());
    let gateway = Arc::new(
        supervisor
            .start_all(&descriptors)
            .await
            .call_timeout(config.call_timeout)
            .build(),
    );

    let served = tokio::select! {
        result = mcp_server::serve(Arc::clone(&gateway), tokio::io::stdin(), tokio::io::stdout()) => {
            tracing::info!("caller closed stdin");
            result.context("gateway endpoint failed")
        }
        _ = shutdown_signal() => Ok(()),
    };

    gateway.shutdown().await;
    if let Err(e) = &served {
        tracing::error!(error = %e, "gateway stopped with an error");
    }
    tracing::info!("=== MCP gateway stopped ===");
    served
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_rotate_log_file_keeps_three() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join(LOG_FILE_NAME);
        for generation in 0..5 {
            std::fs::write(&base, format!("run {generation}")).unwrap();
            rotate_log_file(&base, LOG_FILES_KEPT);
        }

        assert!(!base.exists());
        let read = |suffix: u32| std::fs::read_to_string(format!("{}.{suffix}", base.display())).unwrap();
        assert_eq!(read(1), "run 4");
        assert_eq!(read(2), "run 3");
        assert_eq!(read(3), "run 2");
        assert!(!Path::new(&format!("{}.4", base.display())).exists());
    }

    #[test]
    fn test_open_log_file_creates_dir_and_writes_through() {
        let dir = TempDir::new().unwrap();
        let log_dir = dir.path().join("logs");
        let (mut writer, path) = open_log_file(&log_dir).unwrap();

        writer.write_all(b"hello\n").unwrap();
        assert_eq!(path, log_dir.join(LOG_FILE_NAME));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
    }

    #[test]
    fn test_tracing_events_reach_log_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(LOG_FILE_NAME), "previous run\n").unwrap();
        let (writer, path) = open_log_file(dir.path()).unwrap();

        let subscriber = tracing_subscriber::fmt()
            .with_writer(writer)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(server = "weather", "backend ready");
        });

        // Flushed per write, so the line is on disk without dropping the writer
        let contents = std::fs::read_to_string(&path).unwrap();
        let line: serde_json::Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(line["fields"]["message"], "backend ready");
        assert_eq!(line["fields"]["server"], "weather");
        assert_eq!(
            std::fs::read_to_string(format!("{}.1", path.display())).unwrap(),
            "previous run\n"
        );
    }
}
