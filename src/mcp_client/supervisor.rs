//! Session supervisor: brings every configured backend up, one at a time.
//!
//! Descriptors are processed in order. Each one is resolved, spawned and
//! handshaken; a failure is logged, recorded and skipped so the remaining
//! backends still start. Nothing is retried.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use super::errors::McpError;
use super::launcher::LauncherTable;
use super::registry::CollisionPolicy;
use super::session::BackendSession;
use super::types::BackendDescriptor;
use crate::gateway::GatewayBuilder;

/// Default deadline for each handshake step.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// How backends are located, launched and registered.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Directory script paths are resolved against.
    pub backends_dir: PathBuf,
    pub launchers: LauncherTable,
    pub init_timeout: Duration,
    pub collision_policy: CollisionPolicy,
}

impl SupervisorSettings {
    pub fn new(backends_dir: impl Into<PathBuf>) -> Self {
        Self {
            backends_dir: backends_dir.into(),
            launchers: LauncherTable::default(),
            init_timeout: DEFAULT_INIT_TIMEOUT,
            collision_policy: CollisionPolicy::default(),
        }
    }
}

pub struct SessionSupervisor {
    settings: SupervisorSettings,
}

impl SessionSupervisor {
    pub fn new(settings: SupervisorSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    /// Start every descriptor and collect the results into a builder.
    ///
    /// Never fails: a backend that does not come up is recorded as `Failed`
    /// and contributes no tools.
    pub async fn start_all(&self, descriptors: &[BackendDescriptor]) -> GatewayBuilder {
        let mut builder = GatewayBuilder::new(self.settings.collision_policy);
        let start = Instant::now();

        tracing::info!(
            count = descriptors.len(),
            backends_dir = %self.settings.backends_dir.display(),
            init_timeout_ms = self.settings.init_timeout.as_millis() as u64,
            policy = %self.settings.collision_policy,
            "starting backends"
        );

        for descriptor in descriptors {
            if builder.contains(&descriptor.name) {
                tracing::warn!(server = %descriptor.name, "backend already started, skipping duplicate");
                continue;
            }

            match self.start_one(descriptor).await {
                Ok(session) => {
                    builder.add_session(session);
                }
                Err(e) => {
                    tracing::error!(server = %descriptor.name, error = %e, "backend failed to start");
                    builder.record_failure(&descriptor.name, e.to_string());
                }
            }
        }

        tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            ready = builder.ready_count(),
            failed = builder.failed_count(),
            tools = builder.tool_count(),
            "backend startup finished"
        );
        builder
    }

    /// Resolve, spawn and handshake a single descriptor.
    pub async fn start_one(&self, descriptor: &BackendDescriptor) -> Result<BackendSession, McpError> {
        let launch = self
            .settings
            .launchers
            .resolve(descriptor, &self.settings.backends_dir)?;

        tracing::info!(
            server = %descriptor.name,
            command = %launch.command,
            script = %launch.script.display(),
            "starting backend"
        );

        let session = BackendSession::spawn(descriptor, &launch, self.settings.init_timeout).await?;
        tracing::info!(
            server = %descriptor.name,
            tools = session.tools().len(),
            "backend ready"
        );
        Ok(session)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::types::SessionState;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_and_unsupported_scripts_are_isolated() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("weather_server"), "").unwrap();

        let supervisor = SessionSupervisor::new(SupervisorSettings::new(dir.path()));
        let descriptors = vec![
            BackendDescriptor::new("missing", "nope.py"),
            BackendDescriptor::new("weather", "weather_server"),
        ];
        let gateway = supervisor.start_all(&descriptors).await.build();

        assert!(gateway.registry().is_empty());
        let reports = gateway.reports();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].name, "missing");
        assert!(matches!(&reports[0].state, SessionState::Failed { reason } if reason.contains("not found")));
        assert!(matches!(&reports[1].state, SessionState::Failed { reason } if reason.contains("unsupported")));
    }

    #[tokio::test]
    async fn test_empty_descriptor_list_builds_empty_gateway() {
        let dir = TempDir::new().unwrap();
        let supervisor = SessionSupervisor::new(SupervisorSettings::new(dir.path()));
        let gateway = supervisor.start_all(&[]).await.build();
        assert!(gateway.registry().is_empty());
        assert!(gateway.reports().is_empty());
    }

    #[tokio::test]
    async fn test_spawn_failure_when_interpreter_missing() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("srv.zz"), "").unwrap();

        let mut settings = SupervisorSettings::new(dir.path());
        settings.launchers.register("zz", "definitely-not-an-interpreter-3f9a");
        let supervisor = SessionSupervisor::new(settings);

        let err = supervisor
            .start_one(&BackendDescriptor::new("ghost", "srv.zz"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, McpError::SpawnFailed { .. }), "got {err:?}");
    }
}
