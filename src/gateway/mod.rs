//! Gateway: the aggregate the caller talks to.
//!
//! A [`GatewayBuilder`] collects sessions and failures while backends start.
//! [`GatewayBuilder::build`] is the initialization barrier: the resulting
//! [`Gateway`] never changes its session table or registry again, so it is
//! shared behind an `Arc` without further locking. Per-session state still
//! moves (a session can become `Terminated`); that lives inside the session.

pub mod config;
pub mod dispatcher;
pub mod endpoint;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use crate::mcp_client::{
    BackendReport, BackendSession, CollisionPolicy, SessionState, ToolRegistry,
};

pub use config::{load_backend_descriptors, ConfigError, GatewayConfig, LogFormat};
pub use dispatcher::{DispatchOutcome, DispatchWarning};
pub use endpoint::PROXY_TOOL_NAME;

/// Default deadline for one forwarded tool call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

// ─── Builder ─────────────────────────────────────────────────────────────────

/// Mutable staging area used while backends are being started.
#[derive(Default)]
pub struct GatewayBuilder {
    sessions: HashMap<String, Arc<BackendSession>>,
    registry: ToolRegistry,
    reports: Vec<BackendReport>,
    call_timeout: Option<Duration>,
}

impl GatewayBuilder {
    pub fn new(policy: CollisionPolicy) -> Self {
        Self {
            registry: ToolRegistry::new(policy),
            ..Self::default()
        }
    }

    /// Deadline applied to every forwarded call.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Whether a backend with this name was already seen (ready or failed).
    pub fn contains(&self, name: &str) -> bool {
        self.reports.iter().any(|r| r.name == name)
    }

    /// Take ownership of a ready session and register its tools.
    ///
    /// Returns the number of tools that now route to it.
    pub fn add_session(&mut self, session: BackendSession) -> usize {
        let name = session.name().to_string();
        let registered = self.registry.register_backend_tools(&name, session.tools());
        if registered < session.tools().len() {
            tracing::warn!(
                server = %name,
                advertised = session.tools().len(),
                registered,
                "some tools were not registered"
            );
        }

        self.reports.push(BackendReport {
            name: name.clone(),
            state: SessionState::Ready,
            registered_tools: registered,
        });
        self.sessions.insert(name, Arc::new(session));
        registered
    }

    /// Record a backend that never became ready.
    pub fn record_failure(&mut self, name: &str, reason: impl Into<String>) {
        self.reports.push(BackendReport {
            name: name.to_string(),
            state: SessionState::Failed {
                reason: reason.into(),
            },
            registered_tools: 0,
        });
    }

    pub fn ready_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn failed_count(&self) -> usize {
        self.reports.len() - self.sessions.len()
    }

    pub fn tool_count(&self) -> usize {
        self.registry.len()
    }

    /// Freeze the session table and registry.
    pub fn build(self) -> Gateway {
        let gateway = Gateway {
            sessions: self.sessions,
            registry: self.registry,
            reports: self.reports,
            call_timeout: self.call_timeout.unwrap_or(DEFAULT_CALL_TIMEOUT),
        };
        gateway.log_summary();
        gateway
    }
}

// ─── Gateway ─────────────────────────────────────────────────────────────────

/// Ready sessions plus the routing table built from their tools.
pub struct Gateway {
    sessions: HashMap<String, Arc<BackendSession>>,
    registry: ToolRegistry,
    reports: Vec<BackendReport>,
    call_timeout: Duration,
}

impl Gateway {
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// One report per descriptor, in startup order.
    pub fn reports(&self) -> &[BackendReport] {
        &self.reports
    }

    pub fn session(&self, name: &str) -> Option<&Arc<BackendSession>> {
        self.sessions.get(name)
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Names of backends that can currently take calls, sorted.
    pub fn ready_backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .sessions
            .values()
            .filter(|s| s.is_ready())
            .map(|s| s.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Stop every backend. Sessions shut down concurrently.
    pub async fn shutdown(&self) {
        let mut tasks = JoinSet::new();
        for session in self.sessions.values() {
            let session = Arc::clone(session);
            tasks.spawn(async move { session.shutdown().await });
        }
        while tasks.join_next().await.is_some() {}
        tracing::info!(count = self.sessions.len(), "all backends shut down");
    }

    fn log_summary(&self) {
        for report in &self.reports {
            match &report.state {
                SessionState::Failed { reason } => {
                    tracing::warn!(server = %report.name, reason = %reason, "backend unavailable");
                }
                state => {
                    tracing::info!(
                        server = %report.name,
                        state = state.label(),
                        tools = report.registered_tools,
                        "backend summary"
                    );
                }
            }
        }
        tracing::info!(
            backends = self.reports.len(),
            ready = self.sessions.len(),
            tools = self.registry.len(),
            tool_names = ?self.registry.tool_names(),
            "gateway initialized"
        );
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_server::manifest::{Manifest, ManifestTool};
    use crate::test_support::{in_memory_session, weather_manifest};

    fn camera_manifest() -> Manifest {
        Manifest {
            name: Some("camera".into()),
            tools: vec![
                ManifestTool::reply("take_photo", "photo saved"),
                ManifestTool::reply("query_weather", "camera weather"),
            ],
            hang_on_initialize: false,
        }
    }

    #[tokio::test]
    async fn test_builder_registers_tools_and_reports() {
        let weather = in_memory_session("weather", weather_manifest(), Duration::from_secs(5))
            .await
            .unwrap();
        let camera = in_memory_session("camera", camera_manifest(), Duration::from_secs(5))
            .await
            .unwrap();

        let mut builder = GatewayBuilder::new(CollisionPolicy::FirstWins);
        assert_eq!(builder.add_session(weather), 2);
        assert_eq!(builder.add_session(camera), 1);
        builder.record_failure("image", "script not found");
        assert!(builder.contains("image"));
        assert_eq!(builder.failed_count(), 1);

        let gateway = builder.build();
        assert_eq!(gateway.registry().backend_for("query_weather"), Some("weather"));
        assert_eq!(gateway.registry().backend_for("take_photo"), Some("camera"));
        assert_eq!(gateway.ready_backends(), vec!["camera", "weather"]);
        assert_eq!(gateway.call_timeout(), DEFAULT_CALL_TIMEOUT);

        let names: Vec<&str> = gateway.reports().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["weather", "camera", "image"]);
        assert_eq!(gateway.reports()[1].registered_tools, 1);
    }

    #[tokio::test]
    async fn test_last_wins_reroutes_shared_tool() {
        let weather = in_memory_session("weather", weather_manifest(), Duration::from_secs(5))
            .await
            .unwrap();
        let camera = in_memory_session("camera", camera_manifest(), Duration::from_secs(5))
            .await
            .unwrap();

        let mut builder = GatewayBuilder::new(CollisionPolicy::LastWins);
        builder.add_session(weather);
        builder.add_session(camera);
        let gateway = builder.build();

        assert_eq!(gateway.registry().backend_for("query_weather"), Some("camera"));
    }

    #[tokio::test]
    async fn test_shutdown_terminates_every_session() {
        let weather = in_memory_session("weather", weather_manifest(), Duration::from_secs(5))
            .await
            .unwrap();
        let mut builder = GatewayBuilder::default();
        builder.add_session(weather);
        let gateway = builder.call_timeout(Duration::from_secs(1)).build();

        gateway.shutdown().await;
        assert_eq!(gateway.session("weather").unwrap().state(), SessionState::Terminated);
        assert!(gateway.ready_backends().is_empty());
    }
}
