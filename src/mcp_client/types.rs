//! Backend-side data model.

use std::fmt;

use serde::Deserialize;

/// One entry of the backends configuration file.
///
/// Unknown fields in the file are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BackendDescriptor {
    /// Unique backend name; the routing table maps tools to this.
    pub name: String,
    /// Script path, relative to the backends directory.
    pub script: String,
}

impl BackendDescriptor {
    pub fn new(name: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: script.into(),
        }
    }
}

/// Lifecycle of a backend session.
///
/// `Created → Spawned → Initializing → Ready`, or `Initializing → Failed`.
/// `Ready → Terminated` once the channel is lost or the gateway shuts down.
/// `Failed` and `Terminated` are terminal: sessions are never restarted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Spawned,
    Initializing,
    Ready,
    Failed { reason: String },
    Terminated,
}

impl SessionState {
    /// Only `Ready` sessions accept forwarded calls.
    pub fn is_ready(&self) -> bool {
        matches!(self, SessionState::Ready)
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Spawned => "spawned",
            SessionState::Initializing => "initializing",
            SessionState::Ready => "ready",
            SessionState::Failed { .. } => "failed",
            SessionState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Failed { reason } => write!(f, "failed: {reason}"),
            other => f.write_str(other.label()),
        }
    }
}

/// Outcome of initializing one descriptor, kept for the startup summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendReport {
    pub name: String,
    pub state: SessionState,
    /// Tools this backend contributed to the registry.
    pub registered_tools: usize,
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_ignores_unknown_fields() {
        let json = r#"{"name": "weather", "script": "weather.py", "comment": "demo"}"#;
        let desc: BackendDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(desc, BackendDescriptor::new("weather", "weather.py"));
    }

    #[test]
    fn test_only_ready_accepts_calls() {
        assert!(SessionState::Ready.is_ready());
        assert!(!SessionState::Initializing.is_ready());
        assert!(!SessionState::Terminated.is_ready());
        assert!(!SessionState::Failed { reason: "x".into() }.is_ready());
    }

    #[test]
    fn test_failed_state_display_carries_reason() {
        let state = SessionState::Failed {
            reason: "handshake timed out".into(),
        };
        assert_eq!(state.to_string(), "failed: handshake timed out");
        assert_eq!(SessionState::Ready.to_string(), "ready");
    }
}
