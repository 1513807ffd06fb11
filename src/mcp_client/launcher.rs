//! Backend launch resolution: script path and interpreter by extension.
//!
//! A descriptor names a script relative to the backends directory. The
//! script's extension decides which interpreter runs it: `.py` → Python,
//! `.js` → Node. Other extensions can be registered (for example from
//! `GATEWAY_LAUNCHERS`); anything unregistered fails that descriptor only.
//! A bare name like `weather_server` that does not exist is looked up with
//! each registered extension appended.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::errors::McpError;
use super::types::BackendDescriptor;

// ─── Platform Helpers ────────────────────────────────────────────────────────

/// Platform-correct Python command.
///
/// macOS 12.3+ removed the `python` symlink; only `python3` exists.
/// Windows installs Python as `python.exe` via the official installer.
fn default_python_command() -> &'static str {
    if cfg!(target_os = "windows") {
        "python"
    } else {
        "python3"
    }
}

fn default_node_command() -> &'static str {
    "node"
}

// ─── Launch ──────────────────────────────────────────────────────────────────

/// A fully resolved command line for one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launch {
    pub command: String,
    pub args: Vec<String>,
    /// Absolute script path.
    pub script: PathBuf,
}

/// Interpreter lookup keyed by lowercase file extension (without the dot).
#[derive(Debug, Clone)]
pub struct LauncherTable {
    by_extension: HashMap<String, String>,
}

impl Default for LauncherTable {
    fn default() -> Self {
        let mut by_extension = HashMap::new();
        by_extension.insert("py".to_string(), default_python_command().to_string());
        by_extension.insert("js".to_string(), default_node_command().to_string());
        Self { by_extension }
    }
}

impl LauncherTable {
    /// Register (or replace) the interpreter for an extension.
    pub fn register(&mut self, extension: &str, command: &str) {
        let ext = extension.trim().trim_start_matches('.').to_ascii_lowercase();
        self.by_extension.insert(ext, command.trim().to_string());
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_launcher(mut self, extension: &str, command: &str) -> Self {
        self.register(extension, command);
        self
    }

    /// Interpreter for an extension, if one is registered.
    pub fn command_for(&self, extension: &str) -> Option<&str> {
        self.by_extension
            .get(&extension.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Resolve a descriptor into a launchable command line.
    ///
    /// Fails with `ScriptNotFound` when the script is absent and
    /// `UnsupportedScript` when no interpreter matches its extension.
    pub fn resolve(
        &self,
        descriptor: &BackendDescriptor,
        backends_dir: &Path,
    ) -> Result<Launch, McpError> {
        let mut candidate = backends_dir.join(&descriptor.script);
        if candidate.extension().is_none() && !candidate.exists() {
            if let Some(found) = self.with_known_extension(&candidate) {
                tracing::debug!(
                    server = %descriptor.name,
                    script = %found.display(),
                    "resolved extensionless script"
                );
                candidate = found;
            }
        }
        let script = candidate
            .canonicalize()
            .map_err(|_| McpError::ScriptNotFound {
                name: descriptor.name.clone(),
                path: candidate.display().to_string(),
            })?;
        if !script.is_file() {
            return Err(McpError::ScriptNotFound {
                name: descriptor.name.clone(),
                path: script.display().to_string(),
            });
        }

        let command = script
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.command_for(ext))
            .ok_or_else(|| McpError::UnsupportedScript {
                name: descriptor.name.clone(),
                script: descriptor.script.clone(),
            })?;

        Ok(Launch {
            command: command.to_string(),
            args: vec![script.to_string_lossy().into_owned()],
            script,
        })
    }

    /// `path.<ext>` for the first registered extension (alphabetical) that
    /// names an existing file.
    fn with_known_extension(&self, path: &Path) -> Option<PathBuf> {
        let mut extensions: Vec<&String> = self.by_extension.keys().collect();
        extensions.sort();
        extensions
            .into_iter()
            .map(|ext| path.with_extension(ext))
            .find(|p| p.is_file())
    }
}

/// Parse `ext=command` pairs separated by commas, e.g. `"rb=ruby, sh=/bin/sh"`.
///
/// Malformed pairs are logged and skipped.
pub fn parse_launcher_overrides(pairs: &str) -> Vec<(String, String)> {
    pairs
        .split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| match pair.split_once('=') {
            Some((ext, cmd)) if !ext.trim().is_empty() && !cmd.trim().is_empty() => {
                Some((ext.trim().to_string(), cmd.trim().to_string()))
            }
            _ => {
                tracing::warn!(entry = %pair, "ignoring malformed launcher override");
                None
            }
        })
        .collect()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
