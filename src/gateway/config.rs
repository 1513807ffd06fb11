//! Gateway configuration loading.
//!
//! Two sources:
//! - The backend descriptor file (`servers.json`, or YAML), a list of
//!   `{name, script}` entries. `${VAR}` and `${VAR:-default}` are expanded
//!   inside string values after parsing, so substituted text is never read
//!   as JSON or YAML syntax.
//! - Environment variables for paths, deadlines, collision policy, extra
//!   launchers and logging.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::mcp_client::supervisor::DEFAULT_INIT_TIMEOUT;
use crate::mcp_client::{
    parse_launcher_overrides, BackendDescriptor, CollisionPolicy, LauncherTable,
    SupervisorSettings,
};

use super::DEFAULT_CALL_TIMEOUT;

/// Descriptor file name looked up in the project root.
pub const DEFAULT_CONFIG_FILE: &str = "servers.json";

/// Backends directory name looked up in the project root.
pub const DEFAULT_SERVERS_DIR: &str = "servers";

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Why a descriptor file was rejected.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("invalid backend list in {path}: {reason}")]
    Invalid { path: String, reason: String },
}

// ─── Descriptor File ─────────────────────────────────────────────────────────

/// Load backend descriptors, or an empty list if the file is unusable.
///
/// Never fails: the reason is logged and the gateway starts with no backends.
pub fn load_backend_descriptors(path: &Path) -> Vec<BackendDescriptor> {
    match try_load_backend_descriptors(path) {
        Ok(descriptors) => {
            tracing::info!(
                path = %path.display(),
                count = descriptors.len(),
                backends = ?descriptors.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
                "loaded backend descriptors"
            );
            descriptors
        }
        Err(e) => {
            tracing::error!(error = %e, "backend configuration unusable, starting with no backends");
            Vec::new()
        }
    }
}

/// Load backend descriptors, reporting why the file was rejected.
///
/// A single malformed entry rejects the whole file. Later entries reusing an
/// earlier name are logged and dropped.
pub fn try_load_backend_descriptors(path: &Path) -> Result<Vec<BackendDescriptor>, ConfigError> {
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: display.clone(),
        source,
    })?;

    let mut value: serde_json::Value = if is_yaml(path) {
        serde_yaml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: display.clone(),
            reason: e.to_string(),
        })?
    } else {
        serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: display.clone(),
            reason: e.to_string(),
        })?
    };
    interpolate_strings(&mut value);

    let entries = value.as_array().ok_or_else(|| ConfigError::Invalid {
        path: display.clone(),
        reason: "expected a list of {name, script} entries".into(),
    })?;

    let mut seen = HashSet::new();
    let mut descriptors = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let descriptor = parse_entry(entry).map_err(|reason| ConfigError::Invalid {
            path: display.clone(),
            reason: format!("entry {index}: {reason}"),
        })?;
        if !seen.insert(descriptor.name.clone()) {
            tracing::warn!(server = %descriptor.name, index, "duplicate backend name, skipping entry");
            continue;
        }
        descriptors.push(descriptor);
    }

    Ok(descriptors)
}

fn parse_entry(entry: &serde_json::Value) -> Result<BackendDescriptor, String> {
    let obj = entry
        .as_object()
        .ok_or_else(|| "entry is not an object".to_string())?;
    let field = |key: &str| -> Result<String, String> {
        match obj.get(key).and_then(|v| v.as_str()).map(str::trim) {
            Some(s) if !s.is_empty() => Ok(s.to_string()),
            _ => Err(format!("missing '{key}'")),
        }
    };
    Ok(BackendDescriptor::new(field("name")?, field("script")?))
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
        .unwrap_or(false)
}

// ─── Environment ─────────────────────────────────────────────────────────────

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}' (expected text or json)")),
        }
    }
}

/// Everything the gateway reads from its environment.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub project_root: PathBuf,
    pub config_file: PathBuf,
    pub servers_dir: PathBuf,
    pub init_timeout: Duration,
    pub call_timeout: Duration,
    pub collision_policy: CollisionPolicy,
    /// Extra `(extension, command)` launchers.
    pub launchers: Vec<(String, String)>,
    /// Write a rotating log file here instead of logging to stderr.
    pub log_dir: Option<PathBuf>,
    pub log_format: LogFormat,
    /// Problems found while reading the environment. Logged by
    /// [`log_resolved`](Self::log_resolved) once tracing is up.
    issues: Vec<String>,
}

impl GatewayConfig {
    /// Read the process environment.
    pub fn from_env() -> Self {
        let cwd = std::env::current_dir().unwrap_or_default();
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));
        let project_root = resolve_project_root(&cwd, exe_dir.as_deref());
        Self::from_lookup(|key| std::env::var(key).ok(), project_root)
    }

    /// Build from an arbitrary variable lookup. Relative paths resolve
    /// against `project_root`.
    pub fn from_lookup<F>(lookup: F, project_root: PathBuf) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut issues = Vec::new();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let path_var = |key: &str, default: &str| -> PathBuf {
            let raw = var(key).map(|v| expand_tilde(&v)).unwrap_or_else(|| default.to_string());
            let path = PathBuf::from(raw);
            if path.is_absolute() {
                path
            } else {
                project_root.join(path)
            }
        };

        let config_file = path_var("CONFIG_FILE", DEFAULT_CONFIG_FILE);
        let servers_dir = path_var("SERVERS_DIR", DEFAULT_SERVERS_DIR);

        let init_timeout = parse_or_default(
            var("GATEWAY_INIT_TIMEOUT_SECS"),
            "GATEWAY_INIT_TIMEOUT_SECS",
            DEFAULT_INIT_TIMEOUT,
            parse_secs,
            &mut issues,
        );
        let call_timeout = parse_or_default(
            var("GATEWAY_CALL_TIMEOUT_SECS"),
            "GATEWAY_CALL_TIMEOUT_SECS",
            DEFAULT_CALL_TIMEOUT,
            parse_secs,
            &mut issues,
        );
        let collision_policy = parse_or_default(
            var("GATEWAY_TOOL_CONFLICTS"),
            "GATEWAY_TOOL_CONFLICTS",
            CollisionPolicy::default(),
            |s| s.parse(),
            &mut issues,
        );
        let log_format = parse_or_default(
            var("GATEWAY_LOG_FORMAT"),
            "GATEWAY_LOG_FORMAT",
            LogFormat::default(),
            |s| s.parse(),
            &mut issues,
        );

        let launchers = var("GATEWAY_LAUNCHERS")
            .map(|pairs| parse_launcher_overrides(&pairs))
            .unwrap_or_default();
        let log_dir = var("GATEWAY_LOG_DIR").map(|v| PathBuf::from(expand_tilde(&v)));

        Self {
            project_root,
            config_file,
            servers_dir,
            init_timeout,
            call_timeout,
            collision_policy,
            launchers,
            log_dir,
            log_format,
            issues,
        }
    }

    /// Supervisor settings derived from this configuration.
    pub fn supervisor_settings(&self) -> SupervisorSettings {
        let mut launchers = LauncherTable::default();
        for (ext, command) in &self.launchers {
            launchers.register(ext, command);
        }
        SupervisorSettings {
            backends_dir: self.servers_dir.clone(),
            launchers,
            init_timeout: self.init_timeout,
            collision_policy: self.collision_policy,
        }
    }

    /// Log the effective configuration and any ignored values.
    pub fn log_resolved(&self) {
        for issue in &self.issues {
            tracing::warn!("{issue}");
        }
        tracing::info!(
            project_root = %self.project_root.display(),
            config_file = %self.config_file.display(),
            servers_dir = %self.servers_dir.display(),
            init_timeout_secs = self.init_timeout.as_secs(),
            call_timeout_secs = self.call_timeout.as_secs(),
            policy = %self.collision_policy,
            launchers = ?self.launchers,
            "gateway configuration"
        );
    }
}

fn parse_secs(raw: &str) -> Result<Duration, String> {
    match raw.parse::<u64>() {
        Ok(0) => Err("must be greater than zero".into()),
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(e) => Err(e.to_string()),
    }
}

fn parse_or_default<T, P>(
    raw: Option<String>,
    key: &str,
    default: T,
    parse: P,
    issues: &mut Vec<String>,
) -> T
where
    P: Fn(&str) -> Result<T, String>,
{
    let Some(raw) = raw else {
        return default;
    };
    match parse(&raw) {
        Ok(value) => value,
        Err(reason) => {
            issues.push(format!("ignoring {key}={raw}: {reason}"));
            default
        }
    }
}

/// Determine the project root directory.
///
/// Resolution order:
/// 1. cwd, if it holds `servers.json` or `servers/`.
/// 2. The executable's directory, if it does.
/// 3. Fallback: cwd.
pub fn resolve_project_root(cwd: &Path, exe_dir: Option<&Path>) -> PathBuf {
    let looks_like_root =
        |dir: &Path| dir.join(DEFAULT_CONFIG_FILE).is_file() || dir.join(DEFAULT_SERVERS_DIR).is_dir();

    if looks_like_root(cwd) {
        return cwd.to_path_buf();
    }
    if let Some(exe_dir) = exe_dir {
        if looks_like_root(exe_dir) {
            return exe_dir.to_path_buf();
        }
    }
    cwd.to_path_buf()
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Interpolate every string in a parsed document, keys excluded.
fn interpolate_strings(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::String(s) => {
            if s.contains("${") {
                *s = interpolate_env_vars(s);
            }
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(interpolate_strings),
        serde_json::Value::Object(map) => map.values_mut().for_each(interpolate_strings),
        _ => {}
    }
}

/// Replace `${VAR}` and `${VAR:-default}` in a string.
///
/// An unterminated `${` is kept as written.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                result.push_str(&resolve_var_expr(&after[..end]));
                rest = &after[end + 1..];
            }
            None => {
                tracing::warn!(
                    text = %input,
                    "unterminated variable reference in config value, kept literally"
                );
                result.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    result.push_str(rest);

    result
}

/// Resolve `VAR` or `VAR:-default`. Unset without default becomes empty.
fn resolve_var_expr(expr: &str) -> String {
    if let Some((var_name, default)) = expr.split_once(":-") {
        std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
    } else {
        std::env::var(expr).unwrap_or_default()
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
