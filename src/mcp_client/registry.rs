//! Tool registry: routes tool names to the backend that owns them.
//!
//! Provides:
//! - Registration of a backend's discovered tools under an explicit
//!   collision policy
//! - Lookup of the owning backend and tool definition by name
//! - Similar-name suggestions for unknown tools
//! - A catalog summary for the gateway's own tool description
//!
//! Tool names are the plain names backends advertise; the caller never sees
//! which backend owns a tool.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::protocol::ToolDefinition;

// ─── Collision Policy ────────────────────────────────────────────────────────

/// What happens when two backends advertise the same tool name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollisionPolicy {
    /// Keep the backend initialized first; log and drop the later claim.
    #[default]
    FirstWins,
    /// The backend initialized last takes the name over (logged).
    LastWins,
}

impl FromStr for CollisionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "first-wins" | "first" => Ok(Self::FirstWins),
            "last-wins" | "last" => Ok(Self::LastWins),
            other => Err(format!(
                "unknown tool conflict policy '{other}' (expected first-wins or last-wins)"
            )),
        }
    }
}

impl fmt::Display for CollisionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FirstWins => "first-wins",
            Self::LastWins => "last-wins",
        })
    }
}

// ─── ToolRegistry ────────────────────────────────────────────────────────────

/// Routing table from tool name to owning backend.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    /// `tool_name → (backend_name, definition)`.
    tools: HashMap<String, (String, ToolDefinition)>,
    policy: CollisionPolicy,
}

impl ToolRegistry {
    /// Create an empty registry with the given collision policy.
    pub fn new(policy: CollisionPolicy) -> Self {
        Self {
            tools: HashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> CollisionPolicy {
        self.policy
    }

    /// Register the tools a backend advertised.
    ///
    /// Returns how many of them now route to `backend`.
    pub fn register_backend_tools(&mut self, backend: &str, tools: &[ToolDefinition]) -> usize {
        let mut registered = 0;

        for tool in tools {
            if tool.name.is_empty() {
                tracing::warn!(backend, "ignoring tool with empty name");
                continue;
            }

            if let Some((owner, _)) = self.tools.get(&tool.name) {
                if owner == backend {
                    tracing::warn!(backend, tool = %tool.name, "backend listed tool twice");
                    continue;
                }
                match self.policy {
                    CollisionPolicy::FirstWins => {
                        tracing::warn!(
                            tool = %tool.name,
                            owner = %owner,
                            rejected = backend,
                            "tool name conflict, keeping first registration"
                        );
                        continue;
                    }
                    CollisionPolicy::LastWins => {
                        tracing::warn!(
                            tool = %tool.name,
                            previous = %owner,
                            owner = backend,
                            "tool name conflict, later backend takes over"
                        );
                    }
                }
            }

            self.tools
                .insert(tool.name.clone(), (backend.to_string(), tool.clone()));
            tracing::info!(tool = %tool.name, backend, "registered tool");
            registered += 1;
        }

        registered
    }

    /// Look up a tool definition by name.
    pub fn get_tool(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name).map(|(_, def)| def)
    }

    /// Get the backend name that owns a tool.
    pub fn backend_for(&self, tool_name: &str) -> Option<&str> {
        self.tools.get(tool_name).map(|(backend, _)| backend.as_str())
    }

    /// All registered tool names, sorted.
    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Count tools routed to a specific backend.
    pub fn tools_for_backend(&self, backend: &str) -> usize {
        self.tools.values().filter(|(b, _)| b == backend).count()
    }

    /// All backends that own at least one tool, sorted.
    pub fn backend_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .values()
            .map(|(b, _)| b.clone())
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect();
        names.sort();
        names
    }

    /// Find up to `max_results` registered names similar to `name`, best first.
    pub fn find_similar(&self, name: &str, max_results: usize) -> Vec<String> {
        let mut scored: Vec<(String, f64)> = self
            .tools
            .keys()
            .map(|candidate| (candidate.clone(), similarity(name, candidate)))
            .filter(|(_, score)| *score > 0.5)
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(max_results);
        scored.into_iter().map(|(name, _)| name).collect()
    }

    /// One line per routed tool, for the gateway's advertised description.
    pub fn catalog_summary(&self) -> String {
        if self.is_empty() {
            return "No backend tools are currently available.".to_string();
        }

        let mut summary = format!(
            "Routed tools ({} across {} backends):",
            self.len(),
            self.backend_names().len()
        );
        for name in self.tool_names() {
            let description = self
                .get_tool(name)
                .map(|def| first_line(&def.description))
                .unwrap_or("");
            if description.is_empty() {
                summary.push_str(&format!("\n- {name}"));
            } else {
                summary.push_str(&format!("\n- {name}: {description}"));
            }
        }
        summary
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("").trim()
}

// ─── Edit Distance ──────────────────────────────────────────────────────────

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let n = b.len();

    // Use single-row DP for O(n) space
    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0usize; n + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1) // deletion
                .min(curr[j] + 1) // insertion
                .min(prev[j] + cost); // substitution
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

/// Normalized similarity between two strings (0.0 = completely different, 1.0 = identical).
fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    let dist = levenshtein(a, b);
    1.0 - (dist as f64 / max_len as f64)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
