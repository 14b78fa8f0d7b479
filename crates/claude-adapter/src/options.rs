use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

// ─── Permission callback ──────────────────────────────────────────────────

/// Outcome of a `can_use_tool` callback, serialised to the CLI's
/// `{behavior:"allow",updatedInput}` / `{behavior:"deny",message}` shape.
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionResult {
    Allow {
        updated_input: Option<serde_json::Value>,
    },
    Deny {
        message: String,
    },
}

impl PermissionResult {
    pub fn to_wire(&self) -> serde_json::Value {
        match self {
            PermissionResult::Allow { updated_input } => match updated_input {
                Some(input) => {
                    serde_json::json!({ "behavior": "allow", "updatedInput": input })
                }
                None => serde_json::json!({ "behavior": "allow" }),
            },
            PermissionResult::Deny { message } => {
                serde_json::json!({ "behavior": "deny", "message": message })
            }
        }
    }
}

/// One tool-permission question from the backend.
#[derive(Debug, Clone)]
pub struct ToolUseRequest {
    pub tool_name: String,
    pub input: serde_json::Value,
    /// The backend's tool-use id when it supplies one; pending prompts are
    /// keyed by it.
    pub tool_use_id: Option<String>,
}

/// Async callback invoked by the backend before a tool runs. The future may
/// suspend for as long as it likes (e.g. waiting on a user answer); the
/// backend blocks the tool until it resolves.
pub type CanUseToolFn =
    Arc<dyn Fn(ToolUseRequest) -> BoxFuture<'static, PermissionResult> + Send + Sync>;

// ─── MCP / settings ───────────────────────────────────────────────────────

/// Stdio MCP server configuration, consumed opaquely by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Which settings files the CLI loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingSource {
    User,
    Project,
    Local,
}

impl SettingSource {
    pub fn as_str(self) -> &'static str {
        match self {
            SettingSource::User => "user",
            SettingSource::Project => "project",
            SettingSource::Local => "local",
        }
    }
}

// ─── QueryOptions ─────────────────────────────────────────────────────────

/// Options for driving one backend query.
#[derive(Clone, Default)]
pub struct QueryOptions {
    /// Working directory for the subprocess.
    pub cwd: Option<PathBuf>,
    /// Previous session id to continue.
    pub resume: Option<String>,
    /// Override system prompt.
    pub system_prompt: Option<String>,
    /// MCP servers keyed by logical name.
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
    /// Settings files to load; `None` means the CLI default
    /// (user, project, local).
    pub setting_sources: Option<Vec<SettingSource>>,
    /// Emit partial message chunks. Defaults to true in [`QueryOptions::new`].
    pub include_partial_messages: bool,
    /// Permission gate invoked before every tool run.
    pub can_use_tool: Option<CanUseToolFn>,
    /// Cooperative cancellation handle for the in-flight query.
    pub cancel: CancellationToken,
    /// Custom path to the `claude` binary.
    pub path_to_executable: Option<String>,
}

impl QueryOptions {
    pub fn new() -> Self {
        QueryOptions {
            include_partial_messages: true,
            ..Default::default()
        }
    }
}

impl fmt::Debug for QueryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("cwd", &self.cwd)
            .field("resume", &self.resume)
            .field("system_prompt", &self.system_prompt.as_deref().map(|_| "…"))
            .field("mcp_servers", &self.mcp_servers.keys().collect::<Vec<_>>())
            .field("setting_sources", &self.setting_sources)
            .field("include_partial_messages", &self.include_partial_messages)
            .field("can_use_tool", &self.can_use_tool.as_ref().map(|_| "fn"))
            .finish()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
