use serde::{Deserialize, Serialize};

// ─── PermissionMode ───────────────────────────────────────────────────────

/// Per-conversation permission mode. Wire values are camelCase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    #[default]
    Default,
    AcceptEdits,
    BypassPermissions,
}

impl PermissionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PermissionMode::Default => "default",
            PermissionMode::AcceptEdits => "acceptEdits",
            PermissionMode::BypassPermissions => "bypassPermissions",
        }
    }
}

// ─── Decision tables ──────────────────────────────────────────────────────

/// Non-mutating tools that are always allowed, in any mode.
pub const AUTO_ALLOW_TOOLS: &[&str] = &[
    "Read",
    "Glob",
    "Grep",
    "WebSearch",
    "WebFetch",
    "TodoWrite",
    "NotebookRead",
    "ListMcpResources",
    "ReadMcpResource",
];

/// File path fragments that make edit tools an automatic deny.
const PROTECTED_PATH_MARKERS: &[&str] = &[".env", ".secret", ".credentials", ".password"];

/// Bash command fragments that are an automatic deny.
const DENIED_COMMAND_MARKERS: &[&str] = &["rm -rf /", "format", "shutdown", "reboot", "mkfs"];

/// Tools whose edits acceptEdits auto-allows.
const EDIT_TOOLS: &[&str] = &["Edit", "Write", "Bash", "NotebookEdit"];

/// Path-taking edit tools checked against [`PROTECTED_PATH_MARKERS`].
const FILE_EDIT_TOOLS: &[&str] = &["Edit", "Write", "NotebookEdit"];

/// The interactive question tool; inherently requires a user answer.
pub const ASK_USER_QUESTION: &str = "AskUserQuestion";

/// Outcome of the pure permission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionDecision {
    Allow,
    Deny(String),
    Ask,
}

/// Decide whether a tool invocation may proceed without asking the user.
///
/// Evaluation order is the contract:
/// 1. the auto-allow set wins regardless of mode,
/// 2. auto-deny rules are final and dominate every mode override,
/// 3. `acceptEdits` auto-allows the edit tools,
/// 4. `bypassPermissions` allows everything except [`ASK_USER_QUESTION`],
/// 5. anything else asks.
///
/// Total and side-effect-free; callers translate `Ask` into an interactive
/// prompt.
pub fn check_permission(
    tool_name: &str,
    input: &serde_json::Value,
    mode: PermissionMode,
) -> PermissionDecision {
    if AUTO_ALLOW_TOOLS.contains(&tool_name) {
        return PermissionDecision::Allow;
    }

    if let Some(reason) = auto_deny_reason(tool_name, input) {
        return PermissionDecision::Deny(reason);
    }

    match mode {
        PermissionMode::AcceptEdits if EDIT_TOOLS.contains(&tool_name) => PermissionDecision::Allow,
        PermissionMode::BypassPermissions if tool_name != ASK_USER_QUESTION => {
            PermissionDecision::Allow
        }
        _ => PermissionDecision::Ask,
    }
}

fn auto_deny_reason(tool_name: &str, input: &serde_json::Value) -> Option<String> {
    if FILE_EDIT_TOOLS.contains(&tool_name) {
        let path = input.get("file_path").and_then(|v| v.as_str())?;
        for marker in PROTECTED_PATH_MARKERS {
            if path.contains(marker) {
                return Some(format!("Protected file: {path}"));
            }
        }
        return None;
    }

    if tool_name == "Bash" {
        let command = input.get("command").and_then(|v| v.as_str())?;
        for marker in DENIED_COMMAND_MARKERS {
            if command.contains(marker) {
                return Some(format!("Dangerous command blocked: {marker}"));
            }
        }
    }

    None
}

// ─── Tests ────────────────────────────────────────────────────────────────
