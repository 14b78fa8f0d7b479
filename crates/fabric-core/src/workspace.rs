use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::error::{FabricError, Result};
use crate::log::LogEntry;
use crate::permission::PermissionMode;

// ─── Conversation ─────────────────────────────────────────────────────────

/// Lifecycle status of a conversation. Transitions are driven only by the
/// workstation core.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    #[default]
    Idle,
    Working,
    Permission,
}

/// Realtime token counters for the in-flight turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    /// Milliseconds since epoch of the last counter update.
    pub last_updated: i64,
}

/// Message-log paging state surfaced to clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paging {
    pub total_count: usize,
    pub has_more: bool,
    pub is_loading_more: bool,
}

/// One interactive question inside an `AskUserQuestion` tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub multi_select: bool,
}

/// A prompt awaiting a user answer. Owned by its conversation; destroyed by
/// an explicit answer, by session replacement, or by conversation deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingRequest {
    Permission {
        #[serde(rename = "toolUseId")]
        tool_use_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        #[serde(rename = "toolInput")]
        tool_input: serde_json::Value,
    },
    Question {
        #[serde(rename = "toolUseId")]
        tool_use_id: String,
        questions: Vec<Question>,
    },
}

impl PendingRequest {
    pub fn tool_use_id(&self) -> &str {
        match self {
            PendingRequest::Permission { tool_use_id, .. }
            | PendingRequest::Question { tool_use_id, .. } => tool_use_id,
        }
    }
}

/// A single AI session thread with its own message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub entity_id: EntityId,
    pub name: String,
    /// The backend's session token; replaced on every new session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdk_session_id: Option<String>,
    #[serde(default)]
    pub permission_mode: PermissionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_system_prompt: Option<String>,
    #[serde(default)]
    pub log: Vec<LogEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending: Vec<PendingRequest>,
    /// Streaming assistant output not yet finalised. Always empty at Idle.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text_buffer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_start_time: Option<i64>,
    #[serde(default)]
    pub realtime_usage: RealtimeUsage,
    #[serde(default)]
    pub paging: Paging,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub linked_docs: Vec<PathBuf>,
    #[serde(default)]
    pub status: ConversationStatus,
}

impl Conversation {
    pub fn new(entity_id: EntityId, name: impl Into<String>) -> Self {
        Conversation {
            entity_id,
            name: name.into(),
            sdk_session_id: None,
            permission_mode: PermissionMode::Default,
            custom_system_prompt: None,
            log: Vec::new(),
            pending: Vec::new(),
            text_buffer: String::new(),
            work_start_time: None,
            realtime_usage: RealtimeUsage::default(),
            paging: Paging::default(),
            linked_docs: Vec::new(),
            status: ConversationStatus::Idle,
        }
    }

    /// Transition status, maintaining the invariant that `text_buffer` is
    /// empty whenever the conversation is idle.
    pub fn set_status(&mut self, status: ConversationStatus) {
        if status == ConversationStatus::Idle {
            self.text_buffer.clear();
            self.work_start_time = None;
        }
        self.status = status;
    }

    pub fn append(&mut self, entry: LogEntry) {
        self.log.push(entry);
        self.paging.total_count = self.paging.total_count.max(self.log.len());
    }

    pub fn pending_request(&self, tool_use_id: &str) -> Option<&PendingRequest> {
        self.pending.iter().find(|r| r.tool_use_id() == tool_use_id)
    }

    pub fn remove_pending(&mut self, tool_use_id: &str) -> Option<PendingRequest> {
        let idx = self
            .pending
            .iter()
            .position(|r| r.tool_use_id() == tool_use_id)?;
        Some(self.pending.remove(idx))
    }
}

// ─── Workspace & store ────────────────────────────────────────────────────

/// A working directory on a pylon, holding an ordered set of conversations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub entity_id: EntityId,
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub conversations: Vec<Conversation>,
}

impl Workspace {
    pub fn new(entity_id: EntityId, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Workspace {
            entity_id,
            name: name.into(),
            path: path.into(),
            conversations: Vec::new(),
        }
    }
}

/// The ordered set of workspaces owned by one workstation, with the active
/// selection. Persisted as a single JSON document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceStore {
    #[serde(default)]
    pub workspaces: Vec<Workspace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_workspace_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_conversation_id: Option<EntityId>,
}

impl WorkspaceStore {
    pub fn add_workspace(&mut self, workspace: Workspace) -> Result<()> {
        if self.workspace(workspace.entity_id).is_some() {
            return Err(FabricError::Conflict(format!(
                "workspace {} already exists",
                workspace.entity_id
            )));
        }
        if self.active_workspace_id.is_none() {
            self.active_workspace_id = Some(workspace.entity_id);
        }
        self.workspaces.push(workspace);
        Ok(())
    }

    pub fn workspace(&self, id: EntityId) -> Option<&Workspace> {
        self.workspaces.iter().find(|w| w.entity_id == id)
    }

    pub fn workspace_mut(&mut self, id: EntityId) -> Option<&mut Workspace> {
        self.workspaces.iter_mut().find(|w| w.entity_id == id)
    }

    /// Add a conversation to its parent workspace. Exactly one conversation
    /// per entity id, anywhere in the store.
    pub fn add_conversation(&mut self, conversation: Conversation) -> Result<()> {
        let id = conversation.entity_id;
        if self.conversation(id).is_some() {
            return Err(FabricError::Conflict(format!(
                "conversation {id} already exists"
            )));
        }
        let parent = id.parent_workspace();
        let workspace = self
            .workspace_mut(parent)
            .ok_or_else(|| FabricError::NotFound(format!("workspace {parent}")))?;
        workspace.conversations.push(conversation);
        if self.active_conversation_id.is_none() {
            self.active_conversation_id = Some(id);
        }
        Ok(())
    }

    pub fn conversation(&self, id: EntityId) -> Option<&Conversation> {
        self.workspaces
            .iter()
            .flat_map(|w| w.conversations.iter())
            .find(|c| c.entity_id == id)
    }

    pub fn conversation_mut(&mut self, id: EntityId) -> Option<&mut Conversation> {
        self.workspaces
            .iter_mut()
            .flat_map(|w| w.conversations.iter_mut())
            .find(|c| c.entity_id == id)
    }

    pub fn remove_conversation(&mut self, id: EntityId) -> Option<Conversation> {
        for workspace in &mut self.workspaces {
            if let Some(idx) = workspace.conversations.iter().position(|c| c.entity_id == id) {
                if self.active_conversation_id == Some(id) {
                    self.active_conversation_id = None;
                }
                return Some(workspace.conversations.remove(idx));
            }
        }
        None
    }

    pub fn remove_workspace(&mut self, id: EntityId) -> Option<Workspace> {
        let idx = self.workspaces.iter().position(|w| w.entity_id == id)?;
        let removed = self.workspaces.remove(idx);
        if self.active_workspace_id == Some(id) {
            self.active_workspace_id = None;
        }
        if let Some(active) = self.active_conversation_id {
            if active.parent_workspace() == id {
                self.active_conversation_id = None;
            }
        }
        Some(removed)
    }

    pub fn set_active(&mut self, workspace: Option<EntityId>, conversation: Option<EntityId>) -> Result<()> {
        if let Some(w) = workspace {
            if self.workspace(w).is_none() {
                return Err(FabricError::NotFound(format!("workspace {w}")));
            }
            self.active_workspace_id = Some(w);
        }
        if let Some(c) = conversation {
            if self.conversation(c).is_none() {
                return Err(FabricError::NotFound(format!("conversation {c}")));
            }
            self.active_conversation_id = Some(c);
        }
        Ok(())
    }

    pub fn conversations(&self) -> impl Iterator<Item = &Conversation> {
        self.workspaces.iter().flat_map(|w| w.conversations.iter())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
