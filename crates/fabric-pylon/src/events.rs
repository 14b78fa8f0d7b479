use serde::Serialize;

use fabric_core::entity::EntityId;
use fabric_core::log::LogEntry;
use fabric_core::workspace::{ConversationStatus, PendingRequest, RealtimeUsage};

/// Ephemeral events republished to subscribers (the relay uplink, local
/// observers). Every variant names the conversation it belongs to.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PylonEvent {
    #[serde(rename_all = "camelCase")]
    SessionStart {
        conversation_id: EntityId,
        session_id: String,
    },
    #[serde(rename_all = "camelCase")]
    StatusChange {
        conversation_id: EntityId,
        status: ConversationStatus,
    },
    #[serde(rename_all = "camelCase")]
    TextDelta {
        conversation_id: EntityId,
        text: String,
    },
    /// A durable log entry was appended.
    #[serde(rename_all = "camelCase")]
    MessageAppended {
        conversation_id: EntityId,
        entry: LogEntry,
    },
    #[serde(rename_all = "camelCase")]
    PermissionRequested {
        conversation_id: EntityId,
        request: PendingRequest,
    },
    #[serde(rename_all = "camelCase")]
    QuestionRequested {
        conversation_id: EntityId,
        request: PendingRequest,
    },
    #[serde(rename_all = "camelCase")]
    PermissionResolved {
        conversation_id: EntityId,
        tool_use_id: String,
    },
    #[serde(rename_all = "camelCase")]
    CompactStart { conversation_id: EntityId },
    #[serde(rename_all = "camelCase")]
    CompactComplete {
        conversation_id: EntityId,
        #[serde(skip_serializing_if = "Option::is_none")]
        pre_tokens: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        trigger: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    UsageUpdate {
        conversation_id: EntityId,
        usage: RealtimeUsage,
    },
    #[serde(rename_all = "camelCase")]
    QueryError {
        conversation_id: EntityId,
        error: String,
    },
    #[serde(rename_all = "camelCase")]
    Aborted { conversation_id: EntityId },
    /// Workspace/conversation structure changed (create, delete, active
    /// selection, share creation).
    StoreChanged,
}

impl PylonEvent {
    /// The conversation this event is scoped to, when it has one. Used by
    /// the uplink to stamp `conversationId` for viewer filtering.
    pub fn conversation_id(&self) -> Option<EntityId> {
        match self {
            PylonEvent::SessionStart { conversation_id, .. }
            | PylonEvent::StatusChange { conversation_id, .. }
            | PylonEvent::TextDelta { conversation_id, .. }
            | PylonEvent::MessageAppended { conversation_id, .. }
            | PylonEvent::PermissionRequested { conversation_id, .. }
            | PylonEvent::QuestionRequested { conversation_id, .. }
            | PylonEvent::PermissionResolved { conversation_id, .. }
            | PylonEvent::CompactStart { conversation_id }
            | PylonEvent::CompactComplete { conversation_id, .. }
            | PylonEvent::UsageUpdate { conversation_id, .. }
            | PylonEvent::QueryError { conversation_id, .. }
            | PylonEvent::Aborted { conversation_id } => Some(*conversation_id),
            PylonEvent::StoreChanged => None,
        }
    }
}
