use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::entity::{DeviceId, DeviceType, EntityId};
use crate::envelope::{DeviceInfo, Envelope};
use crate::error::{FabricError, Result};
use crate::permission::PermissionMode;

// ─── Parsing ──────────────────────────────────────────────────────────────

/// Structural type guard: deserialize an envelope payload into its typed
/// form, mapping any shape mismatch to a `Validation` error with no state
/// change.
pub fn parse_payload<T: DeserializeOwned>(envelope: &Envelope) -> Result<T> {
    let value = envelope
        .payload
        .clone()
        .ok_or_else(|| FabricError::Validation(format!("{} payload missing", envelope.kind)))?;
    serde_json::from_value(value)
        .map_err(|e| FabricError::Validation(format!("{} payload: {e}", envelope.kind)))
}

// ─── Relay control payloads ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<DeviceId>,
    pub device_type: DeviceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResultPayload {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<DeviceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatusEntry {
    pub device_id: DeviceId,
    pub device_type: DeviceType,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub connected_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStatusPayload {
    pub devices: Vec<DeviceStatusEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientDisconnectPayload {
    pub device_id: DeviceId,
    pub device_type: DeviceType,
}

// ─── Workstation payloads ─────────────────────────────────────────────────

/// Reference to an already-transferred blob attached to a prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRef {
    pub blob_id: String,
    pub filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaudeSendPayload {
    pub conversation_id: EntityId,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<AttachmentRef>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionDecisionKind {
    Allow,
    Deny,
    AllowAll,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaudePermissionPayload {
    pub conversation_id: EntityId,
    pub tool_use_id: String,
    pub decision: PermissionDecisionKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaudeAnswerPayload {
    pub conversation_id: EntityId,
    pub tool_use_id: String,
    pub answer: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Stop,
    NewSession,
    Clear,
    Compact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaudeControlPayload {
    pub conversation_id: EntityId,
    pub action: ControlAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPermissionModePayload {
    pub conversation_id: EntityId,
    pub mode: PermissionMode,
}

// ─── Blob payloads ────────────────────────────────────────────────────────

/// Minimum context carried by every transfer: what kind of attachment this
/// is and which conversation it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobContext {
    #[serde(rename = "type")]
    pub kind: String,
    pub conversation_id: EntityId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobStartPayload {
    pub blob_id: String,
    pub filename: String,
    pub mime_type: String,
    pub total_size: u64,
    pub chunk_size: u32,
    pub total_chunks: u32,
    /// Always `"base64"` at the wire layer.
    pub encoding: String,
    pub context: BlobContext,
    #[serde(default)]
    pub same_device: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobChunkPayload {
    pub blob_id: String,
    pub index: u32,
    /// Base64-encoded chunk bytes.
    pub data: String,
    pub size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobEndPayload {
    pub blob_id: String,
    /// `"sha256:HEX"` over the concatenation of chunks in index order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub total_received: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobRequestPayload {
    pub blob_id: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::msg;
    use serde_json::json;

    #[test]
    fn parse_valid_send_payload() {
        let env = Envelope::new(
            msg::CLAUDE_SEND,
            json!({"conversationId": 133123, "message": "hello"}),
        );
        let p: ClaudeSendPayload = parse_payload(&env).unwrap();
        assert_eq!(p.conversation_id.to_string(), "1:2:3");
        assert_eq!(p.message, "hello");
        assert!(p.attachments.is_none());
    }

    #[test]
    fn missing_required_field_is_validation_error() {
        let env = Envelope::new(msg::CLAUDE_SEND, json!({"conversationId": 133123}));
        let err = parse_payload::<ClaudeSendPayload>(&env).unwrap_err();
        assert!(matches!(err, FabricError::Validation(_)));
    }

    #[test]
    fn missing_payload_is_validation_error() {
        let env = Envelope::bare(msg::CLAUDE_SEND);
        let err = parse_payload::<ClaudeSendPayload>(&env).unwrap_err();
        assert!(matches!(err, FabricError::Validation(_)));
    }

    #[test]
    fn decision_enum_checks_domain() {
        let ok = json!({"conversationId": 133123, "toolUseId": "t", "decision": "allowAll"});
        let env = Envelope::new(msg::CLAUDE_PERMISSION, ok);
        let p: ClaudePermissionPayload = parse_payload(&env).unwrap();
        assert_eq!(p.decision, PermissionDecisionKind::AllowAll);

        let bad = json!({"conversationId": 133123, "toolUseId": "t", "decision": "maybe"});
        let env = Envelope::new(msg::CLAUDE_PERMISSION, bad);
        assert!(parse_payload::<ClaudePermissionPayload>(&env).is_err());
    }

    #[test]
    fn control_action_uses_snake_case() {
        let env = Envelope::new(
            msg::CLAUDE_CONTROL,
            json!({"conversationId": 133123, "action": "new_session"}),
        );
        let p: ClaudeControlPayload = parse_payload(&env).unwrap();
        assert_eq!(p.action, ControlAction::NewSession);
    }

    #[test]
    fn mode_domain_is_enforced() {
        let env = Envelope::new(
            msg::SET_PERMISSION_MODE,
            json!({"conversationId": 133123, "mode": "yolo"}),
        );
        assert!(parse_payload::<SetPermissionModePayload>(&env).is_err());
    }

    #[test]
    fn blob_start_round_trip() {
        let payload = BlobStartPayload {
            blob_id: "B1".into(),
            filename: "report.pdf".into(),
            mime_type: "application/pdf".into(),
            total_size: 20,
            chunk_size: 8,
            total_chunks: 3,
            encoding: "base64".into(),
            context: BlobContext {
                kind: "attachment".into(),
                conversation_id: EntityId::conversation(1, 2, 3).unwrap(),
            },
            same_device: false,
            local_path: None,
        };
        let v = serde_json::to_value(&payload).unwrap();
        assert_eq!(v["blobId"], "B1");
        assert_eq!(v["context"]["type"], "attachment");
        assert!(v.get("localPath").is_none());
        let back: BlobStartPayload = serde_json::from_value(v).unwrap();
        assert_eq!(back.total_chunks, 3);
    }

    #[test]
    fn auth_payload_tolerates_unknown_fields() {
        let env = Envelope::new(
            msg::AUTH,
            json!({"deviceType": "app", "name": "desk", "extra": true}),
        );
        let p: AuthPayload = parse_payload(&env).unwrap();
        assert_eq!(p.device_type, DeviceType::App);
        assert_eq!(p.name.as_deref(), Some("desk"));
    }
}
