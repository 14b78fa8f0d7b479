use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::entity::{DeviceId, DeviceType};

// ─── Message type names ───────────────────────────────────────────────────

/// Wire message type names. Control types are interpreted by the relay;
/// everything else is forwarded.
pub mod msg {
    pub const AUTH: &str = "auth";
    pub const AUTH_RESULT: &str = "auth_result";
    pub const CONNECTED: &str = "connected";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const ERROR: &str = "error";
    pub const GET_DEVICES: &str = "get_devices";
    pub const DEVICE_LIST: &str = "device_list";
    pub const DEVICE_STATUS: &str = "device_status";
    pub const CLIENT_DISCONNECT: &str = "client_disconnect";

    pub const CLAUDE_SEND: &str = "claude_send";
    pub const CLAUDE_PERMISSION: &str = "claude_permission";
    pub const CLAUDE_ANSWER: &str = "claude_answer";
    pub const CLAUDE_CONTROL: &str = "claude_control";
    pub const SET_PERMISSION_MODE: &str = "set_permission_mode";

    pub const BLOB_START: &str = "blob_start";
    pub const BLOB_CHUNK: &str = "blob_chunk";
    pub const BLOB_END: &str = "blob_end";
    pub const BLOB_REQUEST: &str = "blob_request";

    /// Relay control types, in the order the dispatcher checks them.
    pub const CONTROL: &[&str] = &[AUTH, PING, PONG, GET_DEVICES];
}

// ─── Envelope ─────────────────────────────────────────────────────────────

/// Identity of an authenticated sender, attached by the relay. Senders
/// cannot forge this; the relay rewrites it on every routed frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub device_id: DeviceId,
    pub device_type: DeviceType,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// Typed fan-out selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Broadcast {
    All,
    Pylons,
    Apps,
    Viewers,
}

/// One JSON object per WebSocket frame: `{type, from?, to?, broadcast?,
/// payload?, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<DeviceInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Vec<DeviceId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast: Option<Broadcast>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Envelope {
            kind: kind.into(),
            from: None,
            to: None,
            broadcast: None,
            payload: Some(payload),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// A bare envelope with no payload (e.g. `ping`).
    pub fn bare(kind: impl Into<String>) -> Self {
        Envelope {
            kind: kind.into(),
            from: None,
            to: None,
            broadcast: None,
            payload: None,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn to(mut self, targets: Vec<DeviceId>) -> Self {
        self.to = Some(targets);
        self
    }

    pub fn broadcast(mut self, b: Broadcast) -> Self {
        self.broadcast = Some(b);
        self
    }

    pub fn with_from(mut self, from: DeviceInfo) -> Self {
        self.from = Some(from);
        self
    }

    /// Whether the relay interprets this frame itself.
    pub fn is_control(&self) -> bool {
        msg::CONTROL.contains(&self.kind.as_str())
    }

    /// The `conversationId` field of the payload, if present. Used for
    /// viewer filtering.
    pub fn payload_conversation_id(&self) -> Option<u32> {
        self.payload
            .as_ref()?
            .get("conversationId")?
            .as_u64()
            .map(|v| v as u32)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
