use serde::{Deserialize, Serialize};

// ─── Requests ─────────────────────────────────────────────────────────────

/// One request frame on the newline-delimited JSON protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    #[serde(rename_all = "camelCase")]
    Register {
        pylon_id: u32,
        mcp_host: String,
        mcp_port: u16,
        env: String,
        #[serde(default)]
        force: bool,
    },
    #[serde(rename_all = "camelCase")]
    Unregister { pylon_id: u32 },
    #[serde(rename_all = "camelCase")]
    Query {
        conversation_id: u32,
        options: QueryParams,
    },
    #[serde(rename_all = "camelCase")]
    Lookup { tool_use_id: String },
    Cleanup,
}

/// Options carried by a `query` request and handed to the adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryParams {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

// ─── Responses ────────────────────────────────────────────────────────────

/// Single-frame reply for request/response actions.
pub fn ok() -> serde_json::Value {
    serde_json::json!({ "success": true })
}

pub fn fail(error: impl AsRef<str>) -> serde_json::Value {
    serde_json::json!({ "success": false, "error": error.as_ref() })
}

/// Streaming frame: one backend message for a `query`.
pub fn event_frame(conversation_id: u32, message: &impl Serialize) -> serde_json::Value {
    serde_json::json!({ "type": "event", "conversationId": conversation_id, "message": message })
}

/// Streaming frame: a query error. The connection survives.
pub fn error_frame(error: impl AsRef<str>) -> serde_json::Value {
    serde_json::json!({ "type": "error", "error": error.as_ref() })
}
