use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Message log ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One durable entry in a conversation's message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: String,
    pub role: Role,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(flatten)]
    pub kind: LogKind,
}

/// The tagged variant of a log entry. Assistant text is appended only when
/// finalised; partial text lives in the conversation's `text_buffer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogKind {
    Text {
        text: String,
    },
    ToolStart {
        #[serde(rename = "toolUseId")]
        tool_use_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        input: serde_json::Value,
    },
    ToolComplete {
        #[serde(rename = "toolUseId")]
        tool_use_id: String,
        #[serde(rename = "isError")]
        is_error: bool,
    },
    Error {
        message: String,
    },
    Result {
        #[serde(rename = "durationMs")]
        duration_ms: u64,
        #[serde(rename = "inputTokens")]
        input_tokens: u64,
        #[serde(rename = "outputTokens")]
        output_tokens: u64,
        #[serde(rename = "cacheReadTokens")]
        cache_read_tokens: u64,
    },
    Aborted,
    FileAttachment {
        filename: String,
        path: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
        size: u64,
    },
    UserResponse {
        #[serde(rename = "toolUseId")]
        tool_use_id: String,
        answer: serde_json::Value,
    },
}

impl LogEntry {
    pub fn new(role: Role, kind: LogKind) -> Self {
        LogEntry {
            id: Uuid::new_v4().to_string(),
            role,
            timestamp: Utc::now().timestamp_millis(),
            kind,
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        LogEntry::new(Role::User, LogKind::Text { text: text.into() })
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        LogEntry::new(Role::Assistant, LogKind::Text { text: text.into() })
    }

    pub fn tool_use_id(&self) -> Option<&str> {
        match &self.kind {
            LogKind::ToolStart { tool_use_id, .. }
            | LogKind::ToolComplete { tool_use_id, .. }
            | LogKind::UserResponse { tool_use_id, .. } => Some(tool_use_id),
            _ => None,
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_entry_serialises_camel_case_fields() {
        let entry = LogEntry::new(
            Role::System,
            LogKind::Result {
                duration_ms: 1200,
                input_tokens: 100,
                output_tokens: 40,
                cache_read_tokens: 7,
            },
        );
        let v = serde_json::to_value(&entry).unwrap();
        assert_eq!(v["kind"], "result");
        assert_eq!(v["durationMs"], 1200);
        assert_eq!(v["cacheReadTokens"], 7);
    }

    #[test]
    fn tool_entries_expose_tool_use_id() {
        let start = LogEntry::new(
            Role::Assistant,
            LogKind::ToolStart {
                tool_use_id: "toolu_01".into(),
                tool_name: "Edit".into(),
                input: serde_json::json!({}),
            },
        );
        assert_eq!(start.tool_use_id(), Some("toolu_01"));
        assert_eq!(LogEntry::user_text("hi").tool_use_id(), None);
    }

    #[test]
    fn round_trip_every_variant() {
        let entries = vec![
            LogEntry::user_text("hello"),
            LogEntry::new(
                Role::Assistant,
                LogKind::ToolStart {
                    tool_use_id: "t1".into(),
                    tool_name: "Bash".into(),
                    input: serde_json::json!({"command": "ls"}),
                },
            ),
            LogEntry::new(
                Role::User,
                LogKind::ToolComplete {
                    tool_use_id: "t1".into(),
                    is_error: false,
                },
            ),
            LogEntry::new(Role::System, LogKind::Aborted),
            LogEntry::new(
                Role::User,
                LogKind::FileAttachment {
                    filename: "a.png".into(),
                    path: "/tmp/a.png".into(),
                    mime_type: "image/png".into(),
                    size: 12,
                },
            ),
        ];
        let json = serde_json::to_string(&entries).unwrap();
        let back: Vec<LogEntry> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.len(), entries.len());
    }
}
