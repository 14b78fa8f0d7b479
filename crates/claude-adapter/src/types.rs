use serde::{Deserialize, Serialize};

// ─── Outer Message enum ───────────────────────────────────────────────────

/// Every message emitted by `claude --print --output-format stream-json`.
/// Discriminated by the JSON `"type"` field.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    System(SystemMessage),
    Assistant(AssistantMessage),
    User(UserMessage),
    Result(ResultMessage),
    /// Partial assistant chunks (`--include-partial-messages`).
    StreamEvent(StreamEventMessage),
    /// Interactive request from the CLI (e.g. `can_use_tool`). Answered by
    /// the process driver; never surfaced to consumers.
    ControlRequest(ControlRequestMessage),
    /// Any future/unknown message type — safe to skip.
    #[serde(other)]
    Unknown,
}

impl Message {
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Message::System(m) => Some(&m.session_id),
            Message::Assistant(m) => Some(&m.session_id),
            Message::User(m) => Some(&m.session_id),
            Message::Result(m) => Some(&m.session_id),
            Message::StreamEvent(m) => Some(&m.session_id),
            Message::ControlRequest(_) | Message::Unknown => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Message::Result(_))
    }
}

// ─── System messages ──────────────────────────────────────────────────────

/// `type = "system"` — further distinguished by `subtype`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemMessage {
    pub session_id: String,
    #[serde(flatten)]
    pub payload: SystemPayload,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum SystemPayload {
    /// First message — model, tools, cwd, permission mode.
    Init(SystemInit),
    /// Status update during the session (e.g. `"compacting"`).
    Status(SystemStatus),
    /// Context-compaction boundary. Metadata fields may be absent.
    CompactBoundary(CompactBoundaryPayload),
    /// Any future/unknown system subtype — safe to ignore.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemInit {
    pub model: String,
    #[serde(default)]
    pub tools: Vec<String>,
    /// CLI sends camelCase (`permissionMode`).
    #[serde(default, alias = "permissionMode")]
    pub permission_mode: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemStatus {
    pub status: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompactBoundaryPayload {
    #[serde(default)]
    pub compact_metadata: Option<CompactMetadata>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompactMetadata {
    #[serde(default)]
    pub trigger: Option<String>,
    #[serde(default)]
    pub pre_tokens: Option<u64>,
}

// ─── Assistant / user messages ────────────────────────────────────────────

/// `type = "assistant"` — a finalised model message with content blocks.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssistantMessage {
    pub message: AssistantContent,
    #[serde(default)]
    pub parent_tool_use_id: Option<String>,
    pub session_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssistantContent {
    #[serde(default)]
    pub id: Option<String>,
    pub role: String,
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

/// Content blocks within assistant messages and stream events.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        /// Tool inputs are schema-polymorphic, so Value is correct here.
        input: serde_json::Value,
    },
    Thinking {
        thinking: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: Option<u64>,
    #[serde(default)]
    pub cache_read_input_tokens: Option<u64>,
}

/// `type = "user"` — typically tool results fed back to the model.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserMessage {
    pub message: UserContent,
    #[serde(default)]
    pub parent_tool_use_id: Option<String>,
    pub session_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserContent {
    pub role: String,
    #[serde(default)]
    pub content: UserBlocks,
}

/// User content arrives either as a bare string or as typed blocks.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum UserBlocks {
    Text(String),
    Blocks(Vec<UserContentBlock>),
}

impl Default for UserBlocks {
    fn default() -> Self {
        UserBlocks::Blocks(Vec::new())
    }
}

impl UserBlocks {
    pub fn tool_results(&self) -> impl Iterator<Item = (&str, bool)> {
        let blocks = match self {
            UserBlocks::Text(_) => &[][..],
            UserBlocks::Blocks(b) => b.as_slice(),
        };
        blocks.iter().filter_map(|b| match b {
            UserContentBlock::ToolResult {
                tool_use_id,
                is_error,
                ..
            } => Some((tool_use_id.as_str(), is_error.unwrap_or(false))),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserContentBlock {
    Text {
        text: String,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Option<serde_json::Value>,
        #[serde(default)]
        is_error: Option<bool>,
    },
    #[serde(other)]
    Unknown,
}

// ─── Result messages ──────────────────────────────────────────────────────

/// `type = "result"` — the terminal message in every query stream.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResultMessage {
    pub subtype: String,
    pub session_id: String,
    #[serde(default)]
    pub result: Option<String>,
    pub duration_ms: u64,
    #[serde(default)]
    pub duration_api_ms: Option<u64>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub num_turns: u32,
    #[serde(default)]
    pub usage: TokenUsage,
}

// ─── Stream events ────────────────────────────────────────────────────────

/// `type = "stream_event"` — raw Anthropic streaming events, one per frame.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamEventMessage {
    pub event: StreamEvent,
    #[serde(default)]
    pub parent_tool_use_id: Option<String>,
    pub session_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    ContentBlockStart {
        index: u32,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: u32,
        delta: Delta,
    },
    ContentBlockStop {
        index: u32,
    },
    MessageStart,
    MessageDelta,
    MessageStop,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Delta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    ThinkingDelta {
        thinking: String,
    },
    #[serde(other)]
    Unknown,
}

// ─── Control protocol ─────────────────────────────────────────────────────

/// `type = "control_request"` — the CLI asking the host a question, most
/// importantly `can_use_tool` before running a tool.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlRequestMessage {
    pub request_id: String,
    pub request: ControlRequest,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ControlRequest {
    CanUseTool {
        tool_name: String,
        input: serde_json::Value,
        #[serde(default)]
        tool_use_id: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

/// The host's answer, written as one JSON line to the CLI's stdin.
pub fn control_response_line(request_id: &str, response: serde_json::Value) -> String {
    serde_json::json!({
        "type": "control_response",
        "response": {
            "subtype": "success",
            "request_id": request_id,
            "response": response,
        },
    })
    .to_string()
}

// ─── Tests ────────────────────────────────────────────────────────────────
