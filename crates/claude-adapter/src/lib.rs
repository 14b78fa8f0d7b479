//! `claude-adapter` — native driver for the Claude CLI subprocess.
//!
//! Implements the `--output-format stream-json` protocol as a first-class
//! Rust library so the workstation runtime can drive the AI backend without
//! a Node.js runtime.
//!
//! # Architecture
//!
//! ```text
//! QueryOptions
//!     │
//!     ▼
//! ClaudeProcess   ← spawns `claude --print --output-format stream-json …`
//!     │              reads JSONL from stdout, answers control_request
//!     │              frames (can_use_tool) on stdin
//!     ▼
//! QueryStream     ← implements futures::Stream<Item = Result<Message>>
//!     │              background task + mpsc channel + cancellation token
//!     ▼
//! Message enum    ← typed stream-json union, unknown-tolerant
//! ```
//!
//! The [`ClaudeAdapter`] trait is the seam consumers depend on; the
//! workstation and the beacon take `Arc<dyn ClaudeAdapter>` and tests swap
//! in channel-backed mock streams via [`QueryStream::from_channel`].

pub mod error;
pub mod options;
pub mod stream;
pub mod types;

pub(crate) mod process;

pub use error::AdapterError;
pub use options::{
    CanUseToolFn, McpServerConfig, PermissionResult, QueryOptions, SettingSource, ToolUseRequest,
};
pub use stream::QueryStream;
pub use types::{
    AssistantMessage, CompactMetadata, ContentBlock, Delta, Message, ResultMessage, StreamEvent,
    StreamEventMessage, SystemMessage, SystemPayload, TokenUsage, UserMessage,
};

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, AdapterError>;

/// Capability boundary to the AI backend: one method, producing a lazy
/// message sequence. Everything the workstation knows about the backend
/// flows through this trait.
pub trait ClaudeAdapter: Send + Sync {
    fn query(&self, prompt: String, opts: QueryOptions) -> QueryStream;
}

/// Production adapter: drives the `claude` CLI as a subprocess.
#[derive(Debug, Clone, Default)]
pub struct CliAdapter {
    /// Custom path to the `claude` binary (default: `"claude"` on PATH).
    pub path_to_executable: Option<String>,
}

impl ClaudeAdapter for CliAdapter {
    fn query(&self, prompt: String, mut opts: QueryOptions) -> QueryStream {
        if opts.path_to_executable.is_none() {
            opts.path_to_executable = self.path_to_executable.clone();
        }
        QueryStream::new(prompt, opts)
    }
}
