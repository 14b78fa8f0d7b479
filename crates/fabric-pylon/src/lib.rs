//! `fabric-pylon` — the workstation runtime.
//!
//! Multiplexes many logical conversations onto a single upstream relay
//! connection, owns durable per-conversation state (message log, tool-use
//! map, pending permission/question prompts), and drives the AI backend
//! through the streaming adapter.
//!
//! # Shape
//!
//! ```text
//! relay ⇄ uplink ─┐
//!                 ├─ Pylon (engine) ── turn driver per query ── ClaudeAdapter
//! beacon ◂────────┤        │
//!                 │        ├─ WorkspaceStore (single writer, RwLock)
//! blobs  ◂────────┘        ├─ ToolContextMap
//!                          └─ Persistence (write-through)
//! ```
//!
//! Each conversation has a single logical execution line: at most one query
//! in flight, and its messages, tool callbacks, and user answers are
//! processed in arrival order. Conversations never block each other.

pub mod blob;
pub mod config;
pub mod engine;
pub mod events;
pub mod fs;
pub mod mcp;
pub mod persist;
pub mod uplink;

pub(crate) mod turn;

#[cfg(test)]
mod tests;

pub use blob::{BlobManager, CompletedBlob};
pub use config::PylonConfig;
pub use engine::Pylon;
pub use events::PylonEvent;
pub use fs::{FileSystem, StdFileSystem};
pub use persist::{FsPersistence, MemoryPersistence, Persistence};
pub use uplink::{register_with_beacon, run as run_uplink};
