use std::path::PathBuf;
use std::time::Duration;

use fabric_core::entity::Env;
use fabric_core::toolmap::DEFAULT_TOOL_CONTEXT_MAX_AGE;

/// Workstation configuration, assembled by the CLI.
#[derive(Debug, Clone)]
pub struct PylonConfig {
    /// This workstation's pylon id (1..=10), also its relay device id.
    pub pylon_id: u32,
    pub env: Env,
    /// Root directory for persisted state and received blobs.
    pub data_dir: PathBuf,
    /// Relay WebSocket URL, e.g. `ws://127.0.0.1:8080/ws`.
    pub relay_url: String,
    /// Beacon TCP address, e.g. `127.0.0.1:9875`.
    pub beacon_addr: String,
    /// Whether an `allowAll` answer raises the conversation's permission
    /// mode to acceptEdits for subsequent edits.
    pub allow_all_raises_mode: bool,
    /// Max age for tool-context entries before explicit cleanup drops them.
    pub tool_context_max_age: Duration,
}

impl PylonConfig {
    pub fn new(pylon_id: u32, env: Env, data_dir: impl Into<PathBuf>) -> Self {
        PylonConfig {
            pylon_id,
            env,
            data_dir: data_dir.into(),
            relay_url: format!("ws://127.0.0.1:{}/ws", fabric_core::DEFAULT_RELAY_PORT),
            beacon_addr: format!("127.0.0.1:{}", fabric_core::DEFAULT_BEACON_PORT),
            allow_all_raises_mode: true,
            tool_context_max_age: DEFAULT_TOOL_CONTEXT_MAX_AGE,
        }
    }

    pub fn blob_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }
}
