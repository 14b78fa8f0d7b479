use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;

use fabric_core::error::{FabricError, Result};

/// One registered pylon instance.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PylonRegistration {
    pub pylon_id: u32,
    pub mcp_host: String,
    pub mcp_port: u16,
    pub env: String,
    /// Milliseconds since the Unix epoch.
    pub registered_at: i64,
}

impl PylonRegistration {
    pub fn address(&self) -> String {
        format!("{}:{}", self.mcp_host, self.mcp_port)
    }
}

/// In-memory pylon registry. Single-node; all state is lost on restart.
#[derive(Debug, Default)]
pub struct Registry {
    pylons: HashMap<u32, PylonRegistration>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pylon. A duplicate id fails unless `force` replaces it.
    pub fn register(
        &mut self,
        pylon_id: u32,
        mcp_host: String,
        mcp_port: u16,
        env: String,
        force: bool,
    ) -> Result<()> {
        if self.pylons.contains_key(&pylon_id) && !force {
            return Err(FabricError::Conflict(format!(
                "pylon {pylon_id} already registered"
            )));
        }
        self.pylons.insert(
            pylon_id,
            PylonRegistration {
                pylon_id,
                mcp_host,
                mcp_port,
                env,
                registered_at: Utc::now().timestamp_millis(),
            },
        );
        Ok(())
    }

    pub fn unregister(&mut self, pylon_id: u32) -> Result<()> {
        self.pylons
            .remove(&pylon_id)
            .map(|_| ())
            .ok_or_else(|| FabricError::NotFound(format!("pylon {pylon_id} not found")))
    }

    pub fn get(&self, pylon_id: u32) -> Option<&PylonRegistration> {
        self.pylons.get(&pylon_id)
    }

    pub fn len(&self) -> usize {
        self.pylons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pylons.is_empty()
    }
}
