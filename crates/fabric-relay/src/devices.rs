use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use fabric_core::entity::{DeviceId, EntityId};
use fabric_core::error::Result;
use fabric_core::share::ShareStore;

// ─── DeviceTable ──────────────────────────────────────────────────────────

/// One configured device (today: pylons only — apps and viewers are
/// server-assigned and carry no static row).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// IPs allowed to authenticate as this device; `"*"` matches any.
    #[serde(default)]
    pub allowed_ips: Vec<String>,
}

impl DeviceEntry {
    pub fn ip_allowed(&self, ip: &str) -> bool {
        self.allowed_ips
            .iter()
            .any(|allowed| allowed == "*" || allowed == ip)
    }
}

/// Static registry of configured devices, keyed by raw device id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceTable {
    #[serde(default)]
    devices: BTreeMap<u8, DeviceEntry>,
}

impl DeviceTable {
    pub fn get(&self, id: DeviceId) -> Option<&DeviceEntry> {
        self.devices.get(&id.raw())
    }

    pub fn insert(&mut self, id: DeviceId, entry: DeviceEntry) {
        self.devices.insert(id.raw(), entry);
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Development default: one pylon, id 1, any IP.
    pub fn builtin() -> Self {
        let mut table = DeviceTable::default();
        table.insert(
            DeviceId::from_raw(1),
            DeviceEntry {
                name: "pylon-1".into(),
                icon: Some("🗼".into()),
                role: Some("workstation".into()),
                allowed_ips: vec!["*".into()],
            },
        );
        table
    }
}

// ─── ShareValidator ───────────────────────────────────────────────────────

/// Capability consulted during viewer auth: resolves a share id to the
/// conversation it exposes.
pub trait ShareValidator: Send + Sync {
    fn validate(&self, share_id: &str) -> Option<EntityId>;
}

/// Validator over a fixed in-memory share store (tests, embedded use).
pub struct StaticShares(pub ShareStore);

impl ShareValidator for StaticShares {
    fn validate(&self, share_id: &str) -> Option<EntityId> {
        self.0.lookup(share_id)
    }
}

/// Validator backed by the workstation's persisted share store document.
/// Read on every auth; shares change rarely and viewer auth is infrequent.
pub struct FileShares {
    path: std::path::PathBuf,
}

impl FileShares {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ShareValidator for FileShares {
    fn validate(&self, share_id: &str) -> Option<EntityId> {
        let json = std::fs::read_to_string(&self.path).ok()?;
        let store: ShareStore = serde_json::from_str(&json).ok()?;
        store.lookup(share_id)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
