use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{FabricError, Result};

// ─── EntityId ─────────────────────────────────────────────────────────────

/// Maximum pylon id (4 bits, but the deployment caps at 10 workstations).
pub const MAX_PYLON_ID: u32 = 10;
/// Maximum workspace id (7 bits).
pub const MAX_WORKSPACE_ID: u32 = 127;
/// Maximum conversation id (10 bits).
pub const MAX_CONVERSATION_ID: u32 = 1023;

const CONVERSATION_BITS: u32 = 10;
const WORKSPACE_BITS: u32 = 7;
const ENTITY_BITS: u32 = 21;

const WORKSPACE_SHIFT: u32 = CONVERSATION_BITS;
const PYLON_SHIFT: u32 = CONVERSATION_BITS + WORKSPACE_BITS;

/// A single 21-bit identifier addressing a pylon, a workspace within a
/// pylon, or a conversation within a workspace:
///
/// ```text
///   bits 20..17 (4) : pylon id        1..10
///   bits 16..10 (7) : workspace id    0..127  (0 = pylon-level)
///   bits  9..0 (10) : conversation id 0..1023 (0 = workspace-level)
/// ```
///
/// The level is inferred from which trailing fields are zero. This is the
/// only identifier that appears in the wire protocol for addressing
/// conversation-scoped work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u32);

/// The addressing level an [`EntityId`] resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Pylon,
    Workspace,
    Conversation,
}

impl EntityId {
    /// Pylon-level id. `pylon` must be in `1..=10`.
    pub fn pylon(pylon: u32) -> Result<Self> {
        validate("pylonId", pylon, 1, MAX_PYLON_ID)?;
        Ok(EntityId(pylon << PYLON_SHIFT))
    }

    /// Workspace-level id. `workspace` must be in `1..=127`.
    pub fn workspace(pylon: u32, workspace: u32) -> Result<Self> {
        validate("pylonId", pylon, 1, MAX_PYLON_ID)?;
        validate("workspaceId", workspace, 1, MAX_WORKSPACE_ID)?;
        Ok(EntityId((pylon << PYLON_SHIFT) | (workspace << WORKSPACE_SHIFT)))
    }

    /// Conversation-level id. All three fields must be non-zero and in range.
    pub fn conversation(pylon: u32, workspace: u32, conversation: u32) -> Result<Self> {
        validate("pylonId", pylon, 1, MAX_PYLON_ID)?;
        validate("workspaceId", workspace, 1, MAX_WORKSPACE_ID)?;
        validate("conversationId", conversation, 1, MAX_CONVERSATION_ID)?;
        Ok(EntityId(
            (pylon << PYLON_SHIFT) | (workspace << WORKSPACE_SHIFT) | conversation,
        ))
    }

    /// Reinterpret a raw wire integer. Decoding the fields is total; only
    /// values that do not fit in 21 bits are rejected.
    pub fn from_raw(raw: u32) -> Result<Self> {
        if raw >= 1 << ENTITY_BITS {
            return Err(FabricError::Validation(format!(
                "entity id {raw} exceeds 21 bits"
            )));
        }
        Ok(EntityId(raw))
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn pylon_id(self) -> u32 {
        self.0 >> PYLON_SHIFT
    }

    pub fn workspace_id(self) -> u32 {
        (self.0 >> WORKSPACE_SHIFT) & MAX_WORKSPACE_ID
    }

    pub fn conversation_id(self) -> u32 {
        self.0 & MAX_CONVERSATION_ID
    }

    pub fn level(self) -> Level {
        if self.conversation_id() != 0 {
            Level::Conversation
        } else if self.workspace_id() != 0 {
            Level::Workspace
        } else {
            Level::Pylon
        }
    }

    /// The workspace-level id containing this entity.
    pub fn parent_workspace(self) -> EntityId {
        EntityId(self.0 & !MAX_CONVERSATION_ID)
    }

    /// The pylon-level id containing this entity.
    pub fn parent_pylon(self) -> EntityId {
        EntityId(self.0 & (0xF << PYLON_SHIFT))
    }
}

fn validate(field: &str, value: u32, min: u32, max: u32) -> Result<()> {
    if value < min || value > max {
        return Err(FabricError::Validation(format!(
            "{field} {value} out of range {min}..={max}"
        )));
    }
    Ok(())
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.pylon_id(),
            self.workspace_id(),
            self.conversation_id()
        )
    }
}

impl FromStr for EntityId {
    type Err = FabricError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, ':');
        let mut next = |name: &str| -> Result<u32> {
            parts
                .next()
                .ok_or_else(|| FabricError::Validation(format!("missing {name} in '{s}'")))?
                .parse()
                .map_err(|_| FabricError::Validation(format!("invalid {name} in '{s}'")))
        };
        let p = next("pylonId")?;
        let w = next("workspaceId")?;
        let c = next("conversationId")?;
        match (w, c) {
            (0, 0) => EntityId::pylon(p),
            (_, 0) => EntityId::workspace(p, w),
            _ => EntityId::conversation(p, w, c),
        }
    }
}

// ─── DeviceId ─────────────────────────────────────────────────────────────

/// Deployment environment, 2 bits of the device id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Env {
    Release = 0,
    Stage = 1,
    Dev = 2,
    Test = 3,
}

impl Env {
    pub fn from_bits(bits: u8) -> Env {
        match bits & 0b11 {
            0 => Env::Release,
            1 => Env::Stage,
            2 => Env::Dev,
            _ => Env::Test,
        }
    }

    /// Well-known MCP TCP port for this environment.
    pub fn mcp_port(self) -> u16 {
        match self {
            Env::Release => 9876,
            Env::Stage => 9877,
            Env::Dev => 9878,
            Env::Test => 9879,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Env::Release => "release",
            Env::Stage => "stage",
            Env::Dev => "dev",
            Env::Test => "test",
        }
    }
}

impl FromStr for Env {
    type Err = FabricError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "release" => Ok(Env::Release),
            "stage" => Ok(Env::Stage),
            "dev" => Ok(Env::Dev),
            "test" => Ok(Env::Test),
            other => Err(FabricError::Validation(format!("unknown env '{other}'"))),
        }
    }
}

/// The kind of client connected to the relay, 2 bits of the device id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Pylon = 0,
    App = 1,
    Viewer = 2,
}

impl DeviceType {
    pub fn from_bits(bits: u8) -> Result<DeviceType> {
        match bits & 0b11 {
            0 => Ok(DeviceType::Pylon),
            1 => Ok(DeviceType::App),
            2 => Ok(DeviceType::Viewer),
            other => Err(FabricError::Validation(format!(
                "invalid device type bits {other}"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::Pylon => "pylon",
            DeviceType::App => "app",
            DeviceType::Viewer => "viewer",
        }
    }
}

/// Relay-layer device id: `env (2b) | deviceType (2b) | deviceIndex (4b)`.
///
/// Only apps and viewers get pool-allocated indices; pylon device ids come
/// from configuration and are not required to follow the packed scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(u8);

impl DeviceId {
    pub fn pack(env: Env, device_type: DeviceType, index: u8) -> Result<Self> {
        if index > 0xF {
            return Err(FabricError::Validation(format!(
                "deviceIndex {index} out of range 0..=15"
            )));
        }
        Ok(DeviceId(
            ((env as u8) << 6) | ((device_type as u8) << 4) | index,
        ))
    }

    pub fn from_raw(raw: u8) -> DeviceId {
        DeviceId(raw)
    }

    pub fn raw(self) -> u8 {
        self.0
    }

    pub fn env(self) -> Env {
        Env::from_bits(self.0 >> 6)
    }

    pub fn device_type(self) -> Result<DeviceType> {
        DeviceType::from_bits((self.0 >> 4) & 0b11)
    }

    pub fn index(self) -> u8 {
        self.0 & 0xF
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
