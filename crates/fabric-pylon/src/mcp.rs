use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use claude_adapter::McpServerConfig;

use crate::config::PylonConfig;
use crate::fs::FileSystem;

/// Per-workspace MCP configuration file, relative to the workspace path.
pub const MCP_CONFIG_FILE: &str = ".fabric/mcp.json";

#[derive(Debug, Deserialize)]
struct McpConfigFile {
    #[serde(default, rename = "mcpServers")]
    mcp_servers: BTreeMap<String, McpServerConfig>,
}

/// Load the workspace's tool-server map and auto-inject the beacon bridge.
/// The adapter consumes the result opaquely; tool handlers running in those
/// servers resolve conversations through the beacon.
pub fn load_mcp_servers(
    fs: &dyn FileSystem,
    workspace_path: &Path,
    config: &PylonConfig,
) -> BTreeMap<String, McpServerConfig> {
    let mut servers = BTreeMap::new();

    let path = workspace_path.join(MCP_CONFIG_FILE);
    if fs.exists(&path) {
        match fs
            .read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|json| serde_json::from_str::<McpConfigFile>(&json).map_err(Into::into))
        {
            Ok(file) => servers.extend(file.mcp_servers),
            Err(e) => {
                tracing::warn!(path = %path.display(), "ignoring invalid MCP config: {e}");
            }
        }
    }

    // The beacon bridge is always present so tool handlers can resolve
    // tool-use ids back to conversations.
    servers.entry("fabric".to_string()).or_insert_with(|| {
        let mut env = BTreeMap::new();
        env.insert("FABRIC_BEACON_ADDR".to_string(), config.beacon_addr.clone());
        env.insert("FABRIC_ENV".to_string(), config.env.as_str().to_string());
        env.insert(
            "FABRIC_MCP_PORT".to_string(),
            config.env.mcp_port().to_string(),
        );
        McpServerConfig {
            command: "fabric-mcp".to_string(),
            args: Vec::new(),
            env,
        }
    });

    servers
}
