use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use claude_adapter::CliAdapter;
use fabric_core::entity::Env;
use fabric_pylon::{BlobManager, FsPersistence, Pylon, PylonConfig, StdFileSystem};
use fabric_relay::{DeviceTable, FileShares, RelayConfig, RelayState, StaticShares};

#[derive(Parser)]
#[command(
    name = "fabric",
    about = "Three-tier message fabric connecting clients, workstations, and the AI backend",
    version,
    propagate_version = true
)]
struct Cli {
    /// Log filter (tracing EnvFilter syntax)
    #[arg(long, global = true, default_value = "info", env = "FABRIC_LOG")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the central WebSocket relay
    Relay {
        #[arg(long, default_value_t = fabric_core::DEFAULT_RELAY_PORT, env = "FABRIC_RELAY_PORT")]
        port: u16,
        /// Device table JSON (defaults to a built-in single-pylon table)
        #[arg(long, env = "FABRIC_DEVICES")]
        devices: Option<PathBuf>,
        /// Share store JSON consulted for viewer auth
        #[arg(long, env = "FABRIC_SHARES")]
        shares: Option<PathBuf>,
        /// Deployment environment: release | stage | dev | test
        #[arg(long, default_value = "dev", env = "FABRIC_ENV")]
        env: String,
    },

    /// Run a workstation agent connected to the relay
    Pylon {
        #[arg(
            long,
            default_value = "ws://127.0.0.1:8080/ws",
            env = "FABRIC_RELAY_URL"
        )]
        relay_url: String,
        #[arg(long, default_value_t = 1, env = "FABRIC_PYLON_ID")]
        pylon_id: u32,
        #[arg(long, default_value = "dev", env = "FABRIC_ENV")]
        env: String,
        /// State directory (default: platform data dir + fabric/)
        #[arg(long, env = "FABRIC_DATA_DIR")]
        data_dir: Option<PathBuf>,
        #[arg(long, default_value = "127.0.0.1:9875", env = "FABRIC_BEACON_ADDR")]
        beacon: String,
        /// Custom path to the claude binary
        #[arg(long, env = "FABRIC_CLAUDE_PATH")]
        claude_path: Option<String>,
    },

    /// Run the tool-lookup beacon
    Beacon {
        #[arg(long, default_value_t = fabric_core::DEFAULT_BEACON_PORT, env = "FABRIC_BEACON_PORT")]
        port: u16,
        /// Custom path to the claude binary for delegated queries
        #[arg(long, env = "FABRIC_CLAUDE_PATH")]
        claude_path: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&cli.log)
                .context("invalid --log filter")?,
        )
        .init();

    match cli.command {
        Commands::Relay {
            port,
            devices,
            shares,
            env,
        } => run_relay(port, devices, shares, env.parse()?).await,
        Commands::Pylon {
            relay_url,
            pylon_id,
            env,
            data_dir,
            beacon,
            claude_path,
        } => run_pylon(relay_url, pylon_id, env.parse()?, data_dir, beacon, claude_path).await,
        Commands::Beacon { port, claude_path } => run_beacon(port, claude_path).await,
    }
}

async fn run_relay(
    port: u16,
    devices: Option<PathBuf>,
    shares: Option<PathBuf>,
    env: Env,
) -> anyhow::Result<()> {
    let table = match devices {
        Some(path) => DeviceTable::load(&path)
            .with_context(|| format!("loading device table {}", path.display()))?,
        None => DeviceTable::builtin(),
    };
    let validator: Arc<dyn fabric_relay::ShareValidator> = match shares {
        Some(path) => Arc::new(FileShares::new(path)),
        None => Arc::new(StaticShares(Default::default())),
    };
    let state = RelayState::new(RelayConfig {
        env,
        devices: table,
        shares: validator,
        auth_grace: std::time::Duration::from_secs(1),
    });
    fabric_relay::serve(port, state).await
}

async fn run_pylon(
    relay_url: String,
    pylon_id: u32,
    env: Env,
    data_dir: Option<PathBuf>,
    beacon: String,
    claude_path: Option<String>,
) -> anyhow::Result<()> {
    let data_dir = data_dir.unwrap_or_else(|| {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fabric")
    });

    let mut config = PylonConfig::new(pylon_id, env, &data_dir);
    config.relay_url = relay_url;
    config.beacon_addr = beacon;

    let adapter = Arc::new(CliAdapter {
        path_to_executable: claude_path,
    });
    let blob_dir = config.blob_dir();
    let pylon = Pylon::new(
        config,
        adapter,
        Arc::new(FsPersistence::new(&data_dir)),
        Arc::new(StdFileSystem),
    )?;

    if let Err(e) = fabric_pylon::register_with_beacon(&pylon).await {
        tracing::warn!("beacon registration failed (continuing): {e}");
    }

    let blobs = Arc::new(BlobManager::new(blob_dir));
    fabric_pylon::run_uplink(pylon, blobs).await
}

async fn run_beacon(port: u16, claude_path: Option<String>) -> anyhow::Result<()> {
    let adapter = Arc::new(CliAdapter {
        path_to_executable: claude_path,
    });
    let beacon = Arc::new(fabric_beacon::Beacon::new(adapter));
    fabric_beacon::serve(port, beacon).await
}
