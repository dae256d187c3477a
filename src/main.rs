//! tracer-sync - headless scene parameter synchronization peer
//!
//! Loads a scene description, joins a session and keeps its parameters in
//! sync with the other peers until interrupted.

mod config;
mod host;
mod scene;

use anyhow::{Context, Result};
use clap::Parser;
use config::{PeerConfig, DEFAULT_CONFIG_PATH};
use host::{attach_change_logger, LoggingHost};
use scene::SceneFile;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracer_sync_net::{request, BlobKind, SceneBlobProvider, SceneBlobs, SyncSession};
use tracing::{info, warn};

/// Headless peer for live scene parameter synchronization
#[derive(Debug, Parser)]
#[command(name = "tracer-sync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// JSON scene description to register
    #[arg(short, long)]
    scene: Option<PathBuf>,

    /// Directory of scene blobs to serve
    #[arg(long)]
    blobs: Option<PathBuf>,

    /// Pull every blob from the server into this directory before joining
    #[arg(long)]
    fetch: Option<PathBuf>,

    /// Client id stamped into outgoing frames
    #[arg(long)]
    client_id: Option<u8>,

    /// Local address to bind
    #[arg(long)]
    bind_ip: Option<IpAddr>,

    /// Address of the server peer
    #[arg(long)]
    server_ip: Option<IpAddr>,

    /// Distribution (TCP) port
    #[arg(long)]
    dist_port: Option<u16>,

    /// Subscribe (UDP) port
    #[arg(long)]
    sync_port: Option<u16>,

    /// Server port updates are published to
    #[arg(long)]
    update_sender_port: Option<u16>,

    /// Ping/command port
    #[arg(long)]
    command_port: Option<u16>,

    /// Extra publish destination (repeatable); replaces the server default
    #[arg(long = "publish-target")]
    publish_targets: Vec<SocketAddr>,

    /// Act as time master and hub: relay updates, answer pings, broadcast Sync
    #[arg(long)]
    sync_master: bool,

    /// Write the effective configuration back to --config and exit
    #[arg(long)]
    save_config: bool,
}

impl Cli {
    /// Fold command-line overrides into the loaded configuration.
    fn apply(&self, cfg: &mut PeerConfig) {
        if let Some(scene) = &self.scene {
            cfg.scene = Some(scene.clone());
        }
        if let Some(blobs) = &self.blobs {
            cfg.blobs = Some(blobs.clone());
        }
        let sync = &mut cfg.sync;
        if let Some(value) = self.client_id {
            sync.client_id = value;
        }
        if let Some(value) = self.bind_ip {
            sync.bind_ip = value;
        }
        if let Some(value) = self.server_ip {
            sync.server_ip = value;
        }
        if let Some(value) = self.dist_port {
            sync.dist_port = value;
        }
        if let Some(value) = self.sync_port {
            sync.sync_port = value;
        }
        if let Some(value) = self.update_sender_port {
            sync.update_sender_port = value;
        }
        if let Some(value) = self.command_port {
            sync.command_port = value;
        }
        if !self.publish_targets.is_empty() {
            sync.publish_targets = self.publish_targets.clone();
        }
        if self.sync_master {
            sync.sync_master = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with INFO level by default (can be overridden via RUST_LOG env var)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting tracer-sync v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();
    let mut cfg = PeerConfig::load_from_path(&cli.config);
    cli.apply(&mut cfg);

    if cli.save_config {
        cfg.save_to_path(&cli.config)
            .with_context(|| format!("Failed to save {}", cli.config.display()))?;
        info!("Saved configuration to {}", cli.config.display());
        return Ok(());
    }

    if let Some(dir) = &cli.fetch {
        let addr = SocketAddr::new(cfg.sync.server_ip, cfg.sync.dist_port);
        fetch_blobs(addr, dir).await?;
    }

    let session = SyncSession::new(cfg.sync.clone(), Arc::new(LoggingHost));
    match &cfg.scene {
        Some(path) => {
            SceneFile::load(path)?.register(session.registry(), session.rpc())?;
        }
        None => warn!("No scene given; only clock sync and blob serving are active"),
    }
    attach_change_logger(session.registry());

    let blobs = match &cfg.blobs {
        Some(dir) => {
            let blobs = SceneBlobs::load_dir(dir)?;
            if blobs.is_empty() {
                warn!("No blobs found in {}", dir.display());
            }
            Some(Arc::new(blobs) as Arc<dyn SceneBlobProvider>)
        }
        None => None,
    };

    let running = session.start(blobs).await?;
    info!("Session running, press Ctrl+C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    running.shutdown();
    Ok(())
}

/// Pull every blob kind from `addr` and write the non-empty ones into `dir`.
async fn fetch_blobs(addr: SocketAddr, dir: &Path) -> Result<usize> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let mut written = 0;
    for kind in BlobKind::ALL {
        let blob = request(addr, kind.command()).await?;
        if blob.is_empty() {
            warn!("Server has no {} blob", kind);
            continue;
        }
        let path = dir.join(kind.command());
        std::fs::write(&path, &blob)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Fetched {} ({} bytes)", kind, blob.len());
        written += 1;
    }
    Ok(written)
}
