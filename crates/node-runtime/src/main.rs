//! # Quantum-Chain Node Runtime
//!
//! ## Startup Sequence
//!
//! 1. Initialize logging (`QC_LOG_LEVEL` / `RUST_LOG`, `QC_JSON_LOGS`)
//! 2. Load configuration (`QC_CONFIG` file, then `QC_*` overrides)
//! 3. Start the P2P network and bootstrap from seeds
//! 4. Run until Ctrl+C, then deregister and shut down

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use node_runtime::{NodeConfig, NodeRuntime};

const STATUS_INTERVAL: Duration = Duration::from_secs(60);

fn init_tracing() -> Result<()> {
    let filter = std::env::var("QC_LOG_LEVEL")
        .ok()
        .map(EnvFilter::new)
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    let json = std::env::var("QC_JSON_LOGS").is_ok_and(|v| v == "1" || v == "true");
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

fn load_config() -> Result<NodeConfig> {
    let mut config = match std::env::var_os("QC_CONFIG").map(PathBuf::from) {
        Some(path) => {
            info!(path = %path.display(), "loading configuration");
            NodeConfig::load(&path).context("loading configuration file")?
        }
        None => NodeConfig::default(),
    };
    config
        .apply_env(|key| std::env::var(key).ok())
        .context("applying environment overrides")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let config = load_config()?;

    info!("===========================================");
    info!("  Quantum-Chain Node Runtime v{}", env!("CARGO_PKG_VERSION"));
    info!("===========================================");

    // Startup and bootstrap block on the reactor, so they run off the
    // async workers.
    let handle = tokio::runtime::Handle::current();
    let node = tokio::task::spawn_blocking(move || -> Result<NodeRuntime> {
        let node = NodeRuntime::start(config, handle)?;
        let admitted = node.bootstrap();
        info!(admitted, "bootstrap complete");
        Ok(node)
    })
    .await
    .context("startup task panicked")??;
    let node = Arc::new(node);

    info!(
        listen = %node.network().local_addr(),
        "Node is running. Press Ctrl+C to stop."
    );

    let mut status = tokio::time::interval(STATUS_INTERVAL);
    status.tick().await;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "failed to listen for Ctrl+C, shutting down");
                }
                break;
            }
            _ = status.tick() => node.log_status(),
        }
    }

    let stopping = Arc::clone(&node);
    tokio::task::spawn_blocking(move || stopping.shutdown())
        .await
        .context("shutdown task panicked")?;
    info!("Shutdown complete");
    Ok(())
}
