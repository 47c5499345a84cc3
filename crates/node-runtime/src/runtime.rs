//! Node lifecycle around the P2P network.

use std::sync::Arc;

use anyhow::{Context, Result};
use qc_01_p2p_network::{NetworkPorts, P2pNetwork, PeerFilter};
use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::config::NodeConfig;

/// A running node.
pub struct NodeRuntime {
    network: Arc<P2pNetwork>,
}

impl NodeRuntime {
    /// Start the network subsystem.
    ///
    /// Blocks while the listener binds; call from a blocking thread.
    pub fn start(config: NodeConfig, handle: Handle) -> Result<Self> {
        let (identity, generated) = config.identity().context("loading node identity")?;
        if generated {
            warn!("no node key configured, using an ephemeral identity");
        }
        info!(identity = %hex::encode(identity.public_key().as_bytes()), "node identity");

        let network = P2pNetwork::start(config.p2p, identity, handle, NetworkPorts::default())
            .context("starting p2p network")?;
        Ok(Self { network })
    }

    /// Register with the configured seeds. Blocking.
    pub fn bootstrap(&self) -> usize {
        let seeds = &self.network.config().seeds;
        if seeds.is_empty() {
            info!("no seeds configured, waiting for inbound peers");
            return 0;
        }
        self.network.bootstrap()
    }

    pub fn network(&self) -> &Arc<P2pNetwork> {
        &self.network
    }

    /// One-line status for periodic logging.
    pub fn log_status(&self) {
        info!(
            peers = self.network.peer_count(),
            connected = self.network.snapshot(PeerFilter::Connected, false).len(),
            connections = self.network.connection_count(),
            "node status"
        );
    }

    /// Deregister and stop. Blocking.
    pub fn shutdown(&self) {
        self.network.shutdown();
    }
}
