//! # Ports
//!
//! Traits for the collaborators the network layer calls out to. Admission,
//! stake and chain height belong to other subsystems; connection release
//! is implemented by the network context itself.

use crate::config::P2pConfig;
use crate::domain::node::{ConnectionId, Node, NodeAddress};

/// Decides whether a verified peer may join the registry.
pub trait AdmissionVerifier: Send + Sync {
    fn verify(&self, node: &Node) -> bool;
}

/// Stake lookup used to pick mature-content broadcast targets.
pub trait StakeOracle: Send + Sync {
    fn has_qualifying_stake(&self, address: &NodeAddress) -> bool;
}

/// Current local chain height, reported in pings and registration.
pub trait ChainHeightSource: Send + Sync {
    fn height(&self) -> u64;
}

/// Tears down everything attached to a connection: socket, buffers, keys.
///
/// Must be idempotent.
pub trait ConnectionReleaser: Send + Sync {
    fn release(&self, conn: ConnectionId);

    /// Whether `conn` is still live, i.e. not yet released.
    fn is_open(&self, conn: ConnectionId) -> bool;
}

/// Source of network configuration.
pub trait ConfigProvider {
    fn p2p_config(&self) -> P2pConfig;
}
