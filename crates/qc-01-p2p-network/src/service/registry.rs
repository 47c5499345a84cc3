//! # Peer Registry
//!
//! Address-keyed map of known peers plus the local node. Deleting a peer
//! that holds a connection releases that connection exactly once.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::domain::broadcast::disconnected_ratio;
use crate::domain::errors::RegistryError;
use crate::domain::node::{ConnectionId, Node, NodeAddress, NodeRecord, PeerFilter};
use crate::metrics::NetworkMetrics;
use crate::ports::{AdmissionVerifier, ConnectionReleaser};

pub struct PeerRegistry {
    self_node: RwLock<Node>,
    peers: RwLock<HashMap<NodeAddress, Node>>,
    max_pulse: u32,
    verifier: Arc<dyn AdmissionVerifier>,
    releaser: Arc<dyn ConnectionReleaser>,
    metrics: NetworkMetrics,
}

impl PeerRegistry {
    pub fn new(
        self_record: NodeRecord,
        max_pulse: u32,
        verifier: Arc<dyn AdmissionVerifier>,
        releaser: Arc<dyn ConnectionReleaser>,
        metrics: NetworkMetrics,
    ) -> Self {
        let mut self_node = Node::new(self_record);
        self_node.pulse = max_pulse;
        Self {
            self_node: RwLock::new(self_node),
            peers: RwLock::new(HashMap::new()),
            max_pulse,
            verifier,
            releaser,
            metrics,
        }
    }

    // =========================================================================
    // MEMBERSHIP
    // =========================================================================

    /// Admit a peer. Its pulse starts at the maximum.
    pub fn add(&self, mut node: Node) -> Result<(), RegistryError> {
        let address = node.address();
        if address == self.self_node.read().address() {
            return Err(RegistryError::SelfNode);
        }
        if !self.verifier.verify(&node) {
            return Err(RegistryError::AdmissionDenied(address));
        }

        node.pulse = self.max_pulse;
        let count = {
            let mut peers = self.peers.write();
            if peers.contains_key(&address) {
                return Err(RegistryError::AlreadyRegistered(address));
            }
            // Checked under the peer lock: release_connection releases
            // unowned connections while holding it.
            if let Some(conn) = node.connection.filter(|c| !self.releaser.is_open(*c)) {
                return Err(RegistryError::ConnectionClosed(conn));
            }
            peers.insert(address, node);
            peers.len()
        };

        self.metrics.set_peers(count);
        info!(peer = %address, peers = count, "peer added");
        Ok(())
    }

    /// Replace an existing peer's entry, keeping its pulse.
    pub fn update(&self, node: Node) -> Result<(), RegistryError> {
        let mut peers = self.peers.write();
        let entry = peers
            .get_mut(&node.address())
            .ok_or(RegistryError::NotFound(node.address()))?;
        let pulse = entry.pulse;
        *entry = node;
        entry.pulse = pulse;
        Ok(())
    }

    /// Remove a peer and release its connection.
    pub fn delete(&self, address: &NodeAddress) -> Option<Node> {
        let (removed, count) = {
            let mut peers = self.peers.write();
            let removed = peers.remove(address)?;
            (removed, peers.len())
        };

        if let Some(conn) = removed.connection {
            self.releaser.release(conn);
        }
        self.metrics.set_peers(count);
        info!(peer = %address, peers = count, "peer removed");
        Some(removed)
    }

    /// Release `conn`, deleting whichever peer holds it.
    ///
    /// Connections not yet owned by a peer (mid-handshake) are released
    /// directly, under the peer lock, so a concurrent [`add`](Self::add)
    /// either sees the connection closed or is deleted here.
    pub fn release_connection(&self, conn: ConnectionId) -> Option<Node> {
        let owner = {
            let peers = self.peers.write();
            match peers.values().find(|n| n.connection == Some(conn)) {
                Some(node) => node.address(),
                None => {
                    self.releaser.release(conn);
                    return None;
                }
            }
        };
        self.delete(&owner)
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    pub fn find(&self, address: &NodeAddress) -> Option<Node> {
        self.peers.read().get(address).cloned()
    }

    pub fn contains(&self, address: &NodeAddress) -> bool {
        self.peers.read().contains_key(address)
    }

    pub fn find_by_connection(&self, conn: ConnectionId) -> Option<Node> {
        self.peers
            .read()
            .values()
            .find(|n| n.connection == Some(conn))
            .cloned()
    }

    /// Peers matching `filter`, optionally only those with a positive pulse.
    pub fn snapshot(&self, filter: PeerFilter, must_be_alive: bool) -> Vec<Node> {
        self.peers
            .read()
            .values()
            .filter(|n| filter.matches(n) && (!must_be_alive || n.is_alive()))
            .cloned()
            .collect()
    }

    pub fn self_node(&self) -> Node {
        self.self_node.read().clone()
    }

    /// Replace the local record; address changes are ignored.
    pub fn update_self(&self, mut record: NodeRecord) {
        let mut node = self.self_node.write();
        record.address = node.address();
        record.identity_key = node.record.identity_key.clone();
        node.record = record;
    }

    /// Set the local chain height.
    pub fn set_self_height(&self, height: u64) {
        self.self_node.write().record.chain_height = height;
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    pub fn disconnected_ratio(&self) -> f64 {
        disconnected_ratio(&self.snapshot(PeerFilter::All, false))
    }

    // =========================================================================
    // LIVENESS
    // =========================================================================

    /// Decrement every peer's pulse and evict those that hit zero.
    ///
    /// Returns the evicted peers; their connections have been released.
    pub fn decay_pulses(&self) -> Vec<Node> {
        let expired: Vec<NodeAddress> = {
            let mut peers = self.peers.write();
            peers
                .values_mut()
                .filter_map(|n| {
                    n.pulse = n.pulse.saturating_sub(1);
                    (n.pulse == 0).then(|| n.address())
                })
                .collect()
        };

        let evicted: Vec<Node> = expired.iter().filter_map(|a| self.delete(a)).collect();
        if !evicted.is_empty() {
            debug!(evicted = evicted.len(), "pulse eviction");
        }
        evicted
    }

    /// Restore a peer's pulse after a successful ping, taking its newer
    /// metadata when given.
    pub fn refresh(&self, address: &NodeAddress, height: u64, record: Option<NodeRecord>) -> bool {
        let mut peers = self.peers.write();
        let Some(node) = peers.get_mut(address) else {
            return false;
        };
        node.pulse = self.max_pulse;
        if let Some(record) = record.filter(|r| r.address == *address) {
            node.record = record;
        }
        node.record.chain_height = node.record.chain_height.max(height);
        true
    }
}

impl ConnectionReleaser for PeerRegistry {
    fn release(&self, conn: ConnectionId) {
        self.release_connection(conn);
    }

    fn is_open(&self, conn: ConnectionId) -> bool {
        self.releaser.is_open(conn)
    }
}

impl std::fmt::Debug for PeerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerRegistry")
            .field("self", &self.self_node.read().address())
            .field("peers", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
