//! In-memory port implementations for embedding and deterministic tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::domain::node::{ConnectionId, Node, NodeAddress};
use crate::ports::{AdmissionVerifier, ChainHeightSource, ConnectionReleaser, StakeOracle};

/// Admits every peer.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllVerifier;

impl AdmissionVerifier for AllowAllVerifier {
    fn verify(&self, _node: &Node) -> bool {
        true
    }
}

/// Admits only listed addresses.
#[derive(Debug, Default)]
pub struct AllowListVerifier {
    allowed: RwLock<HashSet<NodeAddress>>,
}

impl AllowListVerifier {
    pub fn new(allowed: impl IntoIterator<Item = NodeAddress>) -> Self {
        Self {
            allowed: RwLock::new(allowed.into_iter().collect()),
        }
    }

    pub fn allow(&self, address: NodeAddress) {
        self.allowed.write().insert(address);
    }
}

impl AdmissionVerifier for AllowListVerifier {
    fn verify(&self, node: &Node) -> bool {
        self.allowed.read().contains(&node.address())
    }
}

/// Stake set fixed at construction.
#[derive(Debug, Default)]
pub struct StaticStakeOracle {
    staked: RwLock<HashSet<NodeAddress>>,
    everyone: bool,
}

impl StaticStakeOracle {
    pub fn new(staked: impl IntoIterator<Item = NodeAddress>) -> Self {
        Self {
            staked: RwLock::new(staked.into_iter().collect()),
            everyone: false,
        }
    }

    /// Every address has stake.
    pub fn everyone() -> Self {
        Self {
            staked: RwLock::default(),
            everyone: true,
        }
    }

    pub fn add(&self, address: NodeAddress) {
        self.staked.write().insert(address);
    }
}

impl StakeOracle for StaticStakeOracle {
    fn has_qualifying_stake(&self, address: &NodeAddress) -> bool {
        self.everyone || self.staked.read().contains(address)
    }
}

/// Height that only changes when told to.
#[derive(Debug, Default)]
pub struct FixedHeightSource {
    height: AtomicU64,
}

impl FixedHeightSource {
    pub fn new(height: u64) -> Self {
        Self {
            height: AtomicU64::new(height),
        }
    }

    pub fn set(&self, height: u64) {
        self.height.store(height, Ordering::Relaxed);
    }
}

impl ChainHeightSource for FixedHeightSource {
    fn height(&self) -> u64 {
        self.height.load(Ordering::Relaxed)
    }
}

/// Records every release call.
#[derive(Debug, Default)]
pub struct RecordingReleaser {
    released: Mutex<Vec<ConnectionId>>,
}

impl RecordingReleaser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call in order, duplicates included.
    pub fn released(&self) -> Vec<ConnectionId> {
        self.released.lock().clone()
    }

    pub fn count(&self, conn: ConnectionId) -> usize {
        self.released.lock().iter().filter(|c| **c == conn).count()
    }
}

impl ConnectionReleaser for RecordingReleaser {
    fn release(&self, conn: ConnectionId) {
        self.released.lock().push(conn);
    }

    fn is_open(&self, conn: ConnectionId) -> bool {
        !self.released.lock().contains(&conn)
    }
}
