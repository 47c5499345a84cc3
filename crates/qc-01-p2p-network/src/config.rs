//! Network configuration.
//!
//! Every field has a default, so a TOML file only needs to name what it
//! overrides.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::frame::DEFAULT_MAX_FRAME_SIZE;
use crate::domain::node::ConnectionKind;
use crate::domain::envelope::PROTOCOL_VERSION;

/// Thread counts per pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolThreads {
    pub read: usize,
    pub work: usize,
    pub write: usize,
    pub block_save: usize,
    pub broadcast: usize,
    pub chain: usize,
    pub network: usize,
    pub transaction: usize,
    pub sync: usize,
    pub save: usize,
    pub generic: usize,
}

impl Default for PoolThreads {
    fn default() -> Self {
        Self {
            read: 2,
            work: 4,
            write: 2,
            block_save: 1,
            broadcast: 2,
            chain: 2,
            network: 2,
            transaction: 4,
            sync: 2,
            save: 1,
            generic: 2,
        }
    }
}

impl PoolThreads {
    /// One thread everywhere.
    pub fn minimal() -> Self {
        Self {
            read: 1,
            work: 1,
            write: 1,
            block_save: 1,
            broadcast: 1,
            chain: 1,
            network: 1,
            transaction: 1,
            sync: 1,
            save: 1,
            generic: 1,
        }
    }
}

/// Local node metadata advertised to peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeMetadata {
    pub name: String,
    pub logo: String,
    pub kind: ConnectionKind,
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self {
            name: "quantum-chain-node".to_string(),
            logo: String::new(),
            kind: ConnectionKind::FullNode,
        }
    }
}

/// P2P network configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct P2pConfig {
    /// Address to bind
    pub listen_addr: SocketAddr,
    /// Address advertised to peers; defaults to the bound address
    pub public_addr: Option<SocketAddr>,
    /// Bootstrap peers
    pub seeds: Vec<SocketAddr>,
    pub threads: PoolThreads,
    /// Bound on the work queue; a full queue back-pressures readers
    pub work_queue_capacity: usize,
    /// Upper bound on a frame's declared length
    pub max_frame_size: usize,
    pub protocol_version: u32,
    pub min_protocol_version: u32,
    pub handshake_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub sync_timeout_ms: u64,
    /// Zero disables the heartbeat
    pub heartbeat_interval_ms: u64,
    /// Missed heartbeats before eviction
    pub max_pulse: u32,
    pub max_peers: usize,
    pub min_sync_responses: usize,
    /// Content at or above this height is "mature" for broadcast
    pub broadcast_height_threshold: u64,
    /// Drop plaintext non-handshake envelopes
    pub require_encryption: bool,
    /// Close mobile connections once their write buffer drains
    pub close_transient_after_flush: bool,
    pub node: NodeMetadata,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 30303)),
            public_addr: None,
            seeds: Vec::new(),
            threads: PoolThreads::default(),
            work_queue_capacity: 4096,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            protocol_version: PROTOCOL_VERSION,
            min_protocol_version: PROTOCOL_VERSION,
            handshake_timeout_ms: 5_000,
            connect_timeout_ms: 3_000,
            sync_timeout_ms: 5_000,
            heartbeat_interval_ms: 10_000,
            max_pulse: 3,
            max_peers: 50,
            min_sync_responses: 3,
            broadcast_height_threshold: 1_000,
            require_encryption: true,
            close_transient_after_flush: true,
            node: NodeMetadata::default(),
        }
    }
}

impl P2pConfig {
    /// Loopback, ephemeral port, one thread per pool, short timeouts and no
    /// heartbeat.
    pub fn for_testing() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            threads: PoolThreads::minimal(),
            work_queue_capacity: 64,
            max_frame_size: 1024 * 1024,
            handshake_timeout_ms: 2_000,
            connect_timeout_ms: 2_000,
            sync_timeout_ms: 2_000,
            heartbeat_interval_ms: 0,
            min_sync_responses: 1,
            ..Self::default()
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms > 0).then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }

    /// Whether `version` is accepted from peers.
    pub fn accepts_version(&self, version: u32) -> bool {
        (self.min_protocol_version..=self.protocol_version).contains(&version)
    }
}
