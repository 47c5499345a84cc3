//! Peer identity and connection types.

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use shared_crypto::Secp256k1PublicKey;

// =============================================================================
// CONNECTION ID
// =============================================================================

/// Process-unique token for a registered socket.
///
/// Tokens are never reused, unlike OS file descriptors, so a stale id can
/// never address a newer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Connection metadata handed to message handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Connection the message arrived on
    pub connection: ConnectionId,
    /// Remote socket address
    pub remote: SocketAddr,
}

// =============================================================================
// NODE ADDRESS
// =============================================================================

/// 32-byte node address: SHA-256 of the compressed identity key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAddress(pub [u8; 32]);

impl NodeAddress {
    /// Derive from an identity public key.
    pub fn from_identity(key: &Secp256k1PublicKey) -> Self {
        Self(key.node_address())
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeAddress({})", hex::encode(&self.0[..8]))
    }
}

// =============================================================================
// NODE
// =============================================================================

/// Class of peer on the other end of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    /// Long-lived full node
    #[default]
    FullNode,
    /// Light client
    LightNode,
    /// Mobile peer; connection is transient
    Mobile,
}

impl ConnectionKind {
    /// Whether the connection may be closed once its write buffer drains.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Mobile)
    }
}

/// Wire form of a node, shared in discovery messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// SHA-256 of `identity_key`
    pub address: NodeAddress,
    /// Compressed secp256k1 identity key (33 bytes)
    pub identity_key: Vec<u8>,
    /// Address other nodes should dial
    pub public_addr: SocketAddr,
    /// Address the node actually bound
    pub listen_addr: SocketAddr,
    /// Peer class
    pub kind: ConnectionKind,
    /// Reported chain height
    pub chain_height: u64,
    /// Display name
    pub name: String,
    /// Logo URL or identifier
    pub logo: String,
    /// Software version
    pub version: String,
}

impl NodeRecord {
    /// Parse the identity key and check that `address` is derived from it.
    ///
    /// Returns the parsed key on success.
    pub fn verified_identity(&self) -> Option<Secp256k1PublicKey> {
        let key = Secp256k1PublicKey::from_slice(&self.identity_key).ok()?;
        (NodeAddress::from_identity(&key) == self.address).then_some(key)
    }
}

/// A known peer, owned by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Shared metadata
    pub record: NodeRecord,
    /// Live connection, if any
    pub connection: Option<ConnectionId>,
    /// Liveness countdown; evicted at zero
    pub pulse: u32,
}

impl Node {
    /// Wrap a record with no connection and a zero pulse.
    pub fn new(record: NodeRecord) -> Self {
        Self {
            record,
            connection: None,
            pulse: 0,
        }
    }

    /// Attach a connection.
    #[must_use]
    pub fn with_connection(mut self, connection: ConnectionId) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn address(&self) -> NodeAddress {
        self.record.address
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn is_alive(&self) -> bool {
        self.pulse > 0
    }
}

/// Selection filter for registry snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerFilter {
    /// Every known peer
    #[default]
    All,
    /// Only peers with a live connection
    Connected,
    /// Only peers of one class
    Kind(ConnectionKind),
}

impl PeerFilter {
    pub fn matches(&self, node: &Node) -> bool {
        match self {
            Self::All => true,
            Self::Connected => node.is_connected(),
            Self::Kind(kind) => node.record.kind == *kind,
        }
    }
}
