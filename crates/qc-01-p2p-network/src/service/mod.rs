//! # Service Layer
//!
//! Peer registry, discovery protocol and the network context that wires
//! transport, dispatch and discovery together.

pub mod discovery;
pub mod network;
pub mod registry;

pub use discovery::messages::{
    DeregisterNode, NodeListRequest, NodeListResponse, PingRequest, PingResponse,
    RegisterNodeRequest, RegisterNodeResponse,
};
pub use discovery::Discovery;
pub use network::{NetworkPorts, P2pNetwork, TransportReleaser};
pub use registry::PeerRegistry;
