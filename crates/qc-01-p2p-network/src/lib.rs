//! # P2P Secure Transport & Dispatch
//!
//! **Subsystem ID:** 1
//!
//! Framed TCP transport with per-connection ECDH channels, staged worker
//! dispatch to typed handlers, and a signed discovery protocol on top.
//!
//! ## Architecture
//!
//! - **Domain Layer:** framing, buffer resync, envelope codec, quorum
//!   correlation, broadcast selection (no sockets, no threads)
//! - **Ports Layer:** admission, stake, chain height, connection release
//! - **Secure/Transport/Dispatch:** key exchange, tokio readiness reactor,
//!   read/work/write stage pools and domain pools
//! - **Service Layer:** peer registry, discovery, the [`P2pNetwork`] context
//! - **Adapters Layer:** TOML config, in-memory ports
//!
//! ## Example
//!
//! ```no_run
//! use qc_01_p2p_network::{NetMessage, NetworkPorts, P2pConfig, P2pNetwork, Route, SendOptions};
//! use serde::{Deserialize, Serialize};
//! use shared_crypto::Secp256k1KeyPair;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Vote { height: u64 }
//!
//! impl NetMessage for Vote {
//!     const TYPE_NAME: &'static str = "Vote";
//! }
//!
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! let network = P2pNetwork::start(
//!     P2pConfig::default(),
//!     Secp256k1KeyPair::generate(),
//!     runtime.handle().clone(),
//!     NetworkPorts::default(),
//! )
//! .unwrap();
//!
//! network
//!     .register::<Vote, _>(Route::Chain, |vote, info| {
//!         println!("vote at {} from {}", vote.height, info.remote);
//!     })
//!     .unwrap();
//! network.bootstrap();
//! network.broadcast(Vote { height: 7 }, 7, SendOptions::default()).unwrap();
//! ```

pub mod adapters;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod metrics;
pub mod ports;
pub mod secure;
pub mod service;
pub mod transport;

// =============================================================================
// RE-EXPORTS
// =============================================================================

pub use adapters::{
    AllowAllVerifier, AllowListVerifier, ConfigError, FixedHeightSource, RecordingReleaser,
    StaticConfigProvider, StaticStakeOracle, TomlConfigProvider,
};
pub use config::{NodeMetadata, P2pConfig, PoolThreads};
pub use dispatch::{Route, SendOptions};
pub use domain::{
    ConnectionId, ConnectionInfo, ConnectionKind, ErrorClass, NetMessage, Node, NodeAddress,
    NodeRecord, P2pError, PeerFilter,
};
pub use metrics::NetworkMetrics;
pub use ports::{
    AdmissionVerifier, ChainHeightSource, ConfigProvider, ConnectionReleaser, StakeOracle,
};
pub use secure::{KeyExchangeRequest, KeyExchangeResponse};
pub use service::{NetworkPorts, P2pNetwork, PeerRegistry};
