//! Error types for the P2P network.
//!
//! Every error maps to an [`ErrorClass`] that decides what the caller does
//! with the connection or message it came from.

use std::net::SocketAddr;

use thiserror::Error;
use uuid::Uuid;

use super::node::{ConnectionId, NodeAddress};

/// How an error is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Handled locally, never surfaced
    Transient,
    /// The connection is released
    ConnectionFatal,
    /// The message is dropped and counted
    MessageFatal,
    /// The operation is refused
    ProtocolFatal,
}

// =============================================================================
// ENVELOPE
// =============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("compression failed: {0}")]
    Compression(String),

    #[error("decompressed body exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

// =============================================================================
// SECURE CHANNEL
// =============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecureChannelError {
    #[error("no channel key for {0}")]
    NoChannel(ConnectionId),

    #[error("no pending handshake for {0}")]
    NoPendingHandshake(ConnectionId),

    #[error("channel for {0} is already established")]
    ChannelAlreadyEstablished(ConnectionId),

    #[error("invalid handshake public key")]
    InvalidPublicKey,

    #[error("invalid handshake salt length: expected {expected}, got {actual}")]
    InvalidSaltLength { expected: usize, actual: usize },

    #[error("invalid {field} length: expected {expected}, got {actual}")]
    InvalidFieldLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("unsupported cipher version {0}")]
    UnsupportedCipher(u8),

    #[error("channel token mismatch")]
    TokenMismatch,

    #[error("authenticated decryption failed")]
    DecryptionFailed,

    #[error("crypto failure: {0}")]
    Crypto(String),
}

impl SecureChannelError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidPublicKey | Self::InvalidSaltLength { .. } | Self::NoPendingHandshake(_) => {
                ErrorClass::ConnectionFatal
            }
            _ => ErrorClass::MessageFatal,
        }
    }
}

// =============================================================================
// TRANSPORT
// =============================================================================

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connect to {0} timed out")]
    ConnectTimeout(SocketAddr),

    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    #[error("reactor is shut down")]
    ReactorGone,
}

impl TransportError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Io(e) if e.kind() == std::io::ErrorKind::WouldBlock => ErrorClass::Transient,
            _ => ErrorClass::ConnectionFatal,
        }
    }
}

// =============================================================================
// DISPATCH
// =============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("protocol version {got} outside [{min}, {max}]")]
    VersionMismatch { got: u32, min: u32, max: u32 },

    #[error("unencrypted {0} rejected")]
    Unencrypted(String),

    #[error(transparent)]
    Channel(#[from] SecureChannelError),

    #[error("no handler for {0}")]
    NoHandler(String),

    #[error("handler for {0} already registered")]
    DuplicateHandler(String),

    #[error("{pool} pool is closed")]
    PoolClosed { pool: &'static str },

    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    #[error("frame of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge { size: usize, limit: usize },
}

impl DispatchError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Channel(e) => e.class(),
            Self::UnknownConnection(_) => ErrorClass::ConnectionFatal,
            Self::DuplicateHandler(_) | Self::PoolClosed { .. } => ErrorClass::ProtocolFatal,
            _ => ErrorClass::MessageFatal,
        }
    }

    /// Label for the dropped-messages counter.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Envelope(EnvelopeError::Compression(_) | EnvelopeError::TooLarge { .. }) => {
                "decompress"
            }
            Self::Envelope(_) => "decode",
            Self::VersionMismatch { .. } => "version",
            Self::Unencrypted(_) => "unencrypted",
            Self::Channel(SecureChannelError::TokenMismatch) => "token",
            Self::Channel(SecureChannelError::NoChannel(_)) => "no_channel",
            Self::Channel(SecureChannelError::ChannelAlreadyEstablished(_)) => "rekey",
            Self::Channel(_) => "decrypt",
            Self::NoHandler(_) => "no_handler",
            Self::DuplicateHandler(_) => "duplicate_handler",
            Self::PoolClosed { .. } => "pool_closed",
            Self::UnknownConnection(_) => "unknown_connection",
            Self::FrameTooLarge { .. } => "frame_too_large",
        }
    }
}

// =============================================================================
// REGISTRY / CORRELATION / BROADCAST
// =============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("node {0} already registered")]
    AlreadyRegistered(NodeAddress),

    #[error("refusing to register the local node")]
    SelfNode,

    #[error("admission denied for {0}")]
    AdmissionDenied(NodeAddress),

    #[error("node {0} not found")]
    NotFound(NodeAddress),

    #[error("connection {0} closed before admission")]
    ConnectionClosed(ConnectionId),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CorrelationError {
    #[error("unknown request {0}")]
    UnknownRequest(Uuid),

    #[error("request {0} was completed before the wait finished")]
    Cancelled(Uuid),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BroadcastError {
    #[error("network fragmented: {disconnected} of {total} peers disconnected")]
    NetworkFragmented { disconnected: usize, total: usize },
}

// =============================================================================
// DISCOVERY
// =============================================================================

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Correlation(#[from] CorrelationError),

    #[error("handshake on {0} timed out")]
    HandshakeTimeout(ConnectionId),

    #[error("no response from {0}")]
    NoResponse(SocketAddr),

    #[error("registration rejected by {0}")]
    Rejected(SocketAddr),

    #[error("invalid signature from {0}")]
    InvalidSignature(NodeAddress),

    #[error("record identity does not match its address")]
    IdentityMismatch,
}

impl DiscoveryError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transport(e) => e.class(),
            Self::Dispatch(e) => e.class(),
            Self::Correlation(_) => ErrorClass::Transient,
            _ => ErrorClass::ConnectionFatal,
        }
    }
}

// =============================================================================
// AGGREGATE
// =============================================================================

/// Top-level error for [`crate::P2pNetwork`] operations.
#[derive(Debug, Error)]
pub enum P2pError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Broadcast(#[from] BroadcastError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("peer {0} is not connected")]
    NotConnected(NodeAddress),

    #[error("metrics: {0}")]
    Metrics(String),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}

impl P2pError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transport(e) => e.class(),
            Self::Dispatch(e) => e.class(),
            Self::Discovery(e) => e.class(),
            Self::Broadcast(_) => ErrorClass::ProtocolFatal,
            Self::Envelope(_) => ErrorClass::MessageFatal,
            Self::NotConnected(_) | Self::Registry(_) => ErrorClass::Transient,
            Self::Metrics(_) | Self::Spawn(_) => ErrorClass::ProtocolFatal,
        }
    }
}
