//! # Domain Layer
//!
//! Pure wire and peer logic: framing, buffer resync, envelope codec,
//! quorum correlation and broadcast selection. No sockets, no threads.

pub mod broadcast;
pub mod correlation;
pub mod envelope;
pub mod errors;
pub mod frame;
pub mod node;
pub mod socket_buf;

pub use broadcast::{
    disconnected_ratio, fanout_size, select_targets, BROADCAST_THRESHOLD, MAX_DISCONNECTED_RATIO,
};
pub use correlation::{MsgId, PendingRequests, QuorumOutcome};
pub use envelope::{
    Ciphertext, Envelope, NetMessage, WireToken, CIPHER_VERSION, PROTOCOL_VERSION,
};
pub use errors::{
    BroadcastError, CorrelationError, DiscoveryError, DispatchError, EnvelopeError, ErrorClass,
    P2pError, RegistryError, SecureChannelError, TransportError,
};
pub use frame::{frame, unframe, CorruptReason, Frame, FrameStatus, DEFAULT_MAX_FRAME_SIZE, END_MARKER};
pub use node::{
    ConnectionId, ConnectionInfo, ConnectionKind, Node, NodeAddress, NodeRecord, PeerFilter,
};
pub use socket_buf::{extract_frames, extract_frames_from, Extraction, SocketBuf, SocketBuffers};
