//! Outbound encoding: message -> envelope -> frame -> write buffer.

use std::sync::Arc;

use crate::domain::envelope::{compress, encode, Envelope, NetMessage};
use crate::domain::errors::DispatchError;
use crate::domain::frame::{frame, TRAILER_LEN};
use crate::domain::node::ConnectionId;
use crate::domain::socket_buf::SocketBuffers;
use crate::secure::SecureChannelManager;
use crate::transport::EventLoop;

/// Per-send envelope options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    pub compress: bool,
    pub encrypt: bool,
    /// Low nibble only
    pub priority: u8,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            compress: false,
            encrypt: true,
            priority: 0,
        }
    }
}

impl SendOptions {
    /// Unencrypted, uncompressed. Only handshake traffic uses this.
    pub fn plain() -> Self {
        Self {
            encrypt: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn compressed(mut self) -> Self {
        self.compress = true;
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}

/// Send half of the network: queues framed envelopes on connections.
///
/// Queued bytes are flushed by the write stage once the socket reports
/// writable.
pub struct Outbound {
    protocol_version: u32,
    max_frame_size: usize,
    event_loop: Arc<EventLoop>,
    buffers: Arc<SocketBuffers>,
    secure: Arc<SecureChannelManager>,
}

impl Outbound {
    pub fn new(
        protocol_version: u32,
        max_frame_size: usize,
        event_loop: Arc<EventLoop>,
        buffers: Arc<SocketBuffers>,
        secure: Arc<SecureChannelManager>,
    ) -> Self {
        Self {
            protocol_version,
            max_frame_size: max_frame_size.min(u32::MAX as usize),
            event_loop,
            buffers,
            secure,
        }
    }

    /// Build the framed bytes for `message` on `conn`.
    ///
    /// Compression happens before encryption. Frames whose length field
    /// would exceed the frame size limit are refused.
    pub fn encode<M: NetMessage>(
        &self,
        conn: ConnectionId,
        message: &M,
        options: SendOptions,
    ) -> Result<Vec<u8>, DispatchError> {
        let mut body = encode(message)?;
        if options.compress {
            body = compress(&body)?;
        }
        if options.encrypt {
            let sealed = self.secure.seal(conn, M::TYPE_NAME, &body)?;
            body = encode(&sealed)?;
        }

        let envelope = Envelope {
            type_name: M::TYPE_NAME.to_string(),
            version: self.protocol_version,
            compress_flag: options.compress,
            encrypt_flag: options.encrypt,
            body,
        };
        let payload = envelope.to_bytes()?;
        let size = payload.len() + TRAILER_LEN;
        if size > self.max_frame_size {
            return Err(DispatchError::FrameTooLarge {
                size,
                limit: self.max_frame_size,
            });
        }
        Ok(frame(&payload, options.priority))
    }

    /// Queue already-framed bytes.
    pub fn send_raw(&self, conn: ConnectionId, bytes: &[u8]) -> Result<(), DispatchError> {
        let buf = self
            .buffers
            .get(conn)
            .ok_or(DispatchError::UnknownConnection(conn))?;
        buf.append(bytes);
        self.event_loop.request_write(conn);
        Ok(())
    }

    pub fn send<M: NetMessage>(
        &self,
        conn: ConnectionId,
        message: &M,
        options: SendOptions,
    ) -> Result<(), DispatchError> {
        let bytes = self.encode(conn, message, options)?;
        self.send_raw(conn, &bytes)?;
        tracing::debug!(%conn, type_name = M::TYPE_NAME, bytes = bytes.len(), "queued");
        Ok(())
    }

    /// Send without encryption.
    pub fn send_plain<M: NetMessage>(
        &self,
        conn: ConnectionId,
        message: &M,
    ) -> Result<(), DispatchError> {
        self.send(conn, message, SendOptions::plain())
    }

    pub fn has_key(&self, conn: ConnectionId) -> bool {
        self.secure.has_key(conn)
    }
}
