//! # Worker Dispatch
//!
//! Three stage pools sit behind the event loop:
//!
//! ```text
//! reactor --MsgData--> [read] --WorkItem--> [work] --Job--> [domain pools]
//!         --MsgData--> [write]
//! ```
//!
//! - **read**: drains the socket to `WouldBlock`, re-frames, queues frames
//! - **work**: envelope decode, version check, decrypt, decompress, route
//! - **write**: flushes the connection's pending bytes
//!
//! The work queue is bounded; a full queue blocks read workers, which in
//! turn stop re-arming their sockets.

pub mod outbound;
pub mod pool;
pub mod router;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use crossbeam_channel::Sender;
use tracing::{debug, warn};

use crate::config::P2pConfig;
use crate::domain::envelope::{decode, decompress, Ciphertext, Envelope};
use crate::domain::errors::{DispatchError, ErrorClass};
use crate::domain::frame::Frame;
use crate::domain::node::{ConnectionId, ConnectionInfo};
use crate::domain::socket_buf::SocketBuffers;
use crate::metrics::NetworkMetrics;
use crate::ports::ConnectionReleaser;
use crate::secure::{is_handshake_type, SecureChannelManager};
use crate::transport::{EventLoop, IoEvent, MsgData};

pub use outbound::{Outbound, SendOptions};
pub use pool::{DomainPools, Job, StagePool};
pub use router::{Route, Router};

/// Bytes pulled from a socket per `try_read`.
pub const READ_CHUNK: usize = 64 * 1024;

/// One frame waiting for the work stage.
#[derive(Debug)]
pub struct WorkItem {
    pub connection: ConnectionId,
    pub remote: SocketAddr,
    pub frame: Frame,
}

/// Stage handlers shared by the read, work and write pools.
pub struct Dispatcher {
    config: Arc<P2pConfig>,
    event_loop: Arc<EventLoop>,
    buffers: Arc<SocketBuffers>,
    secure: Arc<SecureChannelManager>,
    router: Arc<Router>,
    domain: Arc<DomainPools>,
    metrics: NetworkMetrics,
    releaser: Arc<dyn ConnectionReleaser>,
    work_tx: Sender<WorkItem>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<P2pConfig>,
        event_loop: Arc<EventLoop>,
        buffers: Arc<SocketBuffers>,
        secure: Arc<SecureChannelManager>,
        router: Arc<Router>,
        domain: Arc<DomainPools>,
        metrics: NetworkMetrics,
        releaser: Arc<dyn ConnectionReleaser>,
        work_tx: Sender<WorkItem>,
    ) -> Self {
        Self {
            config,
            event_loop,
            buffers,
            secure,
            router,
            domain,
            metrics,
            releaser,
            work_tx,
        }
    }

    // =========================================================================
    // READ STAGE
    // =========================================================================

    pub fn handle_read(&self, event: MsgData) {
        let conn = event.connection;
        if event.event == IoEvent::Error {
            debug!(%conn, "read error event");
            self.releaser.release(conn);
            return;
        }

        let (Some(buf), Some(remote)) = (self.buffers.get(conn), self.event_loop.peer_addr(conn))
        else {
            return;
        };

        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            match self.event_loop.try_read(conn, &mut chunk) {
                Ok(0) => {
                    debug!(%conn, %remote, "peer closed");
                    self.releaser.release(conn);
                    return;
                }
                Ok(n) => {
                    let extraction = buf.push_inbound(&chunk[..n], self.config.max_frame_size);
                    if extraction.resyncs > 0 {
                        warn!(%conn, resyncs = extraction.resyncs, "inbound buffer resynchronized");
                        self.metrics.add_resyncs(extraction.resyncs);
                    }
                    for frame in extraction.frames {
                        let item = WorkItem {
                            connection: conn,
                            remote,
                            frame,
                        };
                        if self.work_tx.send(item).is_err() {
                            return;
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.event_loop.rearm_read(conn);
                    return;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(%conn, %remote, error = %e, "read failed");
                    self.releaser.release(conn);
                    return;
                }
            }
        }
    }

    // =========================================================================
    // WORK STAGE
    // =========================================================================

    pub fn handle_work(&self, item: WorkItem) {
        let conn = item.connection;
        if let Err(e) = self.process_frame(item) {
            self.metrics.record_drop(e.reason());
            match e.class() {
                ErrorClass::ConnectionFatal => {
                    warn!(%conn, error = %e, "releasing connection");
                    self.releaser.release(conn);
                }
                _ => warn!(%conn, error = %e, "message dropped"),
            }
        }
    }

    /// Decode one frame and hand it to its domain pool.
    pub fn process_frame(&self, item: WorkItem) -> Result<(), DispatchError> {
        let limit = self.config.max_frame_size;
        let payload_len = item.frame.payload.len();
        let envelope = Envelope::from_bytes(&item.frame.payload, limit)?;

        if !self.config.accepts_version(envelope.version) {
            return Err(DispatchError::VersionMismatch {
                got: envelope.version,
                min: self.config.min_protocol_version,
                max: self.config.protocol_version,
            });
        }

        let body = if envelope.encrypt_flag {
            let sealed: Ciphertext = decode(&envelope.body, limit)?;
            self.secure
                .open(item.connection, &envelope.type_name, &sealed)?
        } else if self.config.require_encryption && !is_handshake_type(&envelope.type_name) {
            return Err(DispatchError::Unencrypted(envelope.type_name));
        } else {
            envelope.body
        };

        let body = if envelope.compress_flag {
            decompress(&body, limit)?
        } else {
            body
        };

        let info = ConnectionInfo {
            connection: item.connection,
            remote: item.remote,
        };
        let (route, job) = self.router.prepare(&envelope.type_name, &body, info, limit)?;
        self.metrics.record_message(&envelope.type_name, payload_len);
        self.domain.submit(route, job)?;

        debug!(
            conn = %item.connection,
            type_name = %envelope.type_name,
            route = route.name(),
            "dispatched"
        );
        Ok(())
    }

    // =========================================================================
    // WRITE STAGE
    // =========================================================================

    pub fn handle_write(&self, event: MsgData) {
        let conn = event.connection;
        if event.event == IoEvent::Error {
            self.releaser.release(conn);
            return;
        }
        let Some(buf) = self.buffers.get(conn) else {
            return;
        };

        match buf.flush_with(|bytes| self.event_loop.try_write(conn, bytes)) {
            Ok(true) => {
                if buf.is_transient() && self.config.close_transient_after_flush {
                    debug!(%conn, "closing transient connection after flush");
                    self.releaser.release(conn);
                }
            }
            Ok(false) => self.event_loop.request_write(conn),
            Err(e) => {
                warn!(%conn, error = %e, "write failed");
                self.releaser.release(conn);
            }
        }
    }
}
