//! # Event Loop
//!
//! One readiness multiplexer (the tokio reactor) shared by every
//! connection. Readiness is turned into [`MsgData`] items on the read and
//! write queues; decoding and decryption happen in the worker pools.
//!
//! ## Read ordering
//!
//! Each connection has at most one outstanding `Readable` event. After
//! pushing one, the connection's read watcher parks until a read worker has
//! drained the socket to `WouldBlock` and calls [`EventLoop::rearm_read`].
//! A single consumer per socket keeps arrival order intact.
//!
//! ## Threads
//!
//! [`EventLoop::connect`] and [`EventLoop::listen`] block the calling OS
//! thread on the reactor's result and must not be called from a tokio
//! worker.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use parking_lot::RwLock;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use crate::domain::errors::TransportError;
use crate::domain::node::ConnectionId;
use crate::domain::socket_buf::SocketBuffers;

/// Readiness reported for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoEvent {
    Readable,
    Writable,
    Error,
}

/// Unit pushed onto the read and write queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgData {
    pub connection: ConnectionId,
    pub event: IoEvent,
}

struct Connection {
    stream: TcpStream,
    remote: SocketAddr,
    rearm: Notify,
    want_write: Notify,
    shutdown: watch::Sender<bool>,
}

/// Socket registry and readiness translator.
pub struct EventLoop {
    handle: Handle,
    next_id: AtomicU64,
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    buffers: Arc<SocketBuffers>,
    read_tx: Sender<MsgData>,
    write_tx: Sender<MsgData>,
    shutdown: watch::Sender<bool>,
}

impl EventLoop {
    pub fn new(
        handle: Handle,
        buffers: Arc<SocketBuffers>,
        read_tx: Sender<MsgData>,
        write_tx: Sender<MsgData>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            handle,
            next_id: AtomicU64::new(1),
            connections: RwLock::new(HashMap::new()),
            buffers,
            read_tx,
            write_tx,
            shutdown,
        }
    }

    /// Register a connected stream and start watching it for reads.
    ///
    /// Creates the connection's [`crate::domain::SocketBuf`]. Write interest
    /// is armed on demand by [`Self::request_write`].
    pub fn register(&self, stream: TcpStream) -> Result<ConnectionId, TransportError> {
        let remote = stream.peer_addr()?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%remote, error = %e, "set_nodelay failed");
        }

        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let conn = Arc::new(Connection {
            stream,
            remote,
            rearm: Notify::new(),
            want_write: Notify::new(),
            shutdown,
        });

        self.buffers.create(id);
        self.connections.write().insert(id, Arc::clone(&conn));

        self.handle.spawn(watch_readable(
            id,
            Arc::clone(&conn),
            self.read_tx.clone(),
            shutdown_rx.clone(),
        ));
        self.handle
            .spawn(watch_writable(id, conn, self.write_tx.clone(), shutdown_rx));

        debug!(conn = %id, %remote, "connection registered");
        Ok(id)
    }

    /// Stop tracking `conn`, drop its buffer and close the socket.
    ///
    /// Returns `false` if it was already gone.
    pub fn deregister(&self, conn: ConnectionId) -> bool {
        let Some(connection) = self.connections.write().remove(&conn) else {
            return false;
        };
        connection.shutdown.send_replace(true);
        self.buffers.remove(conn);
        debug!(%conn, remote = %connection.remote, "connection deregistered");
        true
    }

    /// Open an outbound connection with a bounded timeout.
    pub fn connect(
        &self,
        addr: SocketAddr,
        timeout: Duration,
    ) -> Result<ConnectionId, TransportError> {
        let (tx, rx) = bounded(1);
        self.handle.spawn(async move {
            let result = tokio::time::timeout(timeout, TcpStream::connect(addr)).await;
            let _ = tx.send(result);
        });

        match rx.recv() {
            Ok(Ok(Ok(stream))) => self.register(stream),
            Ok(Ok(Err(e))) => Err(TransportError::Io(e)),
            Ok(Err(_elapsed)) => Err(TransportError::ConnectTimeout(addr)),
            Err(_) => Err(TransportError::ReactorGone),
        }
    }

    /// Bind `addr` and register every accepted connection.
    ///
    /// Returns the bound address.
    pub fn listen(self: &Arc<Self>, addr: SocketAddr) -> Result<SocketAddr, TransportError> {
        let (tx, rx) = bounded(1);
        self.handle.spawn(async move {
            let _ = tx.send(TcpListener::bind(addr).await);
        });
        let listener = rx.recv().map_err(|_| TransportError::ReactorGone)??;
        let local = listener.local_addr()?;

        let this = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        self.handle.spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, remote)) => match this.register(stream) {
                            Ok(conn) => debug!(%conn, %remote, "accepted"),
                            Err(e) => warn!(%remote, error = %e, "failed to register accepted socket"),
                        },
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            tokio::time::sleep(Duration::from_millis(50)).await;
                        }
                    },
                }
            }
            debug!(%local, "listener stopped");
        });

        info!(%local, "listening");
        Ok(local)
    }

    fn get(&self, conn: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().get(&conn).cloned()
    }

    /// Non-blocking read.
    pub fn try_read(&self, conn: ConnectionId, buf: &mut [u8]) -> io::Result<usize> {
        self.get(conn).ok_or_else(not_connected)?.stream.try_read(buf)
    }

    /// Non-blocking write.
    pub fn try_write(&self, conn: ConnectionId, buf: &[u8]) -> io::Result<usize> {
        self.get(conn).ok_or_else(not_connected)?.stream.try_write(buf)
    }

    /// Allow the next `Readable` event for `conn`.
    pub fn rearm_read(&self, conn: ConnectionId) {
        if let Some(c) = self.get(conn) {
            c.rearm.notify_one();
        }
    }

    /// Arm write interest; a `Writable` event follows once the socket can
    /// take bytes.
    pub fn request_write(&self, conn: ConnectionId) {
        if let Some(c) = self.get(conn) {
            c.want_write.notify_one();
        }
    }

    pub fn peer_addr(&self, conn: ConnectionId) -> Option<SocketAddr> {
        self.get(conn).map(|c| c.remote)
    }

    pub fn is_registered(&self, conn: ConnectionId) -> bool {
        self.connections.read().contains_key(&conn)
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Stop listeners and close every connection.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        for conn in self.connection_ids() {
            self.deregister(conn);
        }
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection not registered")
}

async fn watch_readable(
    id: ConnectionId,
    conn: Arc<Connection>,
    tx: Sender<MsgData>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.changed() => return,
            ready = conn.stream.readable() => match ready {
                Ok(()) => IoEvent::Readable,
                Err(_) => IoEvent::Error,
            },
        };
        if tx.send(MsgData { connection: id, event }).is_err() || event == IoEvent::Error {
            return;
        }

        tokio::select! {
            _ = shutdown.changed() => return,
            _ = conn.rearm.notified() => {}
        }
    }
}

async fn watch_writable(
    id: ConnectionId,
    conn: Arc<Connection>,
    tx: Sender<MsgData>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = conn.want_write.notified() => {}
        }

        let event = tokio::select! {
            _ = shutdown.changed() => return,
            ready = conn.stream.writable() => match ready {
                Ok(()) => IoEvent::Writable,
                Err(_) => IoEvent::Error,
            },
        };
        if tx.send(MsgData { connection: id, event }).is_err() || event == IoEvent::Error {
            return;
        }
    }
}

#[cfg(test)]
mod tests;
