//! # Connection Buffers
//!
//! Per-connection inbound accumulation and outbound pending bytes.
//!
//! Inbound bytes are re-framed with [`extract_frames`], a pure function over
//! an owned buffer. Bad frames trigger a resync: everything up to and
//! including the next [`END_MARKER`] is discarded, or the whole buffer if no
//! marker is present. A head that declares a plausible length but is
//! followed by a marker and a verified frame is treated as garbage too. The buffer therefore never holds more than one frame
//! below the size limit plus one read.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::frame::{unframe, Frame, FrameStatus, END_MARKER};
use super::node::ConnectionId;

/// Frames recovered from one extraction pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Extraction {
    pub frames: Vec<Frame>,
    /// Number of resynchronizations performed
    pub resyncs: usize,
}

/// Pull every complete frame off the front of `buf`.
///
/// Leaves any trailing partial frame in place. Always terminates: each
/// resync removes at least one byte.
pub fn extract_frames(buf: &mut Vec<u8>, max_frame_size: usize) -> Extraction {
    extract_frames_from(buf, max_frame_size, &mut 0)
}

/// [`extract_frames`] with the marker scan resumed at `*scan_from`.
///
/// While the head of the buffer is incomplete, the bytes behind it are
/// searched for an end marker followed by a complete, checksummed frame.
/// Finding one proves the head is garbage with a plausible length, and the
/// buffer is resynchronized to that marker. `*scan_from` remembers how far
/// that search got so later calls only look at new bytes.
pub fn extract_frames_from(
    buf: &mut Vec<u8>,
    max_frame_size: usize,
    scan_from: &mut usize,
) -> Extraction {
    let mut out = Extraction::default();

    loop {
        match unframe(buf, max_frame_size) {
            FrameStatus::Incomplete => match recovery_point(buf, max_frame_size, scan_from) {
                Some(marker_end) => {
                    buf.drain(..marker_end);
                    *scan_from = 0;
                    out.resyncs += 1;
                }
                None => break,
            },
            FrameStatus::Complete { frame, consumed } => {
                buf.drain(..consumed);
                *scan_from = 0;
                out.frames.push(frame);
            }
            FrameStatus::Oversized { .. } | FrameStatus::Corrupt { .. } => {
                resync(buf);
                *scan_from = 0;
                out.resyncs += 1;
            }
        }
        if buf.is_empty() {
            break;
        }
    }

    out
}

/// Drop bytes up to and including the next end marker.
fn resync(buf: &mut Vec<u8>) {
    let marker = END_MARKER.to_be_bytes();
    match buf.windows(marker.len()).position(|w| w == marker) {
        Some(pos) => {
            buf.drain(..pos + marker.len());
        }
        None => buf.clear(),
    }
}

/// End offset of the first marker behind the head that is followed by a
/// complete valid frame.
///
/// A marker followed by a still-incomplete candidate stops the search and
/// is revisited on the next call.
fn recovery_point(buf: &[u8], max_frame_size: usize, scan_from: &mut usize) -> Option<usize> {
    let marker = END_MARKER.to_be_bytes();
    let mut pos = (*scan_from).max(1);

    while pos + marker.len() <= buf.len() {
        let Some(offset) = buf[pos..].windows(marker.len()).position(|w| w == marker) else {
            break;
        };
        let marker_at = pos + offset;
        let marker_end = marker_at + marker.len();
        match unframe(&buf[marker_end..], max_frame_size) {
            FrameStatus::Complete { .. } => return Some(marker_end),
            FrameStatus::Incomplete => {
                *scan_from = marker_at;
                return None;
            }
            FrameStatus::Oversized { .. } | FrameStatus::Corrupt { .. } => pos = marker_at + 1,
        }
    }

    // A marker may straddle the end of what has arrived so far
    *scan_from = pos.max(buf.len().saturating_sub(marker.len() - 1));
    None
}

// =============================================================================
// SOCKET BUFFER
// =============================================================================

/// Unframed bytes plus the resync scan position.
#[derive(Debug, Default)]
struct Inbound {
    bytes: Vec<u8>,
    scan_from: usize,
}

/// Read and write buffers for one connection, each under its own lock.
#[derive(Debug, Default)]
pub struct SocketBuf {
    inbound: Mutex<Inbound>,
    outbound: Mutex<Vec<u8>>,
    transient: AtomicBool,
}

impl SocketBuf {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read bytes and extract complete frames.
    pub fn push_inbound(&self, bytes: &[u8], max_frame_size: usize) -> Extraction {
        let mut inbound = self.inbound.lock();
        let Inbound { bytes: buffered, scan_from } = &mut *inbound;
        buffered.extend_from_slice(bytes);
        extract_frames_from(buffered, max_frame_size, scan_from)
    }

    /// Bytes buffered but not yet framed.
    pub fn inbound_len(&self) -> usize {
        self.inbound.lock().bytes.len()
    }

    /// Queue bytes for sending.
    pub fn append(&self, bytes: &[u8]) {
        self.outbound.lock().extend_from_slice(bytes);
    }

    /// Remove exactly `n` sent bytes from the front of the pending buffer.
    pub fn pop(&self, n: usize) {
        let mut outbound = self.outbound.lock();
        let n = n.min(outbound.len());
        outbound.drain(..n);
    }

    pub fn pending_len(&self) -> usize {
        self.outbound.lock().len()
    }

    /// Drain the pending buffer through `write` until it is empty or the
    /// writer reports `WouldBlock`.
    ///
    /// The outbound lock is held for the whole drain so concurrent flushes
    /// of the same connection cannot interleave bytes. Returns whether the
    /// buffer is now empty.
    pub fn flush_with<W>(&self, mut write: W) -> std::io::Result<bool>
    where
        W: FnMut(&[u8]) -> std::io::Result<usize>,
    {
        let mut outbound = self.outbound.lock();
        while !outbound.is_empty() {
            match write(&outbound) {
                Ok(0) => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::WriteZero,
                        "peer accepted zero bytes",
                    ))
                }
                Ok(n) => {
                    outbound.drain(..n);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    pub fn set_transient(&self, transient: bool) {
        self.transient.store(transient, Ordering::Release);
    }

    pub fn is_transient(&self) -> bool {
        self.transient.load(Ordering::Acquire)
    }
}

/// Connection-id keyed map of [`SocketBuf`]s.
#[derive(Debug, Default)]
pub struct SocketBuffers {
    inner: RwLock<HashMap<ConnectionId, Arc<SocketBuf>>>,
}

impl SocketBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) the buffer for `conn`.
    pub fn create(&self, conn: ConnectionId) -> Arc<SocketBuf> {
        let buf = Arc::new(SocketBuf::new());
        self.inner.write().insert(conn, Arc::clone(&buf));
        buf
    }

    pub fn get(&self, conn: ConnectionId) -> Option<Arc<SocketBuf>> {
        self.inner.read().get(&conn).cloned()
    }

    pub fn remove(&self, conn: ConnectionId) -> Option<Arc<SocketBuf>> {
        self.inner.write().remove(&conn)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
