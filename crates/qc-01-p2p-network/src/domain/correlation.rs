//! # Quorum Correlation
//!
//! Fan-out requests share one correlation id. Responses are collected per
//! remote `ip:port` (duplicates ignored) and the waiter is woken as soon as
//! `min_required` distinct responses have arrived. On timeout the waiter
//! gets whatever was collected, flagged as partial.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use uuid::Uuid;

use super::errors::CorrelationError;

/// Correlation id shared by a request and its responses.
pub type MsgId = Uuid;

/// Result of a quorum wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuorumOutcome<R> {
    pub responses: Vec<(SocketAddr, R)>,
    /// `true` if fewer than `min_required` responses arrived in time
    pub timed_out: bool,
}

impl<R> QuorumOutcome<R> {
    pub fn is_quorum(&self) -> bool {
        !self.timed_out
    }
}

struct PendingEntry<R> {
    expected: usize,
    min_required: usize,
    deadline: Instant,
    collected: Vec<(SocketAddr, R)>,
    signal: Sender<()>,
    wake: Receiver<()>,
    signalled: bool,
}

/// Table of outstanding fan-out requests.
pub struct PendingRequests<R> {
    inner: Mutex<HashMap<MsgId, PendingEntry<R>>>,
}

impl<R> Default for PendingRequests<R> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl<R> PendingRequests<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a correlation entry.
    ///
    /// `min_required` is clamped to `expected`.
    pub fn create(&self, expected: usize, min_required: usize, timeout: Duration) -> MsgId {
        let id = Uuid::new_v4();
        let (signal, wake) = bounded(1);
        let min_required = min_required.min(expected);

        let mut entry = PendingEntry {
            expected,
            min_required,
            deadline: Instant::now() + timeout,
            collected: Vec::with_capacity(expected),
            signal,
            wake,
            signalled: false,
        };
        if min_required == 0 {
            entry.signalled = entry.signal.try_send(()).is_ok();
        }

        self.inner.lock().insert(id, entry);
        id
    }

    /// Record a response.
    ///
    /// Returns `false` for unknown or finished ids and for a second response
    /// from the same remote.
    pub fn add_response(&self, id: MsgId, from: SocketAddr, response: R) -> bool {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.get_mut(&id) else {
            return false;
        };
        if entry.collected.iter().any(|(addr, _)| *addr == from) {
            return false;
        }
        if entry.collected.len() >= entry.expected {
            return false;
        }

        entry.collected.push((from, response));
        if !entry.signalled && entry.collected.len() >= entry.min_required {
            entry.signalled = entry.signal.try_send(()).is_ok();
        }
        true
    }

    /// Block until quorum or timeout, then close the entry.
    pub fn wait(&self, id: MsgId) -> Result<QuorumOutcome<R>, CorrelationError> {
        let (wake, deadline) = {
            let inner = self.inner.lock();
            let entry = inner
                .get(&id)
                .ok_or(CorrelationError::UnknownRequest(id))?;
            (entry.wake.clone(), entry.deadline)
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        let woke = match wake.recv_timeout(remaining) {
            Ok(()) => true,
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => return Err(CorrelationError::Cancelled(id)),
        };

        let entry = self
            .inner
            .lock()
            .remove(&id)
            .ok_or(CorrelationError::Cancelled(id))?;

        let timed_out = !woke && entry.collected.len() < entry.min_required;
        Ok(QuorumOutcome {
            responses: entry.collected,
            timed_out,
        })
    }

    /// Close an entry early, returning what it collected.
    pub fn complete(&self, id: MsgId) -> Option<Vec<(SocketAddr, R)>> {
        self.inner.lock().remove(&id).map(|entry| entry.collected)
    }

    pub fn is_pending(&self, id: MsgId) -> bool {
        self.inner.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests;
