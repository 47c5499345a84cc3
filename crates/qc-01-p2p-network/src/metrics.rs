//! Prometheus metrics for the P2P layer.
//!
//! Metrics live in a registry owned by the network context rather than a
//! process global, so several networks (e.g. in tests) never collide.
//!
//! - `qc_p2p_messages_total{type}` - messages dispatched per type
//! - `qc_p2p_message_bytes_total{type}` - frame payload bytes per type
//! - `qc_p2p_messages_dropped_total{reason}` - rejected messages
//! - `qc_p2p_peers` - registry size
//! - `qc_p2p_resyncs_total` - inbound buffer resynchronizations

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Network-scoped metric set.
#[derive(Clone)]
pub struct NetworkMetrics {
    registry: Registry,
    messages: IntCounterVec,
    message_bytes: IntCounterVec,
    dropped: IntCounterVec,
    peers: IntGauge,
    resyncs: IntCounter,
}

impl NetworkMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let messages = IntCounterVec::new(
            Opts::new("qc_p2p_messages_total", "Messages dispatched, by type"),
            &["type"],
        )?;
        let message_bytes = IntCounterVec::new(
            Opts::new("qc_p2p_message_bytes_total", "Frame payload bytes dispatched, by type"),
            &["type"],
        )?;
        let dropped = IntCounterVec::new(
            Opts::new("qc_p2p_messages_dropped_total", "Messages dropped, by reason"),
            &["reason"],
        )?;
        let peers = IntGauge::new("qc_p2p_peers", "Peers in the registry")?;
        let resyncs = IntCounter::new("qc_p2p_resyncs_total", "Inbound buffer resyncs")?;

        registry.register(Box::new(messages.clone()))?;
        registry.register(Box::new(message_bytes.clone()))?;
        registry.register(Box::new(dropped.clone()))?;
        registry.register(Box::new(peers.clone()))?;
        registry.register(Box::new(resyncs.clone()))?;

        Ok(Self {
            registry,
            messages,
            message_bytes,
            dropped,
            peers,
            resyncs,
        })
    }

    pub fn record_message(&self, type_name: &str, bytes: usize) {
        self.messages.with_label_values(&[type_name]).inc();
        self.message_bytes
            .with_label_values(&[type_name])
            .inc_by(bytes as u64);
    }

    pub fn record_drop(&self, reason: &str) {
        self.dropped.with_label_values(&[reason]).inc();
    }

    pub fn set_peers(&self, count: usize) {
        self.peers.set(count as i64);
    }

    pub fn add_resyncs(&self, count: usize) {
        self.resyncs.inc_by(count as u64);
    }

    pub fn messages(&self, type_name: &str) -> u64 {
        self.messages.with_label_values(&[type_name]).get()
    }

    pub fn message_bytes(&self, type_name: &str) -> u64 {
        self.message_bytes.with_label_values(&[type_name]).get()
    }

    pub fn dropped(&self, reason: &str) -> u64 {
        self.dropped.with_label_values(&[reason]).get()
    }

    pub fn peers(&self) -> i64 {
        self.peers.get()
    }

    pub fn resyncs(&self) -> u64 {
        self.resyncs.get()
    }

    /// Text exposition format.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "failed to encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl std::fmt::Debug for NetworkMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkMetrics")
            .field("peers", &self.peers.get())
            .field("resyncs", &self.resyncs.get())
            .finish_non_exhaustive()
    }
}
