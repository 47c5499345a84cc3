//! # P2P Network Context
//!
//! Owns every shared service and the worker threads. Constructed once with
//! [`P2pNetwork::start`]; everything else receives `Arc` handles.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{Builder, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, tick, unbounded, Sender};
use parking_lot::Mutex;
use shared_crypto::Secp256k1KeyPair;
use tokio::runtime::Handle;
use tracing::{debug, error, info};

use super::discovery::messages::Reply;
use super::discovery::Discovery;
use super::registry::PeerRegistry;
use crate::adapters::{AllowAllVerifier, FixedHeightSource, StaticStakeOracle};
use crate::config::P2pConfig;
use crate::dispatch::{Dispatcher, DomainPools, Outbound, Route, Router, SendOptions, StagePool, WorkItem};
use crate::domain::broadcast::select_targets;
use crate::domain::correlation::PendingRequests;
use crate::domain::envelope::NetMessage;
use crate::domain::errors::P2pError;
use crate::domain::node::{ConnectionId, ConnectionInfo, Node, NodeAddress, NodeRecord, PeerFilter};
use crate::domain::socket_buf::SocketBuffers;
use crate::metrics::NetworkMetrics;
use crate::ports::{AdmissionVerifier, ChainHeightSource, ConnectionReleaser, StakeOracle};
use crate::secure::SecureChannelManager;
use crate::transport::{EventLoop, MsgData};

/// How long shutdown waits for queued deregistrations to flush.
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

/// Collaborators supplied by the embedding node.
#[derive(Clone)]
pub struct NetworkPorts {
    pub verifier: Arc<dyn AdmissionVerifier>,
    pub stake: Arc<dyn StakeOracle>,
    pub height: Arc<dyn ChainHeightSource>,
}

impl Default for NetworkPorts {
    /// Admit everyone, treat everyone as staked, height zero.
    fn default() -> Self {
        Self {
            verifier: Arc::new(AllowAllVerifier),
            stake: Arc::new(StaticStakeOracle::everyone()),
            height: Arc::new(FixedHeightSource::new(0)),
        }
    }
}

/// Releases transport and key state for a connection.
pub struct TransportReleaser {
    event_loop: Arc<EventLoop>,
    secure: Arc<SecureChannelManager>,
}

impl TransportReleaser {
    pub fn new(event_loop: Arc<EventLoop>, secure: Arc<SecureChannelManager>) -> Self {
        Self { event_loop, secure }
    }
}

impl ConnectionReleaser for TransportReleaser {
    fn release(&self, conn: ConnectionId) {
        let closed = self.event_loop.deregister(conn);
        let forgot_keys = self.secure.remove(conn);
        if closed || forgot_keys {
            debug!(%conn, "connection released");
        }
    }

    fn is_open(&self, conn: ConnectionId) -> bool {
        self.event_loop.is_registered(conn)
    }
}

struct Heartbeat {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

pub struct P2pNetwork {
    config: Arc<P2pConfig>,
    local_addr: SocketAddr,
    event_loop: Arc<EventLoop>,
    buffers: Arc<SocketBuffers>,
    registry: Arc<PeerRegistry>,
    router: Arc<Router>,
    outbound: Arc<Outbound>,
    discovery: Arc<Discovery>,
    domain: Arc<DomainPools>,
    read_pool: StagePool<MsgData>,
    work_pool: StagePool<WorkItem>,
    write_pool: StagePool<MsgData>,
    metrics: NetworkMetrics,
    stake: Arc<dyn StakeOracle>,
    heartbeat: Mutex<Option<Heartbeat>>,
    stopped: AtomicBool,
}

impl P2pNetwork {
    /// Bind the listener, spawn every pool and install discovery handlers.
    ///
    /// Blocks on the reactor while binding, so it must not be called from
    /// a tokio worker thread.
    pub fn start(
        config: P2pConfig,
        identity: Secp256k1KeyPair,
        handle: Handle,
        ports: NetworkPorts,
    ) -> Result<Arc<Self>, P2pError> {
        let config = Arc::new(config);
        let identity = Arc::new(identity);
        let metrics = NetworkMetrics::new().map_err(|e| P2pError::Metrics(e.to_string()))?;
        let buffers = Arc::new(SocketBuffers::new());
        let secure = Arc::new(SecureChannelManager::new());

        let (read_tx, read_rx) = unbounded();
        let (write_tx, write_rx) = unbounded();
        let (work_tx, work_rx) = bounded(config.work_queue_capacity.max(1));

        let event_loop = Arc::new(EventLoop::new(
            handle,
            Arc::clone(&buffers),
            read_tx.clone(),
            write_tx.clone(),
        ));
        let local_addr = event_loop.listen(config.listen_addr)?;

        let self_record = self_record(&config, &identity, local_addr, ports.height.height());
        let releaser = Arc::new(TransportReleaser::new(
            Arc::clone(&event_loop),
            Arc::clone(&secure),
        ));
        let registry = Arc::new(PeerRegistry::new(
            self_record,
            config.max_pulse,
            ports.verifier,
            releaser,
            metrics.clone(),
        ));

        let spawn_err = |e: std::io::Error| P2pError::Spawn(e.to_string());
        let router = Arc::new(Router::new());
        let domain = Arc::new(DomainPools::spawn(&config.threads).map_err(spawn_err)?);
        let outbound = Arc::new(Outbound::new(
            config.protocol_version,
            config.max_frame_size,
            Arc::clone(&event_loop),
            Arc::clone(&buffers),
            Arc::clone(&secure),
        ));
        let pending: Arc<PendingRequests<Reply>> = Arc::new(PendingRequests::new());

        let discovery = Arc::new(Discovery::new(
            Arc::clone(&config),
            identity,
            Arc::clone(&registry),
            Arc::clone(&secure),
            Arc::clone(&outbound),
            Arc::clone(&event_loop),
            Arc::clone(&buffers),
            pending,
            ports.height,
        ));
        discovery.install(&router)?;

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&config),
            Arc::clone(&event_loop),
            Arc::clone(&buffers),
            secure,
            Arc::clone(&router),
            Arc::clone(&domain),
            metrics.clone(),
            Arc::clone(&registry) as Arc<dyn ConnectionReleaser>,
            work_tx.clone(),
        ));

        let d = Arc::clone(&dispatcher);
        let read_pool = StagePool::spawn("Read", config.threads.read, (read_tx, read_rx), move |ev| {
            d.handle_read(ev)
        })
        .map_err(spawn_err)?;
        let d = Arc::clone(&dispatcher);
        let work_pool = StagePool::spawn("Work", config.threads.work, (work_tx, work_rx), move |item| {
            d.handle_work(item)
        })
        .map_err(spawn_err)?;
        let d = dispatcher;
        let write_pool =
            StagePool::spawn("Write", config.threads.write, (write_tx, write_rx), move |ev| {
                d.handle_write(ev)
            })
            .map_err(spawn_err)?;

        let network = Arc::new(Self {
            config: Arc::clone(&config),
            local_addr,
            event_loop,
            buffers,
            registry,
            router,
            outbound,
            discovery,
            domain,
            read_pool,
            work_pool,
            write_pool,
            metrics,
            stake: ports.stake,
            heartbeat: Mutex::new(None),
            stopped: AtomicBool::new(false),
        });

        if let Some(interval) = config.heartbeat_interval() {
            network.start_heartbeat(interval).map_err(spawn_err)?;
        }

        info!(
            %local_addr,
            address = %network.registry.self_node().address(),
            "p2p network started"
        );
        Ok(network)
    }

    fn start_heartbeat(&self, interval: Duration) -> std::io::Result<()> {
        let (stop, stopped) = bounded::<()>(0);
        let discovery = Arc::clone(&self.discovery);
        let thread = Builder::new()
            .name("qcP2pHeartbeat".to_string())
            .spawn(move || {
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            discovery.heartbeat_tick();
                        }
                        recv(stopped) -> _ => break,
                    }
                }
                debug!("heartbeat stopped");
            })?;
        *self.heartbeat.lock() = Some(Heartbeat { stop, thread });
        Ok(())
    }

    // =========================================================================
    // HANDLERS AND SENDING
    // =========================================================================

    /// Install a typed handler on `route`.
    pub fn register<M, F>(&self, route: Route, handler: F) -> Result<(), P2pError>
    where
        M: NetMessage,
        F: Fn(M, ConnectionInfo) + Send + Sync + 'static,
    {
        Ok(self.router.register::<M, F>(route, handler)?)
    }

    /// Queue `message` for the peer at `target`.
    pub fn send<M: NetMessage>(
        &self,
        target: &NodeAddress,
        message: &M,
        options: SendOptions,
    ) -> Result<(), P2pError> {
        let conn = self
            .registry
            .find(target)
            .and_then(|n| n.connection)
            .ok_or(P2pError::NotConnected(*target))?;
        self.send_on(conn, message, options)
    }

    /// Queue `message` on a connection, e.g. to answer a handler's caller.
    pub fn send_on<M: NetMessage>(
        &self,
        conn: ConnectionId,
        message: &M,
        options: SendOptions,
    ) -> Result<(), P2pError> {
        Ok(self.outbound.send(conn, message, options)?)
    }

    /// Send to a fan-out of peers chosen for `content_height`.
    ///
    /// Each send runs as its own job on the broadcast pool. Returns the
    /// number of peers selected.
    pub fn broadcast<M>(
        &self,
        message: M,
        content_height: u64,
        options: SendOptions,
    ) -> Result<usize, P2pError>
    where
        M: NetMessage + Sync,
    {
        let peers = self.registry.snapshot(PeerFilter::All, false);
        let stake = Arc::clone(&self.stake);
        let targets = select_targets(
            &peers,
            content_height,
            self.config.broadcast_height_threshold,
            |address| stake.has_qualifying_stake(address),
            &mut rand::thread_rng(),
        )?;

        let message = Arc::new(message);
        let mut scheduled = 0;
        for conn in targets.iter().filter_map(|n| n.connection) {
            let outbound = Arc::clone(&self.outbound);
            let message = Arc::clone(&message);
            let job = Box::new(move || {
                if let Err(e) = outbound.send(conn, message.as_ref(), options) {
                    debug!(%conn, error = %e, "broadcast send failed");
                }
            });
            match self.domain.submit(Route::Broadcast, job) {
                Ok(()) => scheduled += 1,
                Err(e) => error!(%conn, error = %e, "broadcast job rejected"),
            }
        }
        debug!(type_name = M::TYPE_NAME, scheduled, content_height, "broadcast scheduled");
        Ok(scheduled)
    }

    // =========================================================================
    // PEERS
    // =========================================================================

    pub fn find(&self, address: &NodeAddress) -> Option<Node> {
        self.registry.find(address)
    }

    pub fn snapshot(&self, filter: PeerFilter, must_be_alive: bool) -> Vec<Node> {
        self.registry.snapshot(filter, must_be_alive)
    }

    pub fn self_node(&self) -> Node {
        self.registry.self_node()
    }

    pub fn peer_count(&self) -> usize {
        self.registry.len()
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Bootstrap from the configured seeds.
    pub fn bootstrap(&self) -> usize {
        self.discovery.bootstrap(&self.config.seeds)
    }

    pub fn bootstrap_from(&self, seeds: &[SocketAddr]) -> usize {
        self.discovery.bootstrap(seeds)
    }

    pub fn connect_and_register(&self, addr: SocketAddr) -> Result<Node, P2pError> {
        Ok(self.discovery.connect_and_register(addr)?)
    }

    pub fn sync_nodes(&self) -> Result<usize, P2pError> {
        Ok(self.discovery.sync_nodes()?)
    }

    /// Run one heartbeat round now. Returns evicted peers.
    pub fn heartbeat_tick(&self) -> Vec<Node> {
        self.discovery.heartbeat_tick()
    }

    // =========================================================================
    // INTROSPECTION
    // =========================================================================

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &P2pConfig {
        &self.config
    }

    pub fn metrics(&self) -> &NetworkMetrics {
        &self.metrics
    }

    /// Prometheus text exposition.
    pub fn metrics_text(&self) -> String {
        self.metrics.render()
    }

    pub fn connection_count(&self) -> usize {
        self.event_loop.len()
    }

    // =========================================================================
    // SHUTDOWN
    // =========================================================================

    /// Deregister from peers, stop the heartbeat, close every connection
    /// and join all pools. Idempotent.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(local_addr = %self.local_addr, "p2p network shutting down");

        let notified = self.discovery.deregister();
        if notified > 0 {
            self.wait_for_flush(SHUTDOWN_FLUSH_TIMEOUT);
        }

        if let Some(heartbeat) = self.heartbeat.lock().take() {
            drop(heartbeat.stop);
            if heartbeat.thread.join().is_err() {
                error!("heartbeat thread panicked");
            }
        }

        self.event_loop.shutdown();
        self.read_pool.shutdown();
        self.work_pool.shutdown();
        self.write_pool.shutdown();
        self.domain.shutdown();
        info!("p2p network stopped");
    }

    fn wait_for_flush(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            let drained = self
                .event_loop
                .connection_ids()
                .into_iter()
                .filter_map(|c| self.buffers.get(c))
                .all(|b| b.pending_len() == 0);
            if drained {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

impl Drop for P2pNetwork {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Record advertised for this node.
fn self_record(
    config: &P2pConfig,
    identity: &Secp256k1KeyPair,
    local_addr: SocketAddr,
    height: u64,
) -> NodeRecord {
    let key = identity.public_key();
    NodeRecord {
        address: NodeAddress::from_identity(&key),
        identity_key: key.as_bytes().to_vec(),
        public_addr: config.public_addr.unwrap_or_else(|| advertised(local_addr)),
        listen_addr: local_addr,
        kind: config.node.kind,
        chain_height: height,
        name: config.node.name.clone(),
        logo: config.node.logo.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }
}

/// Unspecified bind addresses are advertised as loopback.
fn advertised(local: SocketAddr) -> SocketAddr {
    if local.ip().is_unspecified() {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), local.port())
    } else {
        local
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advertised_address() {
        let any = SocketAddr::from(([0, 0, 0, 0], 30303));
        assert_eq!(advertised(any), SocketAddr::from(([127, 0, 0, 1], 30303)));

        let fixed = SocketAddr::from(([10, 1, 2, 3], 30303));
        assert_eq!(advertised(fixed), fixed);
    }

    #[test]
    fn test_self_record_uses_identity_and_config() {
        let identity = Secp256k1KeyPair::generate();
        let mut config = P2pConfig::for_testing();
        config.node.name = "alpha".to_string();
        let local = SocketAddr::from(([127, 0, 0, 1], 4000));

        let record = self_record(&config, &identity, local, 42);
        assert!(record.verified_identity().is_some());
        assert_eq!(record.public_addr, local);
        assert_eq!(record.chain_height, 42);
        assert_eq!(record.name, "alpha");
    }
}
