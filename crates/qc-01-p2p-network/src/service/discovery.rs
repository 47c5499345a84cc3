//! # Discovery Protocol
//!
//! Handshake, registration, peer-list gossip, heartbeat and leave, all on
//! the network-control route.
//!
//! ```text
//! Initiator                                  Responder
//!   connect ------------------------------------>  accept
//!   KeyExchangeRequest (plain) ----------------->  respond, store key
//!   <----------------- KeyExchangeResponse (plain)
//!   complete, store key
//!   RegisterNodeRequest (sealed, signed) ------->  verify, admit
//!   <--------- RegisterNodeResponse (sealed, signed)
//!   verify, admit
//! ```
//!
//! Request/response pairs are matched through [`PendingRequests`]. The
//! blocking operations here (`connect_and_register`, `bootstrap`,
//! `sync_nodes`) must run on a thread that is neither a tokio worker nor a
//! network pool worker, since those threads deliver the replies.

pub mod messages;

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use shared_crypto::Secp256k1KeyPair;
use tracing::{debug, info, warn};
use uuid::Uuid;

use self::messages::{
    DeregisterNode, NodeListRequest, NodeListResponse, PingRequest, PingResponse,
    RegisterNodeRequest, RegisterNodeResponse, Reply,
};
use crate::config::P2pConfig;
use crate::dispatch::{Outbound, Route, Router, SendOptions};
use crate::domain::correlation::{MsgId, PendingRequests};
use crate::domain::errors::{DiscoveryError, DispatchError, ErrorClass};
use crate::domain::node::{ConnectionId, ConnectionInfo, Node, NodeAddress, NodeRecord, PeerFilter};
use crate::domain::socket_buf::SocketBuffers;
use crate::ports::ChainHeightSource;
use crate::secure::{KeyExchangeRequest, KeyExchangeResponse, SecureChannelManager};
use crate::service::registry::PeerRegistry;
use crate::transport::EventLoop;

pub struct Discovery {
    config: Arc<P2pConfig>,
    identity: Arc<Secp256k1KeyPair>,
    registry: Arc<PeerRegistry>,
    secure: Arc<SecureChannelManager>,
    outbound: Arc<Outbound>,
    event_loop: Arc<EventLoop>,
    buffers: Arc<SocketBuffers>,
    pending: Arc<PendingRequests<Reply>>,
    height: Arc<dyn ChainHeightSource>,
    /// Connections asked for their node list, per open request
    list_requests: Mutex<HashMap<MsgId, HashSet<ConnectionId>>>,
}

impl Discovery {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<P2pConfig>,
        identity: Arc<Secp256k1KeyPair>,
        registry: Arc<PeerRegistry>,
        secure: Arc<SecureChannelManager>,
        outbound: Arc<Outbound>,
        event_loop: Arc<EventLoop>,
        buffers: Arc<SocketBuffers>,
        pending: Arc<PendingRequests<Reply>>,
        height: Arc<dyn ChainHeightSource>,
    ) -> Self {
        Self {
            config,
            identity,
            registry,
            secure,
            outbound,
            event_loop,
            buffers,
            pending,
            height,
            list_requests: Mutex::new(HashMap::new()),
        }
    }

    /// Local record with the current chain height.
    pub fn self_record(&self) -> NodeRecord {
        self.registry.set_self_height(self.height.height());
        self.registry.self_node().record
    }

    // =========================================================================
    // INITIATOR SIDE
    // =========================================================================

    /// Run the key exchange on a fresh outbound connection.
    pub fn handshake(&self, conn: ConnectionId) -> Result<(), DiscoveryError> {
        let id = self.pending.create(1, 1, self.config.handshake_timeout());
        let request = self.secure.initiate(conn, id);
        if let Err(e) = self.outbound.send_plain(conn, &request) {
            self.pending.complete(id);
            return Err(e.into());
        }

        let outcome = self.pending.wait(id)?;
        if outcome.timed_out || !self.secure.has_key(conn) {
            return Err(DiscoveryError::HandshakeTimeout(conn));
        }
        Ok(())
    }

    /// Ask the peer on `conn` to admit us and admit it in turn.
    pub fn register(&self, conn: ConnectionId, remote: SocketAddr) -> Result<Node, DiscoveryError> {
        let id = self.pending.create(1, 1, self.config.handshake_timeout());
        let request = RegisterNodeRequest::signed(&self.identity, id, self.self_record())
            .map_err(DispatchError::from)?;
        if let Err(e) = self.outbound.send(conn, &request, SendOptions::default()) {
            self.pending.complete(id);
            return Err(e.into());
        }

        let outcome = self.pending.wait(id)?;
        let response = outcome
            .responses
            .into_iter()
            .find_map(|(_, reply)| match reply {
                Reply::Register(r) => Some(r),
                _ => None,
            })
            .ok_or(DiscoveryError::NoResponse(remote))?;

        response.verify()?;
        if !response.accepted {
            return Err(DiscoveryError::Rejected(remote));
        }

        let node = Node::new(response.record).with_connection(conn);
        self.mark_transient(conn, &node.record);
        self.registry.add(node.clone())?;
        Ok(node)
    }

    /// Connect, handshake and register. The connection is released on any
    /// failure.
    pub fn connect_and_register(&self, addr: SocketAddr) -> Result<Node, DiscoveryError> {
        let conn = self.event_loop.connect(addr, self.config.connect_timeout())?;
        let result = self
            .handshake(conn)
            .and_then(|()| self.register(conn, addr));

        match result {
            Ok(node) => {
                info!(peer = %node.address(), %addr, "registered with peer");
                Ok(node)
            }
            Err(e) => {
                warn!(%addr, %conn, error = %e, "registration failed");
                self.registry.release_connection(conn);
                Err(e)
            }
        }
    }

    /// Register with every seed, then pull peer lists.
    ///
    /// Returns the number of peers admitted.
    pub fn bootstrap(&self, seeds: &[SocketAddr]) -> usize {
        let mut admitted = 0;
        for seed in seeds {
            if self.is_self_addr(*seed) {
                continue;
            }
            match self.connect_and_register(*seed) {
                Ok(_) => admitted += 1,
                Err(e) => warn!(%seed, error = %e, "seed unreachable"),
            }
        }

        if admitted > 0 {
            match self.sync_nodes() {
                Ok(synced) => admitted += synced,
                Err(e) => warn!(error = %e, "peer sync failed"),
            }
        }
        info!(admitted, peers = self.registry.len(), "bootstrap finished");
        admitted
    }

    /// Pull peer lists from every connected peer and connect to newcomers.
    ///
    /// Returns the number of peers admitted.
    pub fn sync_nodes(&self) -> Result<usize, DiscoveryError> {
        let peers = self.registry.snapshot(PeerFilter::Connected, false);
        if peers.is_empty() {
            return Ok(0);
        }

        let min_required = self.config.min_sync_responses.min(peers.len());
        let id = self
            .pending
            .create(peers.len(), min_required, self.config.sync_timeout());
        let asked: HashSet<ConnectionId> = peers.iter().filter_map(|p| p.connection).collect();
        self.list_requests.lock().insert(id, asked.clone());

        let request = NodeListRequest { msg_id: id };
        for conn in asked {
            if let Err(e) = self.outbound.send(conn, &request, SendOptions::default()) {
                debug!(%conn, error = %e, "node list request not sent");
            }
        }

        let outcome = self.pending.wait(id);
        self.list_requests.lock().remove(&id);
        let outcome = outcome?;
        if outcome.timed_out {
            debug!(
                responses = outcome.responses.len(),
                min_required, "node list quorum not reached, using partial result"
            );
        }

        let lists = outcome.responses.into_iter().filter_map(|(from, reply)| match reply {
            Reply::NodeList(list) => match list.verify() {
                Ok(()) => Some(list.nodes),
                Err(e) => {
                    warn!(%from, error = %e, "discarding unsigned node list");
                    None
                }
            },
            _ => None,
        });
        let candidates = merge_records(lists);

        let self_address = self.registry.self_node().address();
        let mut admitted = 0;
        for record in candidates {
            if self.registry.len() >= self.config.max_peers {
                break;
            }
            if record.address == self_address || self.registry.contains(&record.address) {
                continue;
            }
            if record.verified_identity().is_none() {
                continue;
            }
            if self.connect_and_register(record.public_addr).is_ok() {
                admitted += 1;
            }
        }
        Ok(admitted)
    }

    /// Evict silent peers, then ping the rest.
    pub fn heartbeat_tick(&self) -> Vec<Node> {
        let height = self.height.height();
        self.registry.set_self_height(height);

        let evicted = self.registry.decay_pulses();
        for node in &evicted {
            info!(peer = %node.address(), "peer evicted after missed heartbeats");
        }

        let ping = PingRequest {
            msg_id: Uuid::new_v4(),
            height,
        };
        for peer in self.registry.snapshot(PeerFilter::Connected, false) {
            if let Some(conn) = peer.connection {
                if let Err(e) = self.outbound.send(conn, &ping, SendOptions::default()) {
                    debug!(peer = %peer.address(), error = %e, "ping not sent");
                }
            }
        }
        evicted
    }

    /// Announce departure to every connected peer.
    pub fn deregister(&self) -> usize {
        let message = match DeregisterNode::signed(&self.identity, self.self_record()) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "failed to sign deregistration");
                return 0;
            }
        };

        self.registry
            .snapshot(PeerFilter::Connected, false)
            .iter()
            .filter_map(|peer| peer.connection)
            .filter(|conn| self.outbound.send(*conn, &message, SendOptions::default()).is_ok())
            .count()
    }

    // =========================================================================
    // HANDLERS
    // =========================================================================

    /// Install every discovery handler on the network route.
    pub fn install(self: &Arc<Self>, router: &Router) -> Result<(), DispatchError> {
        let this = Arc::clone(self);
        router.register::<KeyExchangeRequest, _>(Route::Network, move |m, info| {
            this.on_key_exchange_request(m, info)
        })?;
        let this = Arc::clone(self);
        router.register::<KeyExchangeResponse, _>(Route::Network, move |m, info| {
            this.on_key_exchange_response(m, info)
        })?;
        let this = Arc::clone(self);
        router.register::<RegisterNodeRequest, _>(Route::Network, move |m, info| {
            this.on_register_request(m, info)
        })?;
        let this = Arc::clone(self);
        router.register::<RegisterNodeResponse, _>(Route::Network, move |m, info| {
            this.on_register_response(m, info)
        })?;
        let this = Arc::clone(self);
        router.register::<NodeListRequest, _>(Route::Network, move |m, info| {
            this.on_node_list_request(m, info)
        })?;
        let this = Arc::clone(self);
        router.register::<NodeListResponse, _>(Route::Network, move |m, info| {
            this.on_node_list_response(m, info)
        })?;
        let this = Arc::clone(self);
        router.register::<PingRequest, _>(Route::Network, move |m, info| this.on_ping(m, info))?;
        let this = Arc::clone(self);
        router.register::<PingResponse, _>(Route::Network, move |m, info| this.on_pong(m, info))?;
        let this = Arc::clone(self);
        router.register::<DeregisterNode, _>(Route::Network, move |m, info| {
            this.on_deregister(m, info)
        })?;
        Ok(())
    }

    fn on_key_exchange_request(&self, request: KeyExchangeRequest, info: ConnectionInfo) {
        let conn = info.connection;
        let result = self
            .secure
            .respond(conn, &request)
            .map_err(DispatchError::from)
            .and_then(|response| self.outbound.send_plain(conn, &response));
        match result {
            Ok(()) => {}
            Err(e) if e.class() == ErrorClass::ConnectionFatal => {
                warn!(%conn, remote = %info.remote, error = %e, "handshake failed");
                self.registry.release_connection(conn);
            }
            Err(e) => warn!(%conn, remote = %info.remote, error = %e, "handshake request ignored"),
        }
    }

    fn on_key_exchange_response(&self, response: KeyExchangeResponse, info: ConnectionInfo) {
        let conn = info.connection;
        if let Err(e) = self.secure.complete(conn, &response) {
            warn!(%conn, remote = %info.remote, error = %e, "handshake failed");
            self.registry.release_connection(conn);
            return;
        }
        self.pending
            .add_response(response.correlation_id, info.remote, Reply::Handshake(response));
    }

    fn on_register_request(&self, request: RegisterNodeRequest, info: ConnectionInfo) {
        let conn = info.connection;
        if let Err(e) = request.verify() {
            warn!(%conn, remote = %info.remote, error = %e, "registration signature rejected");
            self.registry.release_connection(conn);
            return;
        }

        let node = Node::new(request.record).with_connection(conn);
        let address = node.address();
        self.mark_transient(conn, &node.record);
        let accepted = match self.registry.add(node) {
            Ok(()) => true,
            Err(e) => {
                debug!(peer = %address, error = %e, "registration refused");
                false
            }
        };

        let sent = RegisterNodeResponse::signed(&self.identity, request.msg_id, accepted, self.self_record())
            .map_err(DispatchError::from)
            .and_then(|response| self.outbound.send(conn, &response, SendOptions::default()));
        if let Err(e) = sent {
            warn!(%conn, error = %e, "registration response not sent");
        }
    }

    fn on_register_response(&self, response: RegisterNodeResponse, info: ConnectionInfo) {
        self.pending
            .add_response(response.msg_id, info.remote, Reply::Register(response));
    }

    fn on_node_list_request(&self, request: NodeListRequest, info: ConnectionInfo) {
        let nodes = self
            .registry
            .snapshot(PeerFilter::All, true)
            .into_iter()
            .map(|n| n.record)
            .collect();
        let sent = NodeListResponse::signed(&self.identity, request.msg_id, self.self_record(), nodes)
            .map_err(DispatchError::from)
            .and_then(|response| {
                self.outbound
                    .send(info.connection, &response, SendOptions::default().compressed())
            });
        if let Err(e) = sent {
            warn!(conn = %info.connection, error = %e, "node list not sent");
        }
    }

    fn on_node_list_response(&self, response: NodeListResponse, info: ConnectionInfo) {
        let asked = self
            .list_requests
            .lock()
            .get(&response.msg_id)
            .is_some_and(|conns| conns.contains(&info.connection));
        if !asked {
            debug!(conn = %info.connection, "unsolicited node list dropped");
            return;
        }
        self.pending
            .add_response(response.msg_id, info.remote, Reply::NodeList(response));
    }

    fn on_ping(&self, ping: PingRequest, info: ConnectionInfo) {
        if let Some(node) = self.registry.find_by_connection(info.connection) {
            self.registry.refresh(&node.address(), ping.height, None);
        }
        let pong = PingResponse {
            msg_id: ping.msg_id,
            record: self.self_record(),
        };
        if let Err(e) = self.outbound.send(info.connection, &pong, SendOptions::default()) {
            debug!(conn = %info.connection, error = %e, "pong not sent");
        }
    }

    fn on_pong(&self, pong: PingResponse, info: ConnectionInfo) {
        let Some(node) = self.registry.find_by_connection(info.connection) else {
            return;
        };
        let height = pong.record.chain_height;
        let record = (pong.record.address == node.address()).then_some(pong.record);
        self.registry.refresh(&node.address(), height, record);
    }

    fn on_deregister(&self, message: DeregisterNode, info: ConnectionInfo) {
        if let Err(e) = message.verify() {
            warn!(conn = %info.connection, error = %e, "deregistration signature rejected");
            return;
        }
        match self.registry.find_by_connection(info.connection) {
            Some(node) if node.address() == message.record.address => {
                info!(peer = %node.address(), "peer left");
                self.registry.delete(&node.address());
            }
            _ => debug!(conn = %info.connection, "deregistration for unknown peer"),
        }
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn mark_transient(&self, conn: ConnectionId, record: &NodeRecord) {
        if record.kind.is_transient() {
            if let Some(buf) = self.buffers.get(conn) {
                buf.set_transient(true);
            }
        }
    }

    fn is_self_addr(&self, addr: SocketAddr) -> bool {
        let me = self.registry.self_node().record;
        addr == me.public_addr || addr == me.listen_addr
    }
}

/// Merge peer lists, keeping the highest reported chain height per address.
pub fn merge_records<I>(lists: I) -> Vec<NodeRecord>
where
    I: IntoIterator<Item = Vec<NodeRecord>>,
{
    let mut merged: HashMap<NodeAddress, NodeRecord> = HashMap::new();
    for record in lists.into_iter().flatten() {
        match merged.get(&record.address) {
            Some(existing) if existing.chain_height >= record.chain_height => {}
            _ => {
                merged.insert(record.address, record);
            }
        }
    }
    let mut records: Vec<NodeRecord> = merged.into_values().collect();
    records.sort_by(|a, b| b.chain_height.cmp(&a.chain_height));
    records
}

#[cfg(test)]
mod tests;
