use super::messages::*;
use super::*;
use crate::adapters::{AllowAllVerifier, FixedHeightSource, RecordingReleaser};
use crate::domain::node::ConnectionKind;
use crate::metrics::NetworkMetrics;
use crossbeam_channel::unbounded;
use std::time::Duration;

fn record_for(identity: &Secp256k1KeyPair, port: u16, height: u64) -> NodeRecord {
    let key = identity.public_key();
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    NodeRecord {
        address: NodeAddress::from_identity(&key),
        identity_key: key.as_bytes().to_vec(),
        public_addr: addr,
        listen_addr: addr,
        kind: ConnectionKind::FullNode,
        chain_height: height,
        name: format!("node-{port}"),
        logo: String::new(),
        version: "0.1.0".to_string(),
    }
}

struct Fixture {
    _runtime: tokio::runtime::Runtime,
    discovery: Arc<Discovery>,
    pending: Arc<PendingRequests<Reply>>,
}

fn fixture() -> Fixture {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let config = Arc::new(P2pConfig::for_testing());
    let identity = Secp256k1KeyPair::generate();
    let self_record = record_for(&identity, 1, 0);

    let buffers = Arc::new(SocketBuffers::new());
    let secure = Arc::new(SecureChannelManager::new());
    let (read_tx, _) = unbounded();
    let (write_tx, _) = unbounded();
    let event_loop = Arc::new(EventLoop::new(
        runtime.handle().clone(),
        Arc::clone(&buffers),
        read_tx,
        write_tx,
    ));
    let outbound = Arc::new(Outbound::new(
        config.protocol_version,
        config.max_frame_size,
        Arc::clone(&event_loop),
        Arc::clone(&buffers),
        Arc::clone(&secure),
    ));
    let registry = Arc::new(PeerRegistry::new(
        self_record,
        config.max_pulse,
        Arc::new(AllowAllVerifier),
        Arc::new(RecordingReleaser::new()),
        NetworkMetrics::new().unwrap(),
    ));
    let pending = Arc::new(PendingRequests::new());

    let discovery = Arc::new(Discovery::new(
        config,
        Arc::new(identity),
        registry,
        secure,
        outbound,
        event_loop,
        buffers,
        Arc::clone(&pending),
        Arc::new(FixedHeightSource::new(0)),
    ));

    Fixture {
        _runtime: runtime,
        discovery,
        pending,
    }
}

fn info_from(conn: u64, port: u16) -> ConnectionInfo {
    ConnectionInfo {
        connection: ConnectionId(conn),
        remote: SocketAddr::from(([127, 0, 0, 1], port)),
    }
}

// =============================================================================
// SIGNATURES
// =============================================================================

#[test]
fn test_register_request_signature_roundtrip() {
    let identity = Secp256k1KeyPair::generate();
    let request =
        RegisterNodeRequest::signed(&identity, Uuid::new_v4(), record_for(&identity, 1, 5)).unwrap();
    assert!(request.verify().is_ok());

    let mut tampered = request.clone();
    tampered.record.chain_height = 6;
    assert!(matches!(
        tampered.verify(),
        Err(DiscoveryError::InvalidSignature(_))
    ));

    let mut reused = request;
    reused.msg_id = Uuid::new_v4();
    assert!(reused.verify().is_err());
}

#[test]
fn test_signature_by_other_identity_rejected() {
    let identity = Secp256k1KeyPair::generate();
    let impostor = Secp256k1KeyPair::generate();
    let response = RegisterNodeResponse::signed(
        &impostor,
        Uuid::new_v4(),
        true,
        record_for(&identity, 1, 0),
    )
    .unwrap();
    assert!(matches!(
        response.verify(),
        Err(DiscoveryError::InvalidSignature(_))
    ));
}

#[test]
fn test_address_must_match_identity() {
    let identity = Secp256k1KeyPair::generate();
    let mut record = record_for(&identity, 1, 0);
    record.address = NodeAddress([9; 32]);
    let message = DeregisterNode::signed(&identity, record).unwrap();
    assert!(matches!(message.verify(), Err(DiscoveryError::IdentityMismatch)));
}

#[test]
fn test_node_list_signature_covers_nodes() {
    let identity = Secp256k1KeyPair::generate();
    let other = Secp256k1KeyPair::generate();
    let mut list = NodeListResponse::signed(
        &identity,
        Uuid::new_v4(),
        record_for(&identity, 1, 0),
        vec![record_for(&other, 2, 0)],
    )
    .unwrap();
    assert!(list.verify().is_ok());

    list.nodes[0].public_addr = SocketAddr::from(([6, 6, 6, 6], 2));
    assert!(list.verify().is_err());
}

#[test]
fn test_malformed_signature_bytes() {
    let identity = Secp256k1KeyPair::generate();
    let mut message = DeregisterNode::signed(&identity, record_for(&identity, 1, 0)).unwrap();
    message.signature.truncate(10);
    assert!(matches!(
        message.verify(),
        Err(DiscoveryError::InvalidSignature(_))
    ));
}

// =============================================================================
// MERGE
// =============================================================================

#[test]
fn test_merge_keeps_highest_height() {
    let a = Secp256k1KeyPair::generate();
    let b = Secp256k1KeyPair::generate();

    let merged = merge_records(vec![
        vec![record_for(&a, 1, 10), record_for(&b, 2, 3)],
        vec![record_for(&a, 1, 12)],
        vec![record_for(&a, 1, 11), record_for(&b, 2, 1)],
    ]);

    assert_eq!(merged.len(), 2);
    assert_eq!(merged[0].address, NodeAddress::from_identity(&a.public_key()));
    assert_eq!(merged[0].chain_height, 12);
    assert_eq!(merged[1].chain_height, 3);
}

#[test]
fn test_merge_empty() {
    assert!(merge_records(Vec::<Vec<NodeRecord>>::new()).is_empty());
}

// =============================================================================
// NODE LIST COLLECTION
// =============================================================================

#[test]
fn test_node_list_only_accepted_from_asked_connections() {
    let f = fixture();
    let id = f.pending.create(2, 2, Duration::from_secs(5));
    f.discovery
        .list_requests
        .lock()
        .insert(id, HashSet::from([ConnectionId(1)]));

    let peer = Secp256k1KeyPair::generate();
    let list = NodeListResponse::signed(&peer, id, record_for(&peer, 2, 0), Vec::new()).unwrap();

    f.discovery.on_node_list_response(list.clone(), info_from(2, 9002));
    f.discovery.on_node_list_response(list, info_from(1, 9001));

    let collected = f.pending.complete(id).unwrap();
    assert_eq!(collected.len(), 1);
    assert_eq!(collected[0].0.port(), 9001);
}

#[test]
fn test_node_list_for_closed_round_dropped() {
    let f = fixture();
    let id = f.pending.create(1, 1, Duration::from_secs(5));

    let peer = Secp256k1KeyPair::generate();
    let list = NodeListResponse::signed(&peer, id, record_for(&peer, 2, 0), Vec::new()).unwrap();
    f.discovery.on_node_list_response(list, info_from(1, 9001));

    assert!(f.pending.complete(id).unwrap().is_empty());
}

#[test]
fn test_sync_without_peers_opens_no_round() {
    let f = fixture();
    assert_eq!(f.discovery.sync_nodes().unwrap(), 0);
    assert!(f.discovery.list_requests.lock().is_empty());
    assert!(f.pending.is_empty());
}
