use super::*;
use crate::adapters::{AllowAllVerifier, AllowListVerifier, RecordingReleaser};
use crate::domain::node::ConnectionKind;

fn record(byte: u8) -> NodeRecord {
    let addr = format!("10.0.0.{byte}:30303").parse().unwrap();
    NodeRecord {
        address: NodeAddress([byte; 32]),
        identity_key: vec![byte; 33],
        public_addr: addr,
        listen_addr: addr,
        kind: ConnectionKind::FullNode,
        chain_height: 0,
        name: format!("node-{byte}"),
        logo: String::new(),
        version: "1".to_string(),
    }
}

fn registry_with(
    verifier: Arc<dyn AdmissionVerifier>,
) -> (PeerRegistry, Arc<RecordingReleaser>, NetworkMetrics) {
    let releaser = Arc::new(RecordingReleaser::new());
    let metrics = NetworkMetrics::new().unwrap();
    let registry = PeerRegistry::new(record(0), 3, verifier, releaser.clone(), metrics.clone());
    (registry, releaser, metrics)
}

fn registry() -> (PeerRegistry, Arc<RecordingReleaser>, NetworkMetrics) {
    registry_with(Arc::new(AllowAllVerifier))
}

fn connected(byte: u8) -> Node {
    Node::new(record(byte)).with_connection(ConnectionId(u64::from(byte)))
}

// =============================================================================
// ADD / UPDATE / DELETE
// =============================================================================

#[test]
fn test_add_sets_full_pulse_and_gauge() {
    let (registry, _, metrics) = registry();
    registry.add(connected(1)).unwrap();

    let node = registry.find(&NodeAddress([1; 32])).unwrap();
    assert_eq!(node.pulse, 3);
    assert_eq!(registry.len(), 1);
    assert_eq!(metrics.peers(), 1);
}

#[test]
fn test_add_rejections() {
    let (registry, _, _) = registry();
    registry.add(connected(1)).unwrap();

    assert_eq!(
        registry.add(connected(1)),
        Err(RegistryError::AlreadyRegistered(NodeAddress([1; 32])))
    );
    assert_eq!(registry.add(connected(0)), Err(RegistryError::SelfNode));

    let (gated, _, _) = registry_with(Arc::new(AllowListVerifier::new([NodeAddress([5; 32])])));
    assert_eq!(
        gated.add(connected(4)),
        Err(RegistryError::AdmissionDenied(NodeAddress([4; 32])))
    );
    assert!(gated.add(connected(5)).is_ok());
}

#[test]
fn test_update_keeps_pulse() {
    let (registry, _, _) = registry();
    registry.add(connected(1)).unwrap();
    registry.decay_pulses();

    let mut changed = connected(1);
    changed.record.name = "renamed".to_string();
    registry.update(changed).unwrap();

    let node = registry.find(&NodeAddress([1; 32])).unwrap();
    assert_eq!(node.record.name, "renamed");
    assert_eq!(node.pulse, 2);

    assert_eq!(
        registry.update(connected(9)),
        Err(RegistryError::NotFound(NodeAddress([9; 32])))
    );
}

#[test]
fn test_delete_releases_once() {
    let (registry, releaser, metrics) = registry();
    registry.add(connected(1)).unwrap();
    registry.add(Node::new(record(2))).unwrap();

    assert!(registry.delete(&NodeAddress([1; 32])).is_some());
    assert!(registry.delete(&NodeAddress([1; 32])).is_none());
    assert!(registry.delete(&NodeAddress([2; 32])).is_some());

    assert_eq!(releaser.released(), vec![ConnectionId(1)]);
    assert_eq!(metrics.peers(), 0);
}

#[test]
fn test_release_connection_paths() {
    let (registry, releaser, _) = registry();
    registry.add(connected(1)).unwrap();

    let removed = registry.release_connection(ConnectionId(1)).unwrap();
    assert_eq!(removed.address(), NodeAddress([1; 32]));
    assert!(registry.is_empty());

    // Not owned by any peer: released directly
    assert!(registry.release_connection(ConnectionId(42)).is_none());
    assert_eq!(releaser.released(), vec![ConnectionId(1), ConnectionId(42)]);
}

#[test]
fn test_add_refuses_released_connection() {
    let (registry, releaser, metrics) = registry();

    // Peer hung up before its registration was processed
    assert!(registry.release_connection(ConnectionId(5)).is_none());
    assert_eq!(
        registry.add(connected(5)),
        Err(RegistryError::ConnectionClosed(ConnectionId(5)))
    );

    assert!(registry.is_empty());
    assert_eq!(metrics.peers(), 0);
    assert_eq!(releaser.count(ConnectionId(5)), 1);

    // Records without a connection are unaffected
    registry.add(Node::new(record(5))).unwrap();
}

#[test]
fn test_concurrent_release_and_add_never_leave_dead_peer() {
    for _ in 0..200 {
        let (registry, releaser, _) = registry();
        std::thread::scope(|s| {
            s.spawn(|| registry.release_connection(ConnectionId(1)));
            s.spawn(|| registry.add(connected(1)));
        });

        // Either order ends with the peer gone and one release
        assert!(registry.find(&NodeAddress([1; 32])).is_none());
        assert!(!releaser.is_open(ConnectionId(1)));
        assert_eq!(releaser.count(ConnectionId(1)), 1);
    }
}

// =============================================================================
// QUERIES
// =============================================================================

#[test]
fn test_snapshot_filters() {
    let (registry, _, _) = registry();
    registry.add(connected(1)).unwrap();
    registry.add(Node::new(record(2))).unwrap();
    let mut mobile = connected(3);
    mobile.record.kind = ConnectionKind::Mobile;
    registry.add(mobile).unwrap();

    assert_eq!(registry.snapshot(PeerFilter::All, false).len(), 3);
    assert_eq!(registry.snapshot(PeerFilter::Connected, false).len(), 2);
    assert_eq!(
        registry
            .snapshot(PeerFilter::Kind(ConnectionKind::Mobile), false)
            .len(),
        1
    );
    assert_eq!(
        registry.find_by_connection(ConnectionId(3)).unwrap().address(),
        NodeAddress([3; 32])
    );
    assert!((registry.disconnected_ratio() - 1.0 / 3.0).abs() < 1e-9);
}

#[test]
fn test_self_node_updates() {
    let (registry, _, _) = registry();
    let mut changed = record(0);
    changed.name = "me".to_string();
    changed.address = NodeAddress([7; 32]);
    registry.update_self(changed);
    registry.set_self_height(99);

    let me = registry.self_node();
    assert_eq!(me.record.name, "me");
    assert_eq!(me.address(), NodeAddress([0; 32]));
    assert_eq!(me.record.chain_height, 99);
}

// =============================================================================
// LIVENESS
// =============================================================================

#[test]
fn test_pulse_eviction_releases_exactly_once() {
    let (registry, releaser, _) = registry();
    registry.add(connected(1)).unwrap();
    registry.add(connected(2)).unwrap();

    assert!(registry.decay_pulses().is_empty());
    assert!(registry.refresh(&NodeAddress([2; 32]), 10, None));
    assert!(registry.decay_pulses().is_empty());

    let evicted = registry.decay_pulses();
    assert_eq!(evicted.len(), 1);
    assert_eq!(evicted[0].address(), NodeAddress([1; 32]));
    assert_eq!(releaser.count(ConnectionId(1)), 1);

    // Alive-only snapshot excludes nothing now; the survivor has pulse 1
    assert_eq!(registry.snapshot(PeerFilter::All, true).len(), 1);

    registry.decay_pulses();
    assert!(registry.is_empty());
    assert_eq!(releaser.count(ConnectionId(1)), 1);
    assert_eq!(releaser.count(ConnectionId(2)), 1);
}

#[test]
fn test_refresh_updates_metadata() {
    let (registry, _, _) = registry();
    registry.add(connected(1)).unwrap();

    let mut newer = record(1);
    newer.name = "fresh".to_string();
    newer.chain_height = 50;
    assert!(registry.refresh(&NodeAddress([1; 32]), 40, Some(newer)));

    let node = registry.find(&NodeAddress([1; 32])).unwrap();
    assert_eq!(node.record.name, "fresh");
    assert_eq!(node.record.chain_height, 50);
    assert!(!registry.refresh(&NodeAddress([9; 32]), 1, None));
}
