use super::*;
use std::sync::Arc;
use std::thread;

fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, 1], port))
}

// =============================================================================
// QUORUM
// =============================================================================

#[test]
fn test_three_of_five_reaches_quorum() {
    let pending = Arc::new(PendingRequests::<u32>::new());
    let id = pending.create(5, 3, Duration::from_secs(5));

    let producer = {
        let pending = Arc::clone(&pending);
        thread::spawn(move || {
            for port in 1..=3 {
                assert!(pending.add_response(id, addr(port), u32::from(port)));
            }
        })
    };

    let started = Instant::now();
    let outcome = pending.wait(id).unwrap();
    producer.join().unwrap();

    assert!(!outcome.timed_out);
    assert_eq!(outcome.responses.len(), 3);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!pending.is_pending(id));
}

#[test]
fn test_two_of_five_times_out_with_partial_data() {
    let pending = PendingRequests::<u32>::new();
    let id = pending.create(5, 3, Duration::from_millis(50));

    assert!(pending.add_response(id, addr(1), 1));
    assert!(pending.add_response(id, addr(2), 2));

    let outcome = pending.wait(id).unwrap();

    assert!(outcome.timed_out);
    assert!(!outcome.is_quorum());
    assert_eq!(outcome.responses.len(), 2);
}

#[test]
fn test_responses_before_wait_are_kept() {
    let pending = PendingRequests::<&str>::new();
    let id = pending.create(1, 1, Duration::from_secs(1));
    assert!(pending.add_response(id, addr(1), "pong"));

    let outcome = pending.wait(id).unwrap();
    assert_eq!(outcome.responses, vec![(addr(1), "pong")]);
    assert!(!outcome.timed_out);
}

// =============================================================================
// DEDUPLICATION AND LIFECYCLE
// =============================================================================

#[test]
fn test_duplicate_remote_ignored() {
    let pending = PendingRequests::<u32>::new();
    let id = pending.create(3, 2, Duration::from_millis(30));

    assert!(pending.add_response(id, addr(1), 1));
    assert!(!pending.add_response(id, addr(1), 2));

    let outcome = pending.wait(id).unwrap();
    assert!(outcome.timed_out);
    assert_eq!(outcome.responses, vec![(addr(1), 1)]);
}

#[test]
fn test_same_ip_different_port_counts_separately() {
    let pending = PendingRequests::<u32>::new();
    let id = pending.create(2, 2, Duration::from_secs(1));
    assert!(pending.add_response(id, addr(1), 1));
    assert!(pending.add_response(id, addr(2), 2));
    assert!(!pending.wait(id).unwrap().timed_out);
}

#[test]
fn test_unknown_and_finished_ids() {
    let pending = PendingRequests::<u32>::new();
    let unknown = Uuid::new_v4();
    assert!(!pending.add_response(unknown, addr(1), 1));
    assert_eq!(
        pending.wait(unknown),
        Err(CorrelationError::UnknownRequest(unknown))
    );

    let id = pending.create(1, 1, Duration::from_secs(1));
    assert!(pending.add_response(id, addr(1), 1));
    pending.wait(id).unwrap();
    assert!(!pending.add_response(id, addr(2), 2));
}

#[test]
fn test_complete_returns_collected_and_cancels_waiter() {
    let pending = Arc::new(PendingRequests::<u32>::new());
    let id = pending.create(5, 5, Duration::from_secs(5));
    pending.add_response(id, addr(1), 1);

    let waiter = {
        let pending = Arc::clone(&pending);
        thread::spawn(move || pending.wait(id))
    };
    thread::sleep(Duration::from_millis(20));

    assert_eq!(pending.complete(id), Some(vec![(addr(1), 1)]));
    assert!(waiter.join().unwrap().is_err());
    assert!(pending.is_empty());
}

#[test]
fn test_extra_responses_beyond_expected_rejected() {
    let pending = PendingRequests::<u32>::new();
    let id = pending.create(1, 1, Duration::from_secs(1));
    assert!(pending.add_response(id, addr(1), 1));
    assert!(!pending.add_response(id, addr(2), 2));
}

#[test]
fn test_zero_min_returns_immediately() {
    let pending = PendingRequests::<u32>::new();
    let id = pending.create(0, 3, Duration::from_secs(10));
    let started = Instant::now();
    let outcome = pending.wait(id).unwrap();
    assert!(!outcome.timed_out);
    assert!(started.elapsed() < Duration::from_secs(1));
}
