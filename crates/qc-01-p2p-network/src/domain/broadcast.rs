//! # Broadcast Target Selection
//!
//! - Refuse outright if more than 25% of known peers are disconnected.
//! - Early content (below the height threshold): every connected peer when
//!   there are at most [`BROADCAST_THRESHOLD`], else a random 30.
//! - Mature content: only staked peers. Fan-out is 30 for networks under
//!   30² nodes and the positive root of `x² + x - N = 0` above that, so
//!   each hop multiplies reach by roughly `x + 1`.

use rand::seq::SliceRandom;
use rand::Rng;

use super::errors::BroadcastError;
use super::node::{Node, NodeAddress};

/// Fixed fan-out for small networks and early content.
pub const BROADCAST_THRESHOLD: usize = 30;

/// Refuse to broadcast above this disconnected share.
pub const MAX_DISCONNECTED_RATIO: f64 = 0.25;

/// Fan-out for a network of `network_size` nodes.
pub fn fanout_size(network_size: usize) -> usize {
    if network_size < BROADCAST_THRESHOLD * BROADCAST_THRESHOLD {
        return BROADCAST_THRESHOLD;
    }
    let n = network_size as f64;
    ((-1.0 + (1.0 + 4.0 * n).sqrt()) / 2.0).ceil() as usize
}

/// Share of `peers` without a live connection.
pub fn disconnected_ratio(peers: &[Node]) -> f64 {
    if peers.is_empty() {
        return 0.0;
    }
    let disconnected = peers.iter().filter(|p| !p.is_connected()).count();
    disconnected as f64 / peers.len() as f64
}

/// Pick broadcast targets from the full peer list.
pub fn select_targets<R, S>(
    peers: &[Node],
    content_height: u64,
    height_threshold: u64,
    has_stake: S,
    rng: &mut R,
) -> Result<Vec<Node>, BroadcastError>
where
    R: Rng + ?Sized,
    S: Fn(&NodeAddress) -> bool,
{
    if disconnected_ratio(peers) > MAX_DISCONNECTED_RATIO {
        return Err(BroadcastError::NetworkFragmented {
            disconnected: peers.iter().filter(|p| !p.is_connected()).count(),
            total: peers.len(),
        });
    }

    let connected: Vec<&Node> = peers.iter().filter(|p| p.is_connected()).collect();

    let (pool, size) = if content_height < height_threshold {
        (connected, BROADCAST_THRESHOLD)
    } else {
        let eligible: Vec<&Node> = connected
            .into_iter()
            .filter(|p| has_stake(&p.address()))
            .collect();
        (eligible, fanout_size(peers.len()))
    };

    if pool.len() <= size {
        return Ok(pool.into_iter().cloned().collect());
    }
    Ok(pool.choose_multiple(rng, size).map(|n| (*n).clone()).collect())
}
