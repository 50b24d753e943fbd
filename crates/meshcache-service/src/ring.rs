//! Consistent hashing over the live membership.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use sha2::{Digest, Sha256};

/// Ring shape and rebalance parameters.
///
/// The defaults are tuned for clusters of a handful of nodes: 50 virtual
/// nodes smooth the key distribution without making membership changes
/// expensive.
#[derive(Clone, Copy, Debug)]
pub struct RingConfig {
    /// Virtual nodes placed per physical node.
    pub replicas: usize,
    /// Lower bound a rebalance may shrink a node's replicas to.
    pub min_replicas: usize,
    /// Upper bound a rebalance may grow a node's replicas to.
    pub max_replicas: usize,
    /// Relative traffic imbalance tolerated before a rebalance would fire.
    pub rebalance_threshold: f64,
}

impl Default for RingConfig {
    fn default() -> Self {
        RingConfig {
            replicas: 50,
            min_replicas: 10,
            max_replicas: 200,
            rebalance_threshold: 0.25,
        }
    }
}

#[derive(Default)]
struct RingState {
    /// Sorted virtual-node positions.
    positions: Vec<u64>,
    /// Position → owning node.
    nodes: HashMap<u64, String>,
    /// Node → number of positions it owns.
    replicas: HashMap<String, usize>,
    /// Node → lookups routed to it since the last reset.
    traffic: HashMap<String, AtomicU64>,
}

/// A consistent hash ring mapping keys to node addresses.
///
/// Lookups take the shared lock; membership changes take the exclusive lock.
/// Per-node traffic counters are carried so that an out-of-band rebalance
/// policy can compare each node's share against the configured threshold; no
/// automatic trigger is wired up.
pub struct HashRing {
    config: RingConfig,
    state: RwLock<RingState>,
    total_traffic: AtomicU64,
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new(RingConfig::default())
    }
}

impl HashRing {
    /// Creates an empty ring.
    pub fn new(config: RingConfig) -> Self {
        HashRing {
            config,
            state: RwLock::default(),
            total_traffic: AtomicU64::new(0),
        }
    }

    /// Places `node` on the ring under `replicas` virtual positions.
    ///
    /// Returns false without touching the ring if the node is already
    /// present or any of its positions would collide with an existing one.
    pub fn add(&self, node: &str) -> bool {
        let mut state = self.state.write();
        if state.replicas.contains_key(node) {
            return false;
        }
        let mut positions = Vec::with_capacity(self.config.replicas);
        for replica in 0..self.config.replicas {
            let position = position_hash(&format!("{node}-{replica}"));
            if state.nodes.contains_key(&position) || positions.contains(&position) {
                tracing::warn!(node, position, "virtual node collision, refusing to add");
                return false;
            }
            positions.push(position);
        }
        for &position in &positions {
            state.nodes.insert(position, node.to_owned());
        }
        state.positions.extend_from_slice(&positions);
        state.positions.sort_unstable();
        state.replicas.insert(node.to_owned(), positions.len());
        state.traffic.insert(node.to_owned(), AtomicU64::new(0));
        true
    }

    /// Removes `node` and all of its virtual positions.
    pub fn remove(&self, node: &str) -> bool {
        let mut state = self.state.write();
        let Some(replicas) = state.replicas.remove(node) else {
            return false;
        };
        for replica in 0..replicas {
            let position = position_hash(&format!("{node}-{replica}"));
            state.nodes.remove(&position);
            if let Ok(at) = state.positions.binary_search(&position) {
                state.positions.remove(at);
            }
        }
        state.traffic.remove(node);
        true
    }

    /// Maps `key` to the node owning the first position at or after its
    /// hash, wrapping around the ring. Returns `None` on an empty ring.
    pub fn get(&self, key: &str) -> Option<String> {
        let state = self.state.read();
        if state.positions.is_empty() {
            return None;
        }
        let hash = position_hash(key);
        let at = match state.positions.binary_search(&hash) {
            Ok(at) => at,
            Err(at) if at == state.positions.len() => 0,
            Err(at) => at,
        };
        let node = state.nodes.get(&state.positions[at]).cloned()?;
        if let Some(counter) = state.traffic.get(&node) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        self.total_traffic.fetch_add(1, Ordering::Relaxed);
        Some(node)
    }

    /// Returns whether `node` is on the ring.
    pub fn contains(&self, node: &str) -> bool {
        self.state.read().replicas.contains_key(node)
    }

    /// Returns whether the ring has no nodes.
    pub fn is_empty(&self) -> bool {
        self.state.read().replicas.is_empty()
    }

    /// The number of physical nodes on the ring.
    pub fn node_count(&self) -> usize {
        self.state.read().replicas.len()
    }

    /// The fraction of all lookups routed to `node` since the last counter
    /// reset, for an out-of-band rebalance decision.
    pub fn traffic_share(&self, node: &str) -> Option<f64> {
        let total = self.total_traffic.load(Ordering::Relaxed);
        if total == 0 {
            return None;
        }
        let state = self.state.read();
        let count = state.traffic.get(node)?.load(Ordering::Relaxed);
        Some(count as f64 / total as f64)
    }

    /// Resets all traffic counters, as a rebalance pass would.
    pub fn reset_traffic(&self) {
        let state = self.state.read();
        for counter in state.traffic.values() {
            counter.store(0, Ordering::Relaxed);
        }
        self.total_traffic.store(0, Ordering::Relaxed);
    }

    /// The ring parameters.
    pub fn config(&self) -> &RingConfig {
        &self.config
    }
}

/// A stable 64-bit ring position: the first eight bytes of the SHA-256 of
/// the input.
fn position_hash(data: &str) -> u64 {
    let digest = Sha256::digest(data.as_bytes());
    u64::from_be_bytes(digest[..8].try_into().expect("digest shorter than 8 bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn ring_with(nodes: &[&str]) -> HashRing {
        let ring = HashRing::default();
        for node in nodes {
            assert!(ring.add(node));
        }
        ring
    }

    #[test]
    fn positions_stay_sorted_and_owned() {
        let ring = ring_with(&["10.0.0.1:8001", "10.0.0.2:8001", "10.0.0.3:8001"]);
        let state = ring.state.read();
        assert!(state.positions.windows(2).all(|pair| pair[0] < pair[1]));
        for position in &state.positions {
            assert!(state.nodes.contains_key(position));
        }
        for (node, replicas) in &state.replicas {
            let owned = state.nodes.values().filter(|n| *n == node).count();
            assert_eq!(owned, *replicas);
        }
    }

    #[test]
    fn double_add_is_refused() {
        let ring = ring_with(&["a:1"]);
        assert!(!ring.add("a:1"));
        assert_eq!(ring.node_count(), 1);
    }

    #[test]
    fn empty_ring_has_no_owner() {
        let ring = HashRing::default();
        assert_eq!(ring.get("anything"), None);
        assert!(!ring.remove("a:1"));
    }

    #[test]
    fn lookups_are_deterministic() {
        let ring = ring_with(&["a:1", "b:1", "c:1"]);
        let owner = ring.get("some-key").unwrap();
        for _ in 0..10 {
            assert_eq!(ring.get("some-key").unwrap(), owner);
        }
    }

    #[test]
    fn removing_a_node_only_moves_its_keys() {
        let ring = ring_with(&["a:1", "b:1", "c:1"]);
        let keys: Vec<String> = (0..10_000).map(|i| format!("key-{i}")).collect();
        let before: HashMap<&String, String> = keys
            .iter()
            .map(|key| (key, ring.get(key).unwrap()))
            .collect();

        assert!(ring.remove("b:1"));

        let mut moved = 0;
        for key in &keys {
            let owner = ring.get(key).unwrap();
            let previous = &before[key];
            if previous == "b:1" {
                assert_ne!(owner, "b:1");
                moved += 1;
            } else {
                // Keys owned by surviving nodes must not be reassigned.
                assert_eq!(&owner, previous);
            }
        }
        // Only B's share redistributes: well under 2x the fair third.
        assert!(moved < keys.len() * 2 / 3, "{moved} keys moved");
    }

    #[test]
    fn traffic_counters_add_up() {
        let ring = ring_with(&["a:1", "b:1"]);
        for i in 0..100 {
            ring.get(&format!("key-{i}"));
        }
        assert_eq!(ring.total_traffic.load(Ordering::Relaxed), 100);
        let share_a = ring.traffic_share("a:1").unwrap();
        let share_b = ring.traffic_share("b:1").unwrap();
        assert!((share_a + share_b - 1.0).abs() < f64::EPSILON);

        ring.reset_traffic();
        assert_eq!(ring.traffic_share("a:1"), None);
    }
}
