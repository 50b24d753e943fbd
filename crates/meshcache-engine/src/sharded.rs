//! Hash-partitioned fan-out over independent engine instances.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use parking_lot::Mutex;

use crate::Policy;

/// Fans keys out across `N` independent engine instances.
///
/// The wrapper itself holds no lock; each shard sits behind its own mutex, so
/// contention is proportional to the fraction of requests landing on one
/// shard. The total capacity is split as ⌈C/N⌉ per shard.
pub struct Sharded<K, V, P> {
    shards: Vec<Mutex<P>>,
    capacity: usize,
    _marker: PhantomData<fn(K) -> V>,
}

impl<K, V, P> Sharded<K, V, P>
where
    K: Hash + Eq,
    P: Policy<K, V>,
{
    /// Builds `shards` engine instances via `factory`, which receives the
    /// per-shard capacity.
    pub fn new(capacity: usize, shards: usize, factory: impl Fn(usize) -> P) -> Self {
        let shards = shards.max(1);
        let per_shard = capacity.div_ceil(shards);
        Sharded {
            shards: (0..shards).map(|_| Mutex::new(factory(per_shard))).collect(),
            capacity,
            _marker: PhantomData,
        }
    }

    /// Looks up `key` in its shard.
    pub fn get(&self, key: &K) -> Option<V> {
        self.shard(key).lock().get(key)
    }

    /// Inserts or updates `key` in its shard.
    pub fn put(&self, key: K, value: V) {
        self.shard(&key).lock().put(key, value)
    }

    /// Removes `key` from its shard.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.shard(key).lock().remove(key)
    }

    /// Returns whether `key` is resident in its shard.
    pub fn contains(&self, key: &K) -> bool {
        self.shard(key).lock().contains(key)
    }

    /// Resident entries summed across all shards.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    /// Returns whether every shard is empty.
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.lock().is_empty())
    }

    /// The total configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard(&self, key: &K) -> &Mutex<P> {
        // DefaultHasher with the zero key is deterministic within the
        // process.
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() % self.shards.len() as u64) as usize]
    }
}
