//! Bounded in-memory eviction engines.
//!
//! This crate contains the replacement policies used by the meshcache node:
//! plain LRU, LRU-K with a cold admission stage, LFU with frequency-list
//! bucketing, an average-frequency decay variant of LFU, and an ARC that
//! adaptively splits its budget between a recency and a frequency half.
//!
//! The engines are plain data structures: they take `&mut self`, never block,
//! and never perform I/O. Concurrent access goes through [`Sharded`], which
//! fans keys out across independent engine instances behind per-shard locks.

mod arc;
mod lfu;
mod list;
mod lru;
mod lruk;
mod sharded;

pub use arc::ArcCache;
pub use lfu::{AvgLfuCache, LfuCache};
pub use lru::LruCache;
pub use lruk::LruKCache;
pub use sharded::Sharded;

/// A bounded key–value store with an eviction policy.
///
/// All engines in this crate implement this trait so that the sharded wrapper
/// and the cache group can hold any of them interchangeably. Implementations
/// are not internally synchronized; the caller serializes access.
pub trait Policy<K, V> {
    /// Looks up `key`, registering the access with the policy.
    fn get(&mut self, key: &K) -> Option<V>;

    /// Inserts or updates `key`, evicting another entry if the engine is at
    /// capacity.
    fn put(&mut self, key: K, value: V);

    /// Removes `key`, returning its value if it was present.
    fn remove(&mut self, key: &K) -> Option<V>;

    /// Returns whether `key` is currently resident.
    fn contains(&self, key: &K) -> bool;

    /// The number of resident entries.
    fn len(&self) -> usize;

    /// Returns whether the engine holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The maximum number of resident entries.
    fn capacity(&self) -> usize;
}

impl<K, V> Policy<K, V> for Box<dyn Policy<K, V> + Send> {
    fn get(&mut self, key: &K) -> Option<V> {
        (**self).get(key)
    }

    fn put(&mut self, key: K, value: V) {
        (**self).put(key, value)
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        (**self).remove(key)
    }

    fn contains(&self, key: &K) -> bool {
        (**self).contains(key)
    }

    fn len(&self) -> usize {
        (**self).len()
    }

    fn capacity(&self) -> usize {
        (**self).capacity()
    }
}
