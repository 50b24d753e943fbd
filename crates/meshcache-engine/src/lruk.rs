//! LRU-K: LRU with a cold admission stage.

use std::hash::Hash;

use crate::lru::LruCache;
use crate::Policy;

/// An LRU cache guarded by a cold admission stage.
///
/// New keys land in a small cold LRU that tracks how often they are touched.
/// Only once a key has been seen `k` times is it promoted into the hot cache,
/// so a one-pass scan over many keys cannot displace the hot working set.
pub struct LruKCache<K, V> {
    hot: LruCache<K, V>,
    cold: LruCache<K, V>,
    k: u64,
}

impl<K, V> LruKCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Creates a cache with a hot capacity of `capacity`, a cold stage of
    /// `cold_capacity`, and a promotion threshold of `k` touches (minimum 1).
    pub fn new(capacity: usize, cold_capacity: usize, k: u64) -> Self {
        LruKCache {
            hot: LruCache::new(capacity),
            cold: LruCache::new(cold_capacity),
            k: k.max(1),
        }
    }

    /// Looks up `key` in the hot cache, falling back to the cold stage.
    ///
    /// A cold hit counts towards promotion; once the key has reached the
    /// threshold it moves into the hot cache.
    pub fn get(&mut self, key: &K) -> Option<V> {
        if self.hot.contains(key) {
            return self.hot.get(key);
        }
        if !self.cold.contains(key) {
            return None;
        }
        let freq = self.cold.freq(key).unwrap_or(0);
        let value = self.cold.get(key)?;
        if freq >= self.k {
            self.cold.remove(key);
            self.hot.put(key.clone(), value.clone());
        } else {
            self.cold.set_freq(key, freq + 1);
        }
        Some(value)
    }

    /// Inserts or updates `key`.
    ///
    /// Hot-resident keys update in place. Unpromoted keys accumulate touches
    /// in the cold stage until they cross the threshold.
    pub fn put(&mut self, key: K, value: V) {
        if self.hot.contains(&key) {
            self.hot.put(key, value);
            return;
        }
        let freq = self.cold.freq(&key).unwrap_or(0);
        if freq >= self.k {
            self.cold.remove(&key);
            self.hot.put(key, value);
        } else {
            self.cold.put(key.clone(), value);
            self.cold.set_freq(&key, freq + 1);
        }
    }

    /// Removes `key` from whichever stage holds it.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.hot.remove(key).or_else(|| self.cold.remove(key))
    }

    /// Returns whether either stage holds `key`.
    pub fn contains(&self, key: &K) -> bool {
        self.hot.contains(key) || self.cold.contains(key)
    }

    /// Resident entries across both stages.
    pub fn len(&self) -> usize {
        self.hot.len() + self.cold.len()
    }

    /// Returns whether both stages are empty.
    pub fn is_empty(&self) -> bool {
        self.hot.is_empty() && self.cold.is_empty()
    }

    /// The hot-stage capacity.
    pub fn capacity(&self) -> usize {
        self.hot.capacity()
    }
}

impl<K, V> Policy<K, V> for LruKCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn get(&mut self, key: &K) -> Option<V> {
        LruKCache::get(self, key)
    }

    fn put(&mut self, key: K, value: V) {
        LruKCache::put(self, key, value)
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        LruKCache::remove(self, key)
    }

    fn contains(&self, key: &K) -> bool {
        LruKCache::contains(self, key)
    }

    fn len(&self) -> usize {
        LruKCache::len(self)
    }

    fn capacity(&self) -> usize {
        LruKCache::capacity(self)
    }
}
