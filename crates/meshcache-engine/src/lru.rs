//! Least-recently-used eviction.

use std::collections::HashMap;
use std::hash::Hash;

use crate::list::{Arena, List};
use crate::Policy;

/// A bounded LRU cache.
///
/// Every hit moves the entry to the most recently used end; eviction always
/// takes the least recently used entry. The per-entry frequency counter is
/// not consulted by the policy itself but is exposed through [`freq`] and
/// [`set_freq`] so that [`LruKCache`](crate::LruKCache) can run its cold
/// stage on top of a plain LRU.
///
/// [`freq`]: LruCache::freq
/// [`set_freq`]: LruCache::set_freq
pub struct LruCache<K, V> {
    capacity: usize,
    arena: Arena<K, V>,
    list: List,
    map: HashMap<K, usize>,
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Creates a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        LruCache {
            capacity,
            arena: Arena::with_capacity(capacity),
            list: List::new(),
            map: HashMap::with_capacity(capacity),
        }
    }

    /// Looks up `key` and marks it most recently used.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let idx = *self.map.get(key)?;
        self.list.remove(&mut self.arena, idx);
        self.list.push_back(&mut self.arena, idx);
        Some(self.arena.get(idx).value.clone())
    }

    /// Inserts or updates `key`, evicting the LRU entry when full.
    pub fn put(&mut self, key: K, value: V) {
        if let Some(&idx) = self.map.get(&key) {
            let entry = self.arena.get_mut(idx);
            entry.value = value;
            self.list.remove(&mut self.arena, idx);
            self.list.push_back(&mut self.arena, idx);
            return;
        }
        if self.map.len() >= self.capacity {
            self.evict_lru();
        }
        let idx = self.arena.insert(key.clone(), value);
        self.list.push_back(&mut self.arena, idx);
        self.map.insert(key, idx);
    }

    /// Removes `key`, returning its value if present.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.map.remove(key)?;
        self.list.remove(&mut self.arena, idx);
        Some(self.arena.remove(idx).value)
    }

    /// Returns whether `key` is resident, without touching recency.
    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// The access counter of `key`, if resident.
    pub fn freq(&self, key: &K) -> Option<u64> {
        self.map.get(key).map(|&idx| self.arena.get(idx).freq)
    }

    /// Overwrites the access counter of `key`, if resident.
    pub fn set_freq(&mut self, key: &K, freq: u64) {
        if let Some(&idx) = self.map.get(key) {
            self.arena.get_mut(idx).freq = freq;
        }
    }

    /// The number of resident entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// The maximum number of resident entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn evict_lru(&mut self) {
        if let Some(idx) = self.list.pop_front(&mut self.arena) {
            let entry = self.arena.remove(idx);
            self.map.remove(&entry.key);
        }
    }
}

impl<K, V> Policy<K, V> for LruCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn get(&mut self, key: &K) -> Option<V> {
        LruCache::get(self, key)
    }

    fn put(&mut self, key: K, value: V) {
        LruCache::put(self, key, value)
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        LruCache::remove(self, key)
    }

    fn contains(&self, key: &K) -> bool {
        LruCache::contains(self, key)
    }

    fn len(&self) -> usize {
        LruCache::len(self)
    }

    fn capacity(&self) -> usize {
        LruCache::capacity(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eviction_follows_recency() {
        let mut cache = LruCache::new(3);
        cache.put(1, "a");
        cache.put(2, "b");
        cache.put(3, "c");
        assert_eq!(cache.get(&1), Some("a"));

        // Key 2 is now the least recently used and must go.
        cache.put(4, "d");
        assert_eq!(cache.get(&1), Some("a"));
        assert_eq!(cache.get(&2), None);
        assert_eq!(cache.get(&3), Some("c"));
        assert_eq!(cache.get(&4), Some("d"));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn update_refreshes_recency() {
        let mut cache = LruCache::new(2);
        cache.put(1, "a");
        cache.put(2, "b");
        cache.put(1, "a2");
        cache.put(3, "c");

        assert_eq!(cache.get(&1), Some("a2"));
        assert_eq!(cache.get(&2), None);
        assert_eq!(cache.get(&3), Some("c"));
    }

    #[test]
    fn remove_frees_a_slot() {
        let mut cache = LruCache::new(2);
        cache.put(1, 1);
        cache.put(2, 2);
        assert_eq!(cache.remove(&1), Some(1));
        assert_eq!(cache.remove(&1), None);

        cache.put(3, 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&2), Some(2));
        assert_eq!(cache.get(&3), Some(3));
    }

    #[test]
    fn freq_counters_survive_touches() {
        let mut cache = LruCache::new(2);
        cache.put(1, "a");
        assert_eq!(cache.freq(&1), Some(1));
        cache.set_freq(&1, 5);
        cache.get(&1);
        assert_eq!(cache.freq(&1), Some(5));
        assert_eq!(cache.freq(&9), None);
    }

    #[test]
    fn size_never_exceeds_capacity() {
        let mut cache = LruCache::new(4);
        for key in 0..100 {
            cache.put(key, key);
            assert!(cache.len() <= cache.capacity());
        }
    }
}
