//! LFU with frequency-list bucketing, and its average-decay variant.

use std::collections::HashMap;
use std::hash::Hash;

use crate::list::{Arena, List};
use crate::Policy;

/// Effect of an LFU insert, reported to [`AvgLfuCache`] so it can keep its
/// frequency sum in step.
struct PutEffect {
    evicted_freq: Option<u64>,
}

/// A bounded LFU cache.
///
/// Entries are bucketed by access frequency; eviction takes the front of the
/// lowest non-empty bucket, so ties on frequency break towards the least
/// recently used entry. `min_freq` always names the lowest non-empty bucket
/// (0 while the cache is empty).
pub struct LfuCache<K, V> {
    capacity: usize,
    arena: Arena<K, V>,
    map: HashMap<K, usize>,
    buckets: HashMap<u64, List>,
    min_freq: u64,
}

impl<K, V> LfuCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Creates a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        LfuCache {
            capacity,
            arena: Arena::with_capacity(capacity),
            map: HashMap::with_capacity(capacity),
            buckets: HashMap::new(),
            min_freq: 0,
        }
    }

    /// Looks up `key`, promoting it to the next frequency bucket on a hit.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let idx = *self.map.get(key)?;
        self.promote(idx);
        Some(self.arena.get(idx).value.clone())
    }

    /// Inserts or updates `key`, evicting the LFU victim when full.
    pub fn put(&mut self, key: K, value: V) {
        self.put_counted(key, value);
    }

    /// Removes `key`, returning its value if present.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.remove_counted(key).map(|(value, _)| value)
    }

    /// Returns whether `key` is resident, without touching frequencies.
    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
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

    fn put_counted(&mut self, key: K, value: V) -> PutEffect {
        if let Some(&idx) = self.map.get(&key) {
            self.arena.get_mut(idx).value = value;
            self.promote(idx);
            return PutEffect { evicted_freq: None };
        }
        let evicted_freq = if self.map.len() >= self.capacity {
            self.evict_lfu()
        } else {
            None
        };
        let idx = self.arena.insert(key.clone(), value);
        self.map.insert(key, idx);
        self.attach(idx);
        self.min_freq = 1;
        PutEffect { evicted_freq }
    }

    fn remove_counted(&mut self, key: &K) -> Option<(V, u64)> {
        let idx = self.map.remove(key)?;
        self.detach(idx);
        let entry = self.arena.remove(idx);
        if self.min_freq == entry.freq && !self.buckets.contains_key(&entry.freq) {
            self.recompute_min_freq();
        }
        Some((entry.value, entry.freq))
    }

    /// Moves an entry from its current bucket into the next higher one.
    fn promote(&mut self, idx: usize) {
        let freq = self.arena.get(idx).freq;
        self.detach(idx);
        self.arena.get_mut(idx).freq = freq + 1;
        self.attach(idx);
        if self.min_freq == freq && !self.buckets.contains_key(&freq) {
            self.recompute_min_freq();
        }
    }

    /// Evicts the front of the lowest bucket, returning the victim's
    /// frequency.
    fn evict_lfu(&mut self) -> Option<u64> {
        let min_freq = self.min_freq;
        let bucket = self.buckets.get_mut(&min_freq)?;
        let idx = bucket.pop_front(&mut self.arena)?;
        if bucket.is_empty() {
            self.buckets.remove(&min_freq);
        }
        let entry = self.arena.remove(idx);
        self.map.remove(&entry.key);
        self.recompute_min_freq();
        Some(entry.freq)
    }

    fn detach(&mut self, idx: usize) {
        let freq = self.arena.get(idx).freq;
        let bucket = self
            .buckets
            .get_mut(&freq)
            .expect("resident entry has no bucket");
        bucket.remove(&mut self.arena, idx);
        if bucket.is_empty() {
            self.buckets.remove(&freq);
        }
    }

    fn attach(&mut self, idx: usize) {
        let freq = self.arena.get(idx).freq;
        self.buckets
            .entry(freq)
            .or_insert_with(List::new)
            .push_back(&mut self.arena, idx);
    }

    /// Empty buckets are dropped eagerly, so the minimum over the bucket keys
    /// is the true minimum frequency.
    fn recompute_min_freq(&mut self) {
        self.min_freq = self.buckets.keys().copied().min().unwrap_or(0);
    }

    /// Rewrites every entry's frequency to `max(1, freq - max_avg)` and
    /// rebuckets it, returning the new frequency sum.
    fn decay(&mut self, max_avg: u64) -> u64 {
        let indices: Vec<usize> = self.map.values().copied().collect();
        let mut total = 0;
        for idx in indices {
            self.detach(idx);
            let entry = self.arena.get_mut(idx);
            entry.freq = entry.freq.saturating_sub(max_avg).max(1);
            total += entry.freq;
            self.attach(idx);
        }
        self.recompute_min_freq();
        total
    }

    #[cfg(test)]
    fn assert_min_freq_invariant(&self) {
        let expected = self.buckets.keys().copied().min().unwrap_or(0);
        assert_eq!(self.min_freq, expected, "min_freq out of step with buckets");
        assert_eq!(self.map.is_empty(), self.min_freq == 0);
    }
}

impl<K, V> Policy<K, V> for LfuCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn get(&mut self, key: &K) -> Option<V> {
        LfuCache::get(self, key)
    }

    fn put(&mut self, key: K, value: V) {
        LfuCache::put(self, key, value)
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        LfuCache::remove(self, key)
    }

    fn contains(&self, key: &K) -> bool {
        LfuCache::contains(self, key)
    }

    fn len(&self) -> usize {
        LfuCache::len(self)
    }

    fn capacity(&self) -> usize {
        LfuCache::capacity(self)
    }
}

/// LFU with average-frequency decay.
///
/// Tracks the sum of all resident frequencies; when the average after a hit
/// exceeds `max_avg`, every entry's frequency is reduced by `max_avg`
/// (flooring at 1) and rebucketed. The decay pass runs at most once per hit;
/// if every frequency is already at or below `max_avg` the pass collapses
/// them towards 1 and a repeated overshoot is simply tolerated. Decay is the
/// only mechanism by which frequencies decrease, which lets entrenched
/// entries be displaced once overall pressure is high.
pub struct AvgLfuCache<K, V> {
    inner: LfuCache<K, V>,
    total_freq: u64,
    max_avg: u64,
}

impl<K, V> AvgLfuCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Creates a cache of `capacity` entries decaying once the average
    /// frequency exceeds `max_avg` (minimum 1).
    pub fn new(capacity: usize, max_avg: u64) -> Self {
        AvgLfuCache {
            inner: LfuCache::new(capacity),
            total_freq: 0,
            max_avg: max_avg.max(1),
        }
    }

    /// Looks up `key`; a hit bumps the frequency sum and may trigger decay.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let value = self.inner.get(key)?;
        self.total_freq += 1;
        let len = self.inner.len() as u64;
        if len > 0 && self.total_freq / len > self.max_avg {
            self.total_freq = self.inner.decay(self.max_avg);
        }
        Some(value)
    }

    /// Inserts or updates `key`.
    pub fn put(&mut self, key: K, value: V) {
        let effect = self.inner.put_counted(key, value);
        // Both the hit path (freq + 1) and a fresh insert (freq = 1)
        // contribute one to the sum.
        self.total_freq += 1;
        if let Some(freq) = effect.evicted_freq {
            self.total_freq -= freq;
        }
    }

    /// Removes `key`, returning its value if present.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let (value, freq) = self.inner.remove_counted(key)?;
        self.total_freq -= freq;
        Some(value)
    }

    /// Returns whether `key` is resident.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.contains(key)
    }

    /// The number of resident entries.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// The maximum number of resident entries.
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}

impl<K, V> Policy<K, V> for AvgLfuCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn get(&mut self, key: &K) -> Option<V> {
        AvgLfuCache::get(self, key)
    }

    fn put(&mut self, key: K, value: V) {
        AvgLfuCache::put(self, key, value)
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        AvgLfuCache::remove(self, key)
    }

    fn contains(&self, key: &K) -> bool {
        AvgLfuCache::contains(self, key)
    }

    fn len(&self) -> usize {
        AvgLfuCache::len(self)
    }

    fn capacity(&self) -> usize {
        AvgLfuCache::capacity(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eviction_prefers_lowest_frequency() {
        let mut cache = LfuCache::new(2);
        cache.put(1, "a");
        cache.put(2, "b");
        cache.get(&1);
        cache.get(&1);
        cache.assert_min_freq_invariant();

        // Key 2 sits at freq 1 against key 1's freq 3.
        cache.put(3, "c");
        assert_eq!(cache.get(&1), Some("a"));
        assert_eq!(cache.get(&2), None);
        assert_eq!(cache.get(&3), Some("c"));
        cache.assert_min_freq_invariant();
    }

    #[test]
    fn equal_frequencies_break_towards_lru() {
        let mut cache = LfuCache::new(2);
        cache.put(1, "a");
        cache.put(2, "b");
        cache.put(3, "c");
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&2), Some("b"));
        assert_eq!(cache.get(&3), Some("c"));
    }

    #[test]
    fn min_freq_tracks_all_operations() {
        let mut cache = LfuCache::new(3);
        cache.assert_min_freq_invariant();
        cache.put(1, 1);
        cache.put(2, 2);
        cache.get(&1);
        cache.assert_min_freq_invariant();
        cache.get(&2);
        // Both entries left freq 1; bucket 1 is empty and must be forgotten.
        cache.assert_min_freq_invariant();
        cache.remove(&1);
        cache.assert_min_freq_invariant();
        cache.remove(&2);
        cache.assert_min_freq_invariant();
        assert!(cache.is_empty());
    }

    #[test]
    fn update_keeps_single_residency() {
        let mut cache = LfuCache::new(2);
        cache.put(1, "a");
        cache.put(1, "b");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&1), Some("b"));
        cache.assert_min_freq_invariant();
    }

    #[test]
    fn size_never_exceeds_capacity() {
        let mut cache = LfuCache::new(4);
        for key in 0..64 {
            cache.put(key, key);
            assert!(cache.len() <= cache.capacity());
            cache.assert_min_freq_invariant();
        }
    }

    #[test]
    fn decay_reduces_entrenched_frequencies() {
        let mut cache = AvgLfuCache::new(3, 2);
        cache.put(1, "a");
        cache.put(2, "b");
        assert_eq!(cache.total_freq, 2);

        // Hammer key 1 until the average overshoots: sum reaches 6 over two
        // entries, 6 / 2 = 3 > 2, so a decay pass runs.
        for _ in 0..4 {
            cache.get(&1);
        }
        assert_eq!(cache.inner.arena.get(cache.inner.map[&1]).freq, 3);
        assert_eq!(cache.inner.arena.get(cache.inner.map[&2]).freq, 1);
        assert_eq!(cache.total_freq, 4);
        cache.inner.assert_min_freq_invariant();
    }

    #[test]
    fn decay_floors_frequencies_at_one() {
        let mut cache = AvgLfuCache::new(2, 1);
        cache.put(1, "a");
        // sum 2 over 1 entry: 2 / 1 = 2 > 1 decays the sole entry to 1.
        cache.get(&1);
        assert_eq!(cache.total_freq, 1);
        assert_eq!(cache.inner.arena.get(cache.inner.map[&1]).freq, 1);
    }

    #[test]
    fn eviction_subtracts_from_frequency_sum() {
        let mut cache = AvgLfuCache::new(2, 10);
        cache.put(1, "a");
        cache.put(2, "b");
        cache.get(&1);
        assert_eq!(cache.total_freq, 3);

        // Key 2 (freq 1) is evicted; key 3 enters at freq 1.
        cache.put(3, "c");
        assert_eq!(cache.total_freq, 3);
        assert_eq!(cache.get(&2), None);
    }
}
