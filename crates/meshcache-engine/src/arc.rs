//! Adaptive replacement: a recency half and a frequency half with ghost
//! lists steering the capacity split.

use std::collections::HashMap;
use std::hash::Hash;

use crate::list::{Arena, List};
use crate::Policy;

/// Result of touching a recency-resident entry.
struct RecencyHit<V> {
    value: V,
    freq: u64,
    /// The entry crossed the promotion threshold and left the recency half;
    /// the caller re-homes it in the frequency half.
    promoted: bool,
}

/// The recency half: an LRU list plus a keys-only ghost list remembering
/// recent evictions.
struct RecencyHalf<K, V> {
    capacity: usize,
    arena: Arena<K, V>,
    list: List,
    map: HashMap<K, usize>,
    ghost_arena: Arena<K, ()>,
    ghost_list: List,
    ghost_map: HashMap<K, usize>,
}

impl<K, V> RecencyHalf<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn new(capacity: usize) -> Self {
        RecencyHalf {
            capacity,
            arena: Arena::with_capacity(capacity),
            list: List::new(),
            map: HashMap::with_capacity(capacity),
            ghost_arena: Arena::with_capacity(capacity),
            ghost_list: List::new(),
            ghost_map: HashMap::with_capacity(capacity),
        }
    }

    fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Touches a resident entry: bumps its counter and either refreshes its
    /// recency or, at the promotion threshold, removes it for the frequency
    /// half to adopt.
    fn hit(&mut self, key: &K, new_value: Option<V>, threshold: u64) -> Option<RecencyHit<V>> {
        let idx = *self.map.get(key)?;
        if let Some(value) = new_value {
            self.arena.get_mut(idx).value = value;
        }
        let entry = self.arena.get_mut(idx);
        entry.freq += 1;
        let freq = entry.freq;
        if freq >= threshold {
            self.list.remove(&mut self.arena, idx);
            self.map.remove(key);
            let entry = self.arena.remove(idx);
            Some(RecencyHit {
                value: entry.value,
                freq,
                promoted: true,
            })
        } else {
            self.list.remove(&mut self.arena, idx);
            self.list.push_back(&mut self.arena, idx);
            Some(RecencyHit {
                value: self.arena.get(idx).value.clone(),
                freq,
                promoted: false,
            })
        }
    }

    /// Fresh insert at the MRU end, spilling the LRU entry into the ghost
    /// list when full.
    fn insert(&mut self, key: K, value: V) {
        if self.map.len() >= self.capacity {
            self.evict_to_ghost();
        }
        let idx = self.arena.insert(key.clone(), value);
        self.list.push_back(&mut self.arena, idx);
        self.map.insert(key, idx);
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.map.remove(key)?;
        self.list.remove(&mut self.arena, idx);
        Some(self.arena.remove(idx).value)
    }

    fn evict_to_ghost(&mut self) {
        if let Some(idx) = self.list.pop_front(&mut self.arena) {
            let entry = self.arena.remove(idx);
            self.map.remove(&entry.key);
            self.push_ghost(entry.key);
        }
    }

    /// Records an evicted key. Ghosts carry no value and start from a clean
    /// counter when they re-enter the cache.
    fn push_ghost(&mut self, key: K) {
        while self.ghost_map.len() >= self.capacity {
            self.pop_oldest_ghost();
        }
        let idx = self.ghost_arena.insert(key.clone(), ());
        self.ghost_list.push_back(&mut self.ghost_arena, idx);
        self.ghost_map.insert(key, idx);
    }

    fn pop_oldest_ghost(&mut self) {
        if let Some(idx) = self.ghost_list.pop_front(&mut self.ghost_arena) {
            let entry = self.ghost_arena.remove(idx);
            self.ghost_map.remove(&entry.key);
        }
    }

    fn ghost_remove(&mut self, key: &K) -> bool {
        match self.ghost_map.remove(key) {
            Some(idx) => {
                self.ghost_list.remove(&mut self.ghost_arena, idx);
                self.ghost_arena.remove(idx);
                true
            }
            None => false,
        }
    }

    fn grow(&mut self) {
        self.capacity += 1;
    }

    /// Gives up one unit of capacity, evicting down to the new bound.
    /// Refused at the floor of 1.
    fn shrink(&mut self) -> bool {
        if self.capacity <= 1 {
            return false;
        }
        self.capacity -= 1;
        self.trim();
        true
    }

    fn trim(&mut self) {
        while self.map.len() > self.capacity {
            self.evict_to_ghost();
        }
        while self.ghost_map.len() > self.capacity {
            self.pop_oldest_ghost();
        }
    }
}

/// The frequency half: LFU buckets plus a keys-only ghost list.
struct FrequencyHalf<K, V> {
    capacity: usize,
    arena: Arena<K, V>,
    map: HashMap<K, usize>,
    buckets: HashMap<u64, List>,
    min_freq: u64,
    ghost_arena: Arena<K, ()>,
    ghost_list: List,
    ghost_map: HashMap<K, usize>,
}

impl<K, V> FrequencyHalf<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn new(capacity: usize) -> Self {
        FrequencyHalf {
            capacity,
            arena: Arena::with_capacity(capacity),
            map: HashMap::with_capacity(capacity),
            buckets: HashMap::new(),
            min_freq: 0,
            ghost_arena: Arena::with_capacity(capacity),
            ghost_list: List::new(),
            ghost_map: HashMap::with_capacity(capacity),
        }
    }

    fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Touches a resident entry: next bucket, MRU position within it.
    fn hit(&mut self, key: &K, new_value: Option<V>) -> Option<V> {
        let idx = *self.map.get(key)?;
        if let Some(value) = new_value {
            self.arena.get_mut(idx).value = value;
        }
        self.detach(idx);
        self.arena.get_mut(idx).freq += 1;
        self.attach(idx);
        self.recompute_min_freq();
        Some(self.arena.get(idx).value.clone())
    }

    /// Adopts an entry promoted out of the recency half, keeping the counter
    /// it arrived with.
    fn insert_with_freq(&mut self, key: K, value: V, freq: u64) {
        if self.map.len() >= self.capacity {
            self.evict_to_ghost();
        }
        let idx = self.arena.insert(key.clone(), value);
        self.arena.get_mut(idx).freq = freq;
        self.map.insert(key, idx);
        self.attach(idx);
        self.recompute_min_freq();
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.map.remove(key)?;
        self.detach(idx);
        let entry = self.arena.remove(idx);
        self.recompute_min_freq();
        Some(entry.value)
    }

    fn evict_to_ghost(&mut self) {
        let min_freq = self.min_freq;
        let Some(bucket) = self.buckets.get_mut(&min_freq) else {
            return;
        };
        let Some(idx) = bucket.pop_front(&mut self.arena) else {
            return;
        };
        if bucket.is_empty() {
            self.buckets.remove(&min_freq);
        }
        let entry = self.arena.remove(idx);
        self.map.remove(&entry.key);
        self.recompute_min_freq();
        self.push_ghost(entry.key);
    }

    fn push_ghost(&mut self, key: K) {
        while self.ghost_map.len() >= self.capacity {
            self.pop_oldest_ghost();
        }
        let idx = self.ghost_arena.insert(key.clone(), ());
        self.ghost_list.push_back(&mut self.ghost_arena, idx);
        self.ghost_map.insert(key, idx);
    }

    fn pop_oldest_ghost(&mut self) {
        if let Some(idx) = self.ghost_list.pop_front(&mut self.ghost_arena) {
            let entry = self.ghost_arena.remove(idx);
            self.ghost_map.remove(&entry.key);
        }
    }

    fn ghost_remove(&mut self, key: &K) -> bool {
        match self.ghost_map.remove(key) {
            Some(idx) => {
                self.ghost_list.remove(&mut self.ghost_arena, idx);
                self.ghost_arena.remove(idx);
                true
            }
            None => false,
        }
    }

    fn grow(&mut self) {
        self.capacity += 1;
    }

    fn shrink(&mut self) -> bool {
        if self.capacity <= 1 {
            return false;
        }
        self.capacity -= 1;
        self.trim();
        true
    }

    fn trim(&mut self) {
        while self.map.len() > self.capacity {
            self.evict_to_ghost();
        }
        while self.ghost_map.len() > self.capacity {
            self.pop_oldest_ghost();
        }
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

    fn recompute_min_freq(&mut self) {
        self.min_freq = self.buckets.keys().copied().min().unwrap_or(0);
    }
}

/// An adaptive replacement cache.
///
/// The budget is split between a recency half and a frequency half, each
/// shadowed by a keys-only ghost list of its recent evictions. A miss that
/// lands in a ghost list means that half was sized too small, so one unit of
/// capacity moves towards it (never below a floor of 1 on either side). New
/// keys enter the recency half; once a key's counter reaches the promotion
/// threshold it moves to the frequency half.
pub struct ArcCache<K, V> {
    recency: RecencyHalf<K, V>,
    frequency: FrequencyHalf<K, V>,
    promotion_threshold: u64,
}

impl<K, V> ArcCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Creates a cache splitting `capacity` (minimum 2) evenly between the
    /// two halves, with the default promotion threshold of 2.
    pub fn new(capacity: usize) -> Self {
        Self::with_promotion_threshold(capacity, 2)
    }

    /// Creates a cache with an explicit promotion threshold (minimum 1).
    pub fn with_promotion_threshold(capacity: usize, threshold: u64) -> Self {
        let recency_capacity = (capacity / 2).max(1);
        let frequency_capacity = capacity.saturating_sub(recency_capacity).max(1);
        ArcCache {
            recency: RecencyHalf::new(recency_capacity),
            frequency: FrequencyHalf::new(frequency_capacity),
            promotion_threshold: threshold.max(1),
        }
    }

    /// Looks up `key`.
    ///
    /// A hit in either ghost list first shifts one unit of capacity towards
    /// the half that evicted the key too eagerly; the lookup itself is still
    /// a miss in that case, since ghosts carry no values.
    pub fn get(&mut self, key: &K) -> Option<V> {
        self.adapt(key);
        if let Some(hit) = self.recency.hit(key, None, self.promotion_threshold) {
            if hit.promoted {
                self.frequency
                    .insert_with_freq(key.clone(), hit.value.clone(), hit.freq);
            }
            return Some(hit.value);
        }
        self.frequency.hit(key, None)
    }

    /// Inserts or updates `key`. Fresh keys always enter the recency half.
    pub fn put(&mut self, key: K, value: V) {
        self.adapt(&key);
        if self.recency.contains(&key) {
            if let Some(hit) = self.recency.hit(&key, Some(value), self.promotion_threshold) {
                if hit.promoted {
                    self.frequency.insert_with_freq(key, hit.value, hit.freq);
                }
            }
            return;
        }
        if self.frequency.contains(&key) {
            self.frequency.hit(&key, Some(value));
            return;
        }
        self.recency.insert(key, value);
    }

    /// Removes `key` from whichever half holds it, clearing any ghost trace.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.recency.ghost_remove(key);
        self.frequency.ghost_remove(key);
        self.recency
            .remove(key)
            .or_else(|| self.frequency.remove(key))
    }

    /// Returns whether either half holds `key` live.
    pub fn contains(&self, key: &K) -> bool {
        self.recency.contains(key) || self.frequency.contains(key)
    }

    /// Live entries across both halves.
    pub fn len(&self) -> usize {
        self.recency.map.len() + self.frequency.map.len()
    }

    /// Returns whether both halves are empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The combined capacity of both halves.
    pub fn capacity(&self) -> usize {
        self.recency.capacity + self.frequency.capacity
    }

    /// Ghost-hit adaptation: a key remembered by a half's ghost list grows
    /// that half by one unit at the expense of the other, unless the other
    /// half is already at its floor.
    fn adapt(&mut self, key: &K) {
        if self.recency.ghost_remove(key) {
            if self.frequency.shrink() {
                self.recency.grow();
            }
        } else if self.frequency.ghost_remove(key) && self.recency.shrink() {
            self.frequency.grow();
        }
    }
}

impl<K, V> Policy<K, V> for ArcCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn get(&mut self, key: &K) -> Option<V> {
        ArcCache::get(self, key)
    }

    fn put(&mut self, key: K, value: V) {
        ArcCache::put(self, key, value)
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        ArcCache::remove(self, key)
    }

    fn contains(&self, key: &K) -> bool {
        ArcCache::contains(self, key)
    }

    fn len(&self) -> usize {
        ArcCache::len(self)
    }

    fn capacity(&self) -> usize {
        ArcCache::capacity(self)
    }
}
