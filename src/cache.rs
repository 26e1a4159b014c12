//! Bounded in-process cache.
//!
//! A strict least-recently-used map with entry-count capacity. Values are
//! handed out by clone; callers store `Arc`s, so an eviction only drops
//! the cache's reference and an outstanding iterator keeps its block or
//! table alive.
//!
//! Recency is a monotonic tick per entry plus an ordered tick→key map,
//! which makes touch, insert and evict all O(log n) without unsafe
//! pointer plumbing.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::hash::Hash;

pub struct LruCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    capacity: usize,
    entries: HashMap<K, (V, u64)>,
    recency: BTreeMap<u64, K>,
    tick: u64,
    hits: u64,
    misses: u64,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            tick: 0,
            hits: 0,
            misses: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        self.tick += 1;
        let tick = self.tick;
        match self.entries.get_mut(key) {
            Some((value, last_used)) => {
                self.recency.remove(last_used);
                *last_used = tick;
                self.recency.insert(tick, key.clone());
                self.hits += 1;
                Some(value.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.tick += 1;
        if let Some((_, old_tick)) = self.entries.remove(&key) {
            self.recency.remove(&old_tick);
        }
        self.entries.insert(key.clone(), (value, self.tick));
        self.recency.insert(self.tick, key);

        while self.entries.len() > self.capacity {
            let (_, victim) = self
                .recency
                .pop_first()
                .expect("recency map tracks every entry");
            self.entries.remove(&victim);
        }
    }

    /// Drops an entry immediately; used when the file behind it is
    /// deleted.
    pub fn evict(&mut self, key: &K) {
        if let Some((_, tick)) = self.entries.remove(key) {
            self.recency.remove(&tick);
        }
    }

    /// (hits, misses) since creation.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut cache: LruCache<u64, String> = LruCache::new(4);
        cache.insert(1, "one".into());
        cache.insert(2, "two".into());
        assert_eq!(cache.get(&1), Some("one".into()));
        assert_eq!(cache.get(&3), None);
        assert_eq!(cache.stats(), (1, 1));
    }

    #[test]
    fn test_capacity_evicts_lru() {
        let mut cache: LruCache<u64, u64> = LruCache::new(3);
        cache.insert(1, 10);
        cache.insert(2, 20);
        cache.insert(3, 30);
        // Touch 1 so 2 becomes the victim.
        cache.get(&1);
        cache.insert(4, 40);

        assert_eq!(cache.get(&2), None);
        assert_eq!(cache.get(&1), Some(10));
        assert_eq!(cache.get(&3), Some(30));
        assert_eq!(cache.get(&4), Some(40));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_reinsert_replaces_value() {
        let mut cache: LruCache<u64, u64> = LruCache::new(2);
        cache.insert(1, 10);
        cache.insert(1, 11);
        assert_eq!(cache.get(&1), Some(11));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_explicit_evict() {
        let mut cache: LruCache<u64, u64> = LruCache::new(2);
        cache.insert(1, 10);
        cache.evict(&1);
        assert_eq!(cache.get(&1), None);
        // Evicting a missing key is a no-op.
        cache.evict(&7);
    }

    #[test]
    fn test_shared_value_survives_eviction() {
        use std::sync::Arc;
        let mut cache: LruCache<u64, Arc<Vec<u8>>> = LruCache::new(1);
        let held = Arc::new(vec![1u8, 2, 3]);
        cache.insert(1, Arc::clone(&held));
        cache.insert(2, Arc::new(vec![4]));
        assert_eq!(cache.get(&1), None);
        // The evicted value is still usable through the caller's Arc.
        assert_eq!(*held, vec![1, 2, 3]);
    }
}
