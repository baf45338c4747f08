// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Basalt Authors

//! A sharded, weight-bounded LRU cache.
//!
//! Keys are object paths (or synthetic keys such as `schema_<id>`); values
//! are cheap-to-clone handles (`Arc`s one level up). Each shard owns an
//! equal slice of the total capacity and evicts independently, so a hot
//! shard cannot starve the others.

use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

const NUM_SHARD_BITS: usize = 4;
const NUM_SHARDS: usize = 1 << NUM_SHARD_BITS;

struct CacheEntry<V> {
    value: V,
    weight: usize,
    tick: u64,
}

struct Shard<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// Recency index: tick -> key, smallest tick is the coldest entry.
    recency: BTreeMap<u64, String>,
    used: usize,
    next_tick: u64,
}

impl<V> Shard<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            used: 0,
            next_tick: 0,
        }
    }

    fn touch(&mut self, key: &str) -> Option<&CacheEntry<V>> {
        let tick = self.next_tick;
        self.next_tick += 1;
        let entry = self.entries.get_mut(key)?;
        self.recency.remove(&entry.tick);
        entry.tick = tick;
        self.recency.insert(tick, key.to_string());
        Some(self.entries.get(key).unwrap())
    }

    fn remove(&mut self, key: &str) {
        if let Some(entry) = self.entries.remove(key) {
            self.recency.remove(&entry.tick);
            self.used -= entry.weight;
        }
    }

    fn evict_to(&mut self, capacity: usize) {
        while self.used > capacity {
            let Some((&tick, _)) = self.recency.iter().next() else {
                break;
            };
            let key = self.recency.remove(&tick).unwrap();
            if let Some(entry) = self.entries.remove(&key) {
                self.used -= entry.weight;
            }
        }
    }
}

pub struct ShardedLruCache<V> {
    shards: Vec<Mutex<Shard<V>>>,
    shard_capacity: usize,
    capacity: usize,
}

impl<V> ShardedLruCache<V> {
    pub fn new(capacity: usize) -> Self {
        let shards = (0..NUM_SHARDS).map(|_| Mutex::new(Shard::new())).collect();
        Self {
            shards,
            shard_capacity: capacity / NUM_SHARDS,
            capacity,
        }
    }

    fn shard(&self, key: &str) -> &Mutex<Shard<V>> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) & (NUM_SHARDS - 1)]
    }

    /// Inserts `value` under `key` with the given eviction weight.
    ///
    /// Returns false (and caches nothing) when the weight alone exceeds the
    /// shard capacity. An existing entry under the same key is replaced.
    pub fn insert(&self, key: impl Into<String>, value: V, weight: usize) -> bool {
        let key = key.into();
        if weight > self.shard_capacity {
            return false;
        }
        let mut shard = self.shard(&key).lock().unwrap();
        shard.remove(&key);
        let tick = shard.next_tick;
        shard.next_tick += 1;
        shard.recency.insert(tick, key.clone());
        shard.entries.insert(
            key,
            CacheEntry {
                value,
                weight,
                tick,
            },
        );
        shard.used += weight;
        let capacity = self.shard_capacity;
        shard.evict_to(capacity);
        true
    }

    pub fn get(&self, key: &str) -> Option<V>
    where
        V: Clone,
    {
        let mut shard = self.shard(key).lock().unwrap();
        shard.touch(key).map(|entry| entry.value.clone())
    }

    pub fn erase(&self, key: &str) {
        let mut shard = self.shard(key).lock().unwrap();
        shard.remove(key);
    }

    /// Drops every cached entry.
    pub fn prune(&self) {
        for shard in &self.shards {
            let mut shard = shard.lock().unwrap();
            shard.entries.clear();
            shard.recency.clear();
            shard.used = 0;
        }
    }

    /// Total weight currently cached across all shards.
    pub fn weight(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().unwrap().used)
            .sum()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_cache() -> ShardedLruCache<u64> {
        // 16 shards of 64 bytes each.
        ShardedLruCache::new(1024)
    }

    #[test]
    fn insert_and_get() {
        let cache = small_cache();
        assert!(cache.insert("a", 1, 10));
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.weight(), 10);
    }

    #[test]
    fn replace_same_key_updates_weight() {
        let cache = small_cache();
        assert!(cache.insert("a", 1, 10));
        assert!(cache.insert("a", 2, 30));
        assert_eq!(cache.get("a"), Some(2));
        assert_eq!(cache.weight(), 30);
    }

    #[test]
    fn oversized_insert_rejected() {
        let cache = small_cache();
        assert!(!cache.insert("huge", 1, 65));
        assert_eq!(cache.get("huge"), None);
        assert_eq!(cache.weight(), 0);
    }

    #[test]
    fn weight_stays_within_budget_under_pressure() {
        let cache = ShardedLruCache::new(NUM_SHARDS * 100);
        for i in 0..64 {
            assert!(cache.insert(format!("key-{i}"), i, 40));
            assert!(cache.weight() <= cache.capacity());
        }
    }

    #[test]
    fn lru_eviction_order_within_shard() {
        let cache: ShardedLruCache<u64> = ShardedLruCache::new(NUM_SHARDS * 100);
        // All traffic through one shard via a single key prefix is not
        // guaranteed, so drive the shard directly.
        let shard = cache.shard("probe");
        {
            let mut s = shard.lock().unwrap();
            for (i, key) in ["a", "b", "c"].iter().enumerate() {
                let tick = s.next_tick;
                s.next_tick += 1;
                s.recency.insert(tick, key.to_string());
                s.entries.insert(
                    key.to_string(),
                    CacheEntry {
                        value: i as u64,
                        weight: 40,
                        tick,
                    },
                );
                s.used += 40;
            }
            // "a" becomes most recent, "b" is now coldest.
            s.touch("a");
            s.evict_to(100);
            assert!(s.entries.contains_key("a"));
            assert!(!s.entries.contains_key("b"));
            assert!(s.entries.contains_key("c"));
            assert_eq!(s.used, 80);
        }
    }

    #[test]
    fn erase_and_prune() {
        let cache = small_cache();
        cache.insert("a", 1, 10);
        cache.insert("b", 2, 10);
        cache.erase("a");
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));
        cache.prune();
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.weight(), 0);
    }
}
