//! Keyed in-memory cache with a freshness window.
//!
//! Uses `DashMap` so concurrent readers never contend. Staleness is checked
//! lazily on access; entries are superseded in place and never evicted.

use std::hash::Hash;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// A cached value with its fetch time.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub fetched_at: Instant,
}

impl<V> CacheEntry<V> {
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    /// Stale once strictly more than `ttl` has elapsed.
    pub fn is_stale(&self, ttl: Duration) -> bool {
        self.age() > ttl
    }
}

#[derive(Debug)]
pub struct TtlCache<K, V>
where
    K: Eq + Hash,
{
    entries: DashMap<K, CacheEntry<V>>,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Entry for `key`, fresh or not.
    pub fn get(&self, key: &K) -> Option<CacheEntry<V>> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    /// Value for `key` only while it is fresh.
    pub fn get_fresh(&self, key: &K) -> Option<V> {
        self.entries
            .get(key)
            .filter(|e| !e.is_stale(self.ttl))
            .map(|e| e.value.clone())
    }

    pub fn is_fresh(&self, key: &K) -> bool {
        self.entries
            .get(key)
            .map(|e| !e.is_stale(self.ttl))
            .unwrap_or(false)
    }

    /// Store `value` as fetched now, replacing any previous entry.
    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(
            key,
            CacheEntry {
                value,
                fetched_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
