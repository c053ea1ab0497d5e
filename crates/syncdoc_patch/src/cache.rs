//! Bounded, TTL-evicted cache of computed deltas.

use crate::operation::PatchOp;
use std::collections::HashMap;
use std::time::{Duration, Instant};

const DEFAULT_CAPACITY: usize = 50;
const DEFAULT_TTL: Duration = Duration::from_secs(60);

struct CacheEntry {
    ops: Vec<PatchOp>,
    inserted_at: Instant,
}

/// Memoizes delta computation for repeated version pairs.
///
/// Entries are keyed by `base-target` version pair and bounded both in
/// count and in age. The cache is owned by the component that computes
/// deltas; `cleanup` is driven by the document manager's
/// garbage-collection pass. There is no ambient global state.
pub struct DeltaCache {
    entries: HashMap<String, CacheEntry>,
    capacity: usize,
    ttl: Duration,
}

impl DeltaCache {
    /// Creates a cache with the default capacity and TTL.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_CAPACITY, DEFAULT_TTL)
    }

    /// Creates a cache with explicit bounds.
    pub fn with_limits(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
            ttl,
        }
    }

    fn key(base: u64, target: u64) -> String {
        format!("{base}-{target}")
    }

    /// Returns the cached operations for a version pair, if fresh.
    pub fn get(&self, base: u64, target: u64, now: Instant) -> Option<Vec<PatchOp>> {
        self.entries
            .get(&Self::key(base, target))
            .filter(|entry| now.duration_since(entry.inserted_at) < self.ttl)
            .map(|entry| entry.ops.clone())
    }

    /// Inserts operations for a version pair, evicting the oldest entry
    /// when at capacity.
    pub fn insert(&mut self, base: u64, target: u64, ops: Vec<PatchOp>, now: Instant) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&Self::key(base, target))
        {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(key, _)| key.clone());
            if let Some(key) = oldest {
                self.entries.remove(&key);
                tracing::trace!(key = %key, "cache full; oldest entry evicted");
            }
        }
        self.entries.insert(
            Self::key(base, target),
            CacheEntry {
                ops,
                inserted_at: now,
            },
        );
    }

    /// Drops all expired entries.
    pub fn cleanup(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, entry| now.duration_since(entry.inserted_at) < ttl);
    }

    /// Returns the number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for DeltaCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ops() -> Vec<PatchOp> {
        vec![PatchOp::replace("/a", json!(1))]
    }

    #[test]
    fn insert_and_get() {
        let mut cache = DeltaCache::new();
        let now = Instant::now();
        cache.insert(1, 2, ops(), now);
        assert_eq!(cache.get(1, 2, now), Some(ops()));
        assert_eq!(cache.get(2, 3, now), None);
    }

    #[test]
    fn entries_expire() {
        let mut cache = DeltaCache::with_limits(10, Duration::from_secs(60));
        let now = Instant::now();
        cache.insert(1, 2, ops(), now);
        assert!(cache.get(1, 2, now + Duration::from_secs(59)).is_some());
        assert!(cache.get(1, 2, now + Duration::from_secs(61)).is_none());
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut cache = DeltaCache::with_limits(2, Duration::from_secs(60));
        let now = Instant::now();
        cache.insert(1, 2, ops(), now);
        cache.insert(2, 3, ops(), now + Duration::from_secs(1));
        cache.insert(3, 4, ops(), now + Duration::from_secs(2));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(1, 2, now + Duration::from_secs(2)).is_none());
        assert!(cache.get(3, 4, now + Duration::from_secs(2)).is_some());
    }

    #[test]
    fn cleanup_drops_expired() {
        let mut cache = DeltaCache::with_limits(10, Duration::from_secs(10));
        let now = Instant::now();
        cache.insert(1, 2, ops(), now);
        cache.insert(2, 3, ops(), now + Duration::from_secs(8));
        cache.cleanup(now + Duration::from_secs(12));
        assert_eq!(cache.len(), 1);
        assert!(cache.get(2, 3, now + Duration::from_secs(12)).is_some());
    }
}
