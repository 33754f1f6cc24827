//! Recall result cache
//!
//! A small fingerprint-keyed map with TTL expiry. Eviction is lazy: an
//! expired entry is discarded by the read that finds it; no background
//! reaper runs. Reads and insertions may race freely across request
//! handlers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use sha2::{Digest, Sha256};

use super::{Associations, MemoryHit};

/// The cacheable part of a recall response. Request id and timing are
/// minted fresh on every call, cached or not.
#[derive(Debug, Clone)]
pub struct CachedRecall {
    pub memories: Vec<MemoryHit>,
    pub associations: Associations,
    pub strategy: String,
}

struct CacheEntry {
    payload: CachedRecall,
    created_at: Instant,
}

/// TTL cache keyed by query fingerprint
pub struct RecallCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RecallCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Fingerprint of the inputs that determine a recall outcome
    pub fn fingerprint(context: &str, kind: &str, top_k: usize) -> String {
        let digest = Sha256::digest(format!("{}|{}|{}", context, kind, top_k));
        hex::encode(digest)
    }

    /// Look up a fresh entry; expired entries are removed on sight
    pub fn get(&self, key: &str) -> Option<CachedRecall> {
        let expired = match self.entries.get(key) {
            Some(entry) => {
                if entry.created_at.elapsed() <= self.ttl {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.payload.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn insert(&self, key: String, payload: CachedRecall) {
        self.entries.insert(
            key,
            CacheEntry { payload, created_at: Instant::now() },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> CachedRecall {
        CachedRecall {
            memories: vec![],
            associations: Associations::default(),
            strategy: "semantic".to_string(),
        }
    }

    #[test]
    fn test_fingerprint_stable_and_distinct() {
        let a = RecallCache::fingerprint("上下文", "auto", 5);
        assert_eq!(a, RecallCache::fingerprint("上下文", "auto", 5));
        assert_ne!(a, RecallCache::fingerprint("上下文", "auto", 6));
        assert_ne!(a, RecallCache::fingerprint("上下文", "people", 5));
    }

    #[test]
    fn test_hit_within_ttl() {
        let cache = RecallCache::new(Duration::from_secs(60));
        cache.insert("k".to_string(), payload());
        assert!(cache.get("k").is_some());
        assert_eq!(cache.hit_count(), 1);
    }

    #[test]
    fn test_expired_entry_removed_lazily() {
        let cache = RecallCache::new(Duration::from_millis(0));
        cache.insert("k".to_string(), payload());
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.miss_count(), 1);
    }
}
