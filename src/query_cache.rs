//! Query Cache (C7): in-memory LRU cache of retrieval results, keyed by a
//! fingerprint of the query embedding plus retrieval parameters
//!
//! Grounded on the teacher's `cache::LlmCache` for its TTL-via-chrono idiom,
//! stats struct shape, and temperature-style "don't cache everything" gate
//! (here: an empty result set is never cached). The backing store itself
//! is swapped from the teacher's SQLite table to an in-process
//! `lru::LruCache` guarded by `parking_lot::Mutex`, since query-cache
//! entries don't need to survive a restart and a lock-protected LRU avoids
//! a database round trip on every query.

use crate::vector_store::Hit;
use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

struct Entry {
    hits: Vec<Hit>,
    stored_at: DateTime<Utc>,
}

/// Cache statistics (§4.7)
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Thread-safe LRU cache of retrieval results with TTL expiry
pub struct QueryCache {
    inner: Mutex<LruCache<String, Entry>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QueryCache {
    pub fn new(capacity: usize, ttl_sec: i64) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl: Duration::seconds(ttl_sec.max(0)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Build a cache key from the query embedding's leading components and
    /// the retrieval parameters that affect the result set. Using a prefix
    /// of the embedding rather than the full vector keeps key computation
    /// cheap while still being effectively unique per distinct query.
    pub fn fingerprint(embedding: &[f32], top_k: usize, file_type_filter: Option<&str>) -> String {
        let mut hasher = Sha256::new();
        for value in embedding.iter().take(10) {
            hasher.update(value.to_bits().to_le_bytes());
        }
        hasher.update(top_k.to_le_bytes());
        if let Some(filter) = file_type_filter {
            hasher.update(filter.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// Look up `key`, returning `None` on a miss or an expired entry. An
    /// expired entry is evicted on lookup rather than left for the LRU
    /// policy to discover.
    pub fn get(&self, key: &str) -> Option<Vec<Hit>> {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.get(key) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if Utc::now().signed_duration_since(entry.stored_at) > self.ttl {
            inner.pop(key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.hits.clone())
    }

    /// Store `hits` under `key`. Empty result sets are not cached, since
    /// caching "no hits" for a query that might return results once more
    /// documents are ingested would hide genuinely new matches.
    pub fn put(&self, key: String, hits: Vec<Hit>) {
        if hits.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        inner.put(
            key,
            Entry {
                hits,
                stored_at: Utc::now(),
            },
        );
    }

    /// Drop every cached entry (used by the `/api/flush_documents` facade
    /// so stale results don't outlive the documents they were computed
    /// from; see P8)
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.inner.lock().len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit() -> Hit {
        Hit {
            file_path: "a.txt".to_string(),
            file_name: "a.txt".to_string(),
            file_type: "txt".to_string(),
            chunk_index: 0,
            content_preview: "preview".to_string(),
            content: "content".to_string(),
            file_size: 10,
            similarity: 0.9,
        }
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let a = QueryCache::fingerprint(&[1.0, 2.0, 3.0], 10, None);
        let b = QueryCache::fingerprint(&[1.0, 2.0, 3.0], 10, None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_differs_by_top_k() {
        let a = QueryCache::fingerprint(&[1.0, 2.0], 5, None);
        let b = QueryCache::fingerprint(&[1.0, 2.0], 10, None);
        assert_ne!(a, b);
    }

    #[test]
    fn test_miss_then_hit() {
        let cache = QueryCache::new(10, 300);
        let key = "k".to_string();
        assert!(cache.get(&key).is_none());
        cache.put(key.clone(), vec![hit()]);
        assert_eq!(cache.get(&key).unwrap().len(), 1);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_empty_results_not_cached() {
        let cache = QueryCache::new(10, 300);
        cache.put("k".to_string(), vec![]);
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn test_expired_entry_evicted() {
        let cache = QueryCache::new(10, -1);
        cache.put("k".to_string(), vec![hit()]);
        assert!(cache.get("k").is_none());
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn test_clear() {
        let cache = QueryCache::new(10, 300);
        cache.put("k".to_string(), vec![hit()]);
        cache.clear();
        assert_eq!(cache.stats().size, 0);
    }
}
