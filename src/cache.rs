//! Bounded cache for decoded, display-ready media.
//!
//! Holds `DecodedImage` payloads keyed by file identity and enforces two
//! ceilings at once: a maximum entry count and a maximum aggregate byte
//! budget. Eviction is strict LRU on access time and runs after every
//! insertion until both ceilings hold.
//!
//! Concurrency policy: one mutex guards all bookkeeping and is never held
//! across a decode. On a miss the loader runs outside the lock, so two
//! concurrent misses for the same key may both decode (duplicate-decode
//! tolerance); the later insert replaces the earlier one and the byte total
//! stays consistent. Chosen over wait-for-first to keep a single coarse lock.

use crate::media::DecodedImage;
use anyhow::Result;
use lru::LruCache;
use std::sync::{Arc, Mutex};

struct CacheInner {
    entries: LruCache<String, Arc<DecodedImage>>,
    total_bytes: u64,
}

/// Thread-safe decoded-media cache with count and byte budgets.
pub struct MediaCache {
    max_count: usize,
    max_bytes: u64,
    inner: Mutex<CacheInner>,
}

/// Snapshot of cache occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub count: usize,
    pub total_bytes: u64,
}

impl MediaCache {
    pub fn new(max_count: usize, max_bytes: u64) -> Self {
        assert!(max_count > 0, "cache needs room for at least one entry");
        Self {
            max_count,
            max_bytes,
            inner: Mutex::new(CacheInner {
                entries: LruCache::unbounded(),
                total_bytes: 0,
            }),
        }
    }

    /// Return the cached payload for `key`, or run `loader` to produce it.
    ///
    /// A hit only touches the LRU bookkeeping. A loader failure propagates
    /// without mutating cache state.
    pub fn get_or_load<F>(&self, key: &str, loader: F) -> Result<Arc<DecodedImage>>
    where
        F: FnOnce() -> Result<DecodedImage>,
    {
        {
            let mut inner = self.inner.lock().unwrap();
            // get() promotes the entry to most recently used.
            if let Some(payload) = inner.entries.get(key) {
                return Ok(Arc::clone(payload));
            }
        }

        // Decode outside the lock; see module docs for the same-key policy.
        let payload = Arc::new(loader()?);

        let mut inner = self.inner.lock().unwrap();
        let added = payload.byte_size();
        if let Some(previous) = inner.entries.put(key.to_string(), Arc::clone(&payload)) {
            inner.total_bytes -= previous.byte_size();
        }
        inner.total_bytes += added;
        self.evict_locked(&mut inner);
        tracing::debug!(
            key,
            bytes = added,
            total = inner.total_bytes,
            count = inner.entries.len(),
            "cached decoded media"
        );
        Ok(payload)
    }

    /// Drop one entry, e.g. after its backing file was deleted by sync.
    pub fn invalidate(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(payload) = inner.entries.pop(key) {
            inner.total_bytes -= payload.byte_size();
        }
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.clear();
        inner.total_bytes = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        CacheStats {
            count: inner.entries.len(),
            total_bytes: inner.total_bytes,
        }
    }

    /// Evict least-recently-used entries until both ceilings hold.
    fn evict_locked(&self, inner: &mut CacheInner) {
        while inner.entries.len() > self.max_count || inner.total_bytes > self.max_bytes {
            match inner.entries.pop_lru() {
                Some((key, payload)) => {
                    inner.total_bytes -= payload.byte_size();
                    tracing::debug!(key, "evicted decoded media");
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_of(bytes: usize) -> DecodedImage {
        DecodedImage {
            pixels: vec![0u8; bytes],
            width: 1,
            height: bytes as u32 / 4,
        }
    }

    fn load(cache: &MediaCache, key: &str, bytes: usize) {
        cache.get_or_load(key, || Ok(image_of(bytes))).unwrap();
    }

    fn assert_within_bounds(cache: &MediaCache, max_count: usize, max_bytes: u64) {
        let stats = cache.stats();
        assert!(stats.count <= max_count, "count {} over bound", stats.count);
        assert!(stats.total_bytes <= max_bytes, "bytes {} over bound", stats.total_bytes);
    }

    #[test]
    fn bounds_hold_after_every_call() {
        let cache = MediaCache::new(3, 1000);
        for i in 0..20 {
            load(&cache, &format!("k{i}"), 100 + i * 40);
            assert_within_bounds(&cache, 3, 1000);
        }
    }

    #[test]
    fn lru_eviction_respects_access_order() {
        // Capacity 2: insert A, B, touch A, insert C — B goes, A stays.
        let cache = MediaCache::new(2, u64::MAX);
        load(&cache, "a", 10);
        load(&cache, "b", 10);
        load(&cache, "a", 10); // hit, promotes A
        load(&cache, "c", 10);

        let mut hit_b = false;
        let mut hit_a = false;
        cache
            .get_or_load("a", || {
                hit_a = true;
                Ok(image_of(10))
            })
            .unwrap();
        cache
            .get_or_load("b", || {
                hit_b = true;
                Ok(image_of(10))
            })
            .unwrap();
        assert!(!hit_a, "A was evicted but should have been retained");
        assert!(hit_b, "B should have been evicted");
    }

    #[test]
    fn byte_budget_evicts_independently_of_count() {
        let cache = MediaCache::new(100, 250);
        load(&cache, "a", 100);
        load(&cache, "b", 100);
        load(&cache, "c", 100); // 300 bytes > 250: "a" must go
        let stats = cache.stats();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.total_bytes, 200);
    }

    #[test]
    fn loader_failure_leaves_state_untouched() {
        let cache = MediaCache::new(2, 1000);
        load(&cache, "a", 100);
        let err = cache.get_or_load("bad", || anyhow::bail!("decode exploded"));
        assert!(err.is_err());
        assert_eq!(cache.stats(), CacheStats { count: 1, total_bytes: 100 });
    }

    #[test]
    fn invalidate_and_clear_release_bytes() {
        let cache = MediaCache::new(10, 10_000);
        load(&cache, "a", 100);
        load(&cache, "b", 200);
        cache.invalidate("a");
        assert_eq!(cache.stats(), CacheStats { count: 1, total_bytes: 200 });
        cache.invalidate("missing"); // no-op
        cache.clear();
        assert_eq!(cache.stats(), CacheStats { count: 0, total_bytes: 0 });
    }

    #[test]
    fn duplicate_decode_is_tolerated_for_same_key() {
        // Documented policy: concurrent misses may both run the loader; the
        // second insert replaces the first and the byte total stays exact.
        let cache = Arc::new(MediaCache::new(4, 10_000));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    cache.get_or_load("same", || Ok(image_of(64))).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.stats(), CacheStats { count: 1, total_bytes: 64 });
    }
}
