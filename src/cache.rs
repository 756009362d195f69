//! Bounded response cache — LRU over request fingerprints, with TTL.
//!
//! Only successful unary bodies are admitted (streamed responses are
//! reassembled by the pipeline before admission). Entries expire after
//! `ttl_seconds` and are removed lazily on the `get` that observes them
//! expired. When the cache is full, `put` evicts the least-recently-used
//! entry.
//!
//! The lock is a plain `std::sync::Mutex` held only for map operations —
//! never across an await point.

use std::{
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
    time::{Duration, Instant},
};

use bytes::Bytes;
use lru::LruCache;
use serde::Serialize;

/// A cached unary response body.
#[derive(Debug, Clone)]
pub struct CachedEntry {
    pub body: Bytes,
    pub content_type: String,
    created_at: Instant,
    last_access_at: Instant,
}

pub struct ResponseCache {
    entries: Mutex<LruCache<String, CachedEntry>>,
    ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_entries.max(1)).expect("max(1) is non-zero");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a fingerprint. Expired entries count as misses and are removed.
    pub fn get(&self, fingerprint: &str, now: Instant) -> Option<CachedEntry> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");

        let expired = match entries.get(fingerprint) {
            Some(entry) => now.duration_since(entry.created_at) >= self.ttl,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if expired {
            entries.pop(fingerprint);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let entry = entries.get_mut(fingerprint).expect("entry checked above");
        entry.last_access_at = now;
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.clone())
    }

    /// Insert a successful response body. Evicts the LRU entry when full.
    pub fn put(&self, fingerprint: String, body: Bytes, content_type: &str, now: Instant) {
        let entry = CachedEntry {
            body,
            content_type: content_type.to_string(),
            created_at: now,
            last_access_at: now,
        };
        self.entries
            .lock()
            .expect("cache lock poisoned")
            .put(fingerprint, entry);
    }

    /// Drop every entry; returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        let cleared = entries.len();
        entries.clear();
        cleared
    }

    pub fn stats(&self) -> CacheStats {
        let size = self.entries.lock().expect("cache lock poisoned").len();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        };
        CacheStats {
            size,
            hits,
            misses,
            hit_rate,
            ttl_seconds: self.ttl.as_secs(),
            max_size: self.max_entries,
        }
    }
}

/// Shape of `GET /cache/stats`.
#[derive(Debug, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub ttl_seconds: u64,
    pub max_size: usize,
}
