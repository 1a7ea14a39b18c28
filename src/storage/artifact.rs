//! Content-addressed artifact cache.
//!
//! Entries are keyed by the SHA-256 digest of the raw input that produced
//! them, expire after a TTL and are bounded by an LRU capacity. Expired
//! entries are evicted lazily on lookup or in bulk by [`ArtifactCache::purge_expired`].

use lru::LruCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Default lifetime of a cached artifact.
pub const DEFAULT_TTL_SECS: u64 = 3600;

/// Default maximum number of cached artifacts.
pub const DEFAULT_CAPACITY: usize = 256;

/// Configuration for the artifact cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entries older than this are treated as misses.
    pub ttl: Duration,
    /// Maximum number of entries before least recently used ones are evicted.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Deterministic hash of an observation input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentKey(String);

impl ContentKey {
    /// Hex-encoded SHA-256 of `bytes`.
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for logs.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl std::fmt::Display for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Counters describing cache effectiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped because their TTL elapsed.
    pub expirations: u64,
    /// Entries dropped to respect the capacity bound.
    pub evictions: u64,
    pub entries: usize,
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

struct Entry<V> {
    payload: V,
    inserted_at: Instant,
}

struct Inner<V> {
    entries: LruCache<ContentKey, Entry<V>>,
    stats: CacheStats,
}

/// TTL- and capacity-bounded cache shared by workers across sessions.
pub struct ArtifactCache<V> {
    ttl: Duration,
    inner: Mutex<Inner<V>>,
}

impl<V: Clone> ArtifactCache<V> {
    /// Create a cache. A zero capacity is treated as one.
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl,
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                stats: CacheStats::default(),
            }),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.ttl, config.capacity)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_expired(&self, entry: &Entry<V>, now: Instant) -> bool {
        now.duration_since(entry.inserted_at) >= self.ttl
    }

    /// Look up a payload. Entries past their TTL count as misses and are evicted.
    pub async fn get(&self, key: &ContentKey) -> Option<V> {
        let now = Instant::now();
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let expired = match inner.entries.get(key) {
            Some(entry) if !self.is_expired(entry, now) => {
                let payload = entry.payload.clone();
                inner.stats.hits += 1;
                debug!(key = key.short(), "artifact cache hit");
                return Some(payload);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            inner.entries.pop(key);
            inner.stats.expirations += 1;
            debug!(key = key.short(), "artifact cache entry expired");
        }
        inner.stats.misses += 1;
        None
    }

    /// Insert or replace a payload, refreshing its insertion time.
    pub async fn insert(&self, key: ContentKey, payload: V) {
        let mut inner = self.inner.lock().await;
        let entry = Entry {
            payload,
            inserted_at: Instant::now(),
        };
        if let Some((evicted, _)) = inner.entries.push(key.clone(), entry) {
            if evicted != key {
                inner.stats.evictions += 1;
                debug!(key = evicted.short(), "artifact cache evicted entry");
            }
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        let expired: Vec<ContentKey> = inner
            .entries
            .iter()
            .filter(|(_, entry)| self.is_expired(entry, now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.entries.pop(key);
        }
        inner.stats.expirations += expired.len() as u64;
        if !expired.is_empty() {
            debug!(count = expired.len(), "purged expired artifacts");
        }
        expired.len()
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        CacheStats {
            entries: inner.entries.len(),
            ..inner.stats
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.entries.is_empty()
    }

    pub async fn clear(&self) {
        self.inner.lock().await.entries.clear();
    }
}
