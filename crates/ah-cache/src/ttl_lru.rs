//! Bounded LRU cache with per-entry TTL and eviction accounting.
//!
//! Backed by `lru::LruCache` (hashmap plus recency list, O(1) per op) behind
//! a single mutex. The mutex is never held across an await point, so the
//! cache is safe to share between worker tasks.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::cleanup::{spawn_cleanup, CleanupHandle};

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    pub capacity: usize,
    /// Fraction of `get` calls that hit, in `[0, 1]`. Zero when no gets yet.
    pub hit_rate: f64,
}

/// Evictions broken down by reason.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReasons {
    /// Displaced by a newer entry under capacity pressure.
    pub lru: u64,
    /// Expired and removed on access or during a cleanup sweep.
    pub ttl: u64,
    /// Removed via `delete`.
    pub manual: u64,
    /// Dropped by a bulk `clear`.
    pub clear: u64,
}

impl EvictionReasons {
    fn total(&self) -> u64 {
        self.lru + self.ttl + self.manual + self.clear
    }
}

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    expires_at: Instant,
    last_access: Instant,
}

struct Inner<V> {
    entries: lru::LruCache<String, CacheEntry<V>>,
    hits: u64,
    misses: u64,
    evictions: EvictionReasons,
}

/// Bounded mapping from string keys to values with recency eviction and
/// per-entry expiry.
pub struct TtlLruCache<V> {
    inner: Mutex<Inner<V>>,
    default_ttl: Duration,
}

impl<V: Clone> TtlLruCache<V> {
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        let capacity =
            std::num::NonZeroUsize::new(capacity).expect("cache capacity must be non-zero");
        Self {
            inner: Mutex::new(Inner {
                entries: lru::LruCache::new(capacity),
                hits: 0,
                misses: 0,
                evictions: EvictionReasons::default(),
            }),
            default_ttl,
        }
    }

    /// Insert or update an entry. A zero `ttl` selects the default TTL.
    ///
    /// Updating an existing key refreshes value and expiry in place; it does
    /// not count as an insertion and never evicts.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let now = Instant::now();
        let ttl = if ttl.is_zero() { self.default_ttl } else { ttl };

        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if let Some(entry) = inner.entries.get_mut(&key) {
            entry.value = value;
            entry.expires_at = now + ttl;
            entry.last_access = now;
            return;
        }

        if inner.entries.len() == inner.entries.cap().get() {
            inner.evictions.lru += 1;
        }
        inner.entries.push(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                expires_at: now + ttl,
                last_access: now,
            },
        );
    }

    /// Look up an entry, promoting it to most-recently-used on a hit.
    ///
    /// An expired entry is removed, counted under the `ttl` eviction reason,
    /// and reported as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let expired = match inner.entries.get_mut(key) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(entry) => {
                if now < entry.expires_at {
                    entry.last_access = now;
                    inner.hits += 1;
                    return Some(entry.value.clone());
                }
                true
            }
        };

        if expired {
            inner.entries.pop(key);
            inner.evictions.ttl += 1;
            inner.misses += 1;
        }
        None
    }

    /// Remove an entry, counted under the `manual` eviction reason.
    pub fn delete(&self, key: &str) -> bool {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.entries.pop(key).is_some() {
            inner.evictions.manual += 1;
            true
        } else {
            false
        }
    }

    /// Drop all entries, counting them under the `clear` reason, and reset
    /// the hit/miss counters.
    pub fn clear(&self) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let dropped = inner.entries.len() as u64;
        inner.entries.clear();
        inner.hits = 0;
        inner.misses = 0;
        inner.evictions.clear += dropped;
    }

    /// Remove every expired entry; returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| now >= entry.expires_at)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            inner.entries.pop(key);
            inner.evictions.ttl += 1;
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let gets = inner.hits + inner.misses;
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions.total(),
            size: inner.entries.len(),
            capacity: inner.entries.cap().get(),
            hit_rate: if gets == 0 {
                0.0
            } else {
                inner.hits as f64 / gets as f64
            },
        }
    }

    pub fn eviction_reasons(&self) -> EvictionReasons {
        self.inner.lock().evictions
    }

    /// Age of an entry since insertion, if present and not expired.
    pub fn age(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let guard = self.inner.lock();
        guard
            .entries
            .peek(key)
            .filter(|entry| now < entry.expires_at)
            .map(|entry| now.duration_since(entry.inserted_at))
    }
}

impl<V: Clone + Send + 'static> TtlLruCache<V> {
    /// Start a periodic expiry sweep for this cache. Callers keeping their
    /// own handle pass a clone: `cache.clone().start_cleanup(interval)`.
    pub fn start_cleanup(self: Arc<Self>, interval: Duration) -> CleanupHandle {
        spawn_cleanup("ttl_lru", interval, move || self.cleanup_expired())
    }
}
