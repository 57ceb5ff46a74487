//! Fingerprint-to-correlation-key caches.
//!
//! Providers return a correlation key on the first (firing) event (a
//! PagerDuty dedup key, a Slack message timestamp, a Rootly incident id)
//! and later state changes must reference it. These caches hold that
//! mapping with a TTL deliberately longer than any expected incident
//! lifetime (default 24 h), so a late resolve still correlates.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::cleanup::{spawn_cleanup, CleanupHandle};

/// Default correlation TTL.
pub const DEFAULT_CORRELATION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default interval between cleanup sweeps.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

struct TtlEntry<V> {
    value: V,
    expires_at: Instant,
}

/// Concurrent string-keyed map with per-entry expiry.
///
/// `load` removes an expired entry on access; `cleanup_expired` sweeps the
/// rest. All operations are lock-free reads/writes on a sharded map, so the
/// cache is shared freely across worker tasks.
pub struct TtlMap<V> {
    entries: DashMap<String, TtlEntry<V>>,
    default_ttl: Duration,
}

impl<V: Clone> TtlMap<V> {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
        }
    }

    pub fn store(&self, key: impl Into<String>, value: V) {
        self.store_with_ttl(key, value, self.default_ttl);
    }

    pub fn store_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        self.entries.insert(
            key.into(),
            TtlEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn load(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let hit = self.entries.get(key).and_then(|entry| {
            if now < entry.expires_at {
                Some(entry.value.clone())
            } else {
                None
            }
        });
        if hit.is_none() {
            drop(self.entries.remove_if(key, |_, entry| now >= entry.expires_at));
        }
        hit
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.entries.remove(key).map(|(_, entry)| entry.value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every expired entry; returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| now >= entry.value().expires_at)
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for key in expired {
            if self
                .entries
                .remove_if(&key, |_, entry| now >= entry.expires_at)
                .is_some()
            {
                removed += 1;
            }
        }
        removed
    }
}

// ============================================================================
// EventKeyCache (PagerDuty dedup keys)
// ============================================================================

/// Maps alert fingerprints to provider dedup keys.
///
/// A firing alert stores the dedup key returned by the trigger call; the
/// matching resolve looks it up and forgets it afterwards.
pub struct EventKeyCache {
    map: TtlMap<String>,
}

impl Default for EventKeyCache {
    fn default() -> Self {
        Self::new(DEFAULT_CORRELATION_TTL)
    }
}

impl EventKeyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            map: TtlMap::new(ttl),
        }
    }

    pub fn track(&self, fingerprint: impl Into<String>, dedup_key: impl Into<String>) {
        self.map.store(fingerprint, dedup_key.into());
    }

    pub fn lookup(&self, fingerprint: &str) -> Option<String> {
        self.map.load(fingerprint)
    }

    pub fn forget(&self, fingerprint: &str) -> Option<String> {
        self.map.remove(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn cleanup_expired(&self) -> usize {
        self.map.cleanup_expired()
    }

    pub fn start_cleanup(self: Arc<Self>, interval: Duration) -> CleanupHandle {
        spawn_cleanup("event_key", interval, move || self.cleanup_expired())
    }
}

// ============================================================================
// MessageCache (Slack threading)
// ============================================================================

/// Provider-side identifiers of the parent chat message for an alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEntry {
    pub message_ts: String,
    pub thread_ts: String,
    pub created_at: DateTime<Utc>,
}

/// Maps alert fingerprints to the chat message that opened the thread.
///
/// The first (firing) alert posts the parent message; every later state
/// change for the same fingerprint replies in that thread.
pub struct MessageCache {
    map: TtlMap<MessageEntry>,
}

impl Default for MessageCache {
    fn default() -> Self {
        Self::new(DEFAULT_CORRELATION_TTL)
    }
}

impl MessageCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            map: TtlMap::new(ttl),
        }
    }

    pub fn record(
        &self,
        fingerprint: impl Into<String>,
        message_ts: impl Into<String>,
        thread_ts: impl Into<String>,
    ) {
        self.map.store(
            fingerprint,
            MessageEntry {
                message_ts: message_ts.into(),
                thread_ts: thread_ts.into(),
                created_at: Utc::now(),
            },
        );
    }

    pub fn lookup(&self, fingerprint: &str) -> Option<MessageEntry> {
        let entry = self.map.load(fingerprint);
        match entry {
            Some(_) => metrics::counter!("slack_cache_hits_total").increment(1),
            None => metrics::counter!("slack_cache_misses_total").increment(1),
        }
        entry
    }

    pub fn forget(&self, fingerprint: &str) -> Option<MessageEntry> {
        self.map.remove(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn cleanup_expired(&self) -> usize {
        let removed = self.map.cleanup_expired();
        metrics::gauge!("slack_cache_size").set(self.map.len() as f64);
        removed
    }

    pub fn start_cleanup(self: Arc<Self>, interval: Duration) -> CleanupHandle {
        spawn_cleanup("message", interval, move || self.cleanup_expired())
    }
}

// ============================================================================
// IncidentIdCache (Rootly incidents)
// ============================================================================

/// Maps alert fingerprints to Rootly incident ids.
pub struct IncidentIdCache {
    map: TtlMap<String>,
}

impl Default for IncidentIdCache {
    fn default() -> Self {
        Self::new(DEFAULT_CORRELATION_TTL)
    }
}

impl IncidentIdCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            map: TtlMap::new(ttl),
        }
    }

    pub fn track(&self, fingerprint: impl Into<String>, incident_id: impl Into<String>) {
        self.map.store(fingerprint, incident_id.into());
    }

    pub fn lookup(&self, fingerprint: &str) -> Option<String> {
        self.map.load(fingerprint)
    }

    pub fn forget(&self, fingerprint: &str) -> Option<String> {
        self.map.remove(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn cleanup_expired(&self) -> usize {
        self.map.cleanup_expired()
    }

    pub fn start_cleanup(self: Arc<Self>, interval: Duration) -> CleanupHandle {
        spawn_cleanup("incident_id", interval, move || self.cleanup_expired())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_map_store_load_remove() {
        let map: TtlMap<String> = TtlMap::new(Duration::from_secs(60));
        map.store("fp1", "key1".to_string());
        assert_eq!(map.load("fp1"), Some("key1".to_string()));
        assert_eq!(map.remove("fp1"), Some("key1".to_string()));
        assert_eq!(map.load("fp1"), None);
    }

    #[test]
    fn ttl_map_expires_on_load() {
        let map: TtlMap<String> = TtlMap::new(Duration::from_nanos(1));
        map.store("fp1", "key1".to_string());
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(map.load("fp1"), None);
        assert!(map.is_empty());
    }

    #[test]
    fn ttl_map_cleanup_removes_only_expired() {
        let map: TtlMap<String> = TtlMap::new(Duration::from_secs(60));
        map.store_with_ttl("stale", "v".to_string(), Duration::from_nanos(1));
        map.store("fresh", "v".to_string());
        std::thread::sleep(Duration::from_millis(2));

        assert_eq!(map.cleanup_expired(), 1);
        assert_eq!(map.len(), 1);
        assert_eq!(map.load("fresh"), Some("v".to_string()));
    }

    #[test]
    fn event_key_cache_track_lookup_forget() {
        let cache = EventKeyCache::default();
        cache.track("fp1", "pd1");
        assert_eq!(cache.lookup("fp1"), Some("pd1".to_string()));
        assert_eq!(cache.forget("fp1"), Some("pd1".to_string()));
        assert_eq!(cache.lookup("fp1"), None);
    }

    #[test]
    fn message_cache_keeps_thread_ts() {
        let cache = MessageCache::default();
        cache.record("fp1", "1700000000.000100", "1700000000.000100");
        let entry = cache.lookup("fp1").unwrap();
        assert_eq!(entry.message_ts, entry.thread_ts);
        assert!(cache.lookup("fp2").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_task_sweeps_and_stops_within_one_tick() {
        // Nanosecond TTL: entries are expired in wall-clock terms immediately,
        // while the paused tokio clock drives the sweep ticks.
        let cache = Arc::new(EventKeyCache::new(Duration::from_nanos(1)));
        cache.track("fp1", "pd1");
        let handle = cache.clone().start_cleanup(Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(cache.is_empty());

        handle.stop();
        tokio::task::yield_now().await;
        cache.track("fp2", "pd2");
        tokio::time::sleep(Duration::from_secs(30)).await;
        // No sweep ran after stop: the expired entry is still resident.
        assert_eq!(cache.len(), 1);
    }
}
