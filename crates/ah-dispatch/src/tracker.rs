//! Recent-jobs tracking store.
//!
//! A bounded LRU ring of job snapshots for introspection. Snapshots are
//! plain values; the store never holds a reference to a live job.

use parking_lot::Mutex;
use uuid::Uuid;

use ah_common::{JobPriority, JobState};

use crate::job::JobSnapshot;

/// Default number of snapshots retained.
pub const DEFAULT_TRACKER_CAPACITY: usize = 10_000;

/// Default `list` result cap.
pub const DEFAULT_LIST_LIMIT: usize = 100;

/// Filters for `list`.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub state: Option<JobState>,
    pub priority: Option<JobPriority>,
    pub target_name: Option<String>,
    pub limit: Option<usize>,
}

impl JobFilter {
    fn matches(&self, snapshot: &JobSnapshot) -> bool {
        if self.state.is_some_and(|state| snapshot.state != state) {
            return false;
        }
        if self
            .priority
            .is_some_and(|priority| snapshot.priority != priority)
        {
            return false;
        }
        if self
            .target_name
            .as_ref()
            .is_some_and(|name| &snapshot.target_name != name)
        {
            return false;
        }
        true
    }
}

pub struct JobTrackerStore {
    inner: Mutex<lru::LruCache<Uuid, JobSnapshot>>,
}

impl Default for JobTrackerStore {
    fn default() -> Self {
        Self::new(DEFAULT_TRACKER_CAPACITY)
    }
}

impl JobTrackerStore {
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        let capacity =
            std::num::NonZeroUsize::new(capacity).expect("tracker capacity must be non-zero");
        Self {
            inner: Mutex::new(lru::LruCache::new(capacity)),
        }
    }

    /// Insert or update a snapshot, evicting the least recently used entry
    /// on overflow.
    pub fn add(&self, snapshot: JobSnapshot) {
        self.inner.lock().put(snapshot.id, snapshot);
    }

    /// Fetch a snapshot, promoting it to most recently used.
    pub fn get(&self, id: &Uuid) -> Option<JobSnapshot> {
        self.inner.lock().get(id).cloned()
    }

    /// Iterate most-recently-used first, applying the filter and its limit
    /// (default 100).
    pub fn list(&self, filter: &JobFilter) -> Vec<JobSnapshot> {
        let limit = filter.limit.unwrap_or(DEFAULT_LIST_LIMIT);
        self.inner
            .lock()
            .iter()
            .filter(|(_, snapshot)| filter.matches(snapshot))
            .take(limit)
            .map(|(_, snapshot)| snapshot.clone())
            .collect()
    }

    pub fn remove(&self, id: &Uuid) -> Option<JobSnapshot> {
        self.inner.lock().pop(id)
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
