//! Dispatch core: priority-queued, mode-gated delivery of alerts to targets.
//!
//! - `PriorityQueue`: bounded three-priority in-memory job store
//! - `WorkerPool`: bounded workers with retry scheduling and dead-lettering
//! - `ModeManager`: metrics-only vs normal, derived from discovery
//! - `JobTrackerStore`: recent-jobs LRU ring for introspection
//! - `Dispatcher`: the glue tying discovery, health, mode, queue, and the
//!   parallel publisher together

use std::time::Duration;

use thiserror::Error;

use ah_common::ErrorKind;
use ah_publisher::PublishError;

pub mod dispatcher;
pub mod job;
pub mod mode;
pub mod queue;
pub mod tracker;
pub mod worker;

pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherStats};
pub use job::{classify_priority, DispatchJob, JobSnapshot};
pub use mode::{ModeManager, ModeMetrics, ModeStatus};
pub use queue::{PriorityQueue, QueueStats};
pub use tracker::{JobFilter, JobTrackerStore};
pub use worker::{JobExecutor, WorkerPool, WorkerPoolConfig};

/// Errors surfaced by the dispatch layer.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("dispatcher is shutting down")]
    ShuttingDown,

    #[error("no enabled targets available")]
    NoTargets,

    #[error("job timed out after {timeout:?}")]
    JobTimeout { timeout: Duration },

    #[error(transparent)]
    Publish(#[from] PublishError),
}

impl DispatchError {
    /// Stable kind for retry policy and metrics labels.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::InvalidInput(_) => ErrorKind::Validation,
            DispatchError::QueueFull { .. } => ErrorKind::QueueFull,
            DispatchError::ShuttingDown => ErrorKind::ContextCancelled,
            DispatchError::NoTargets => ErrorKind::NoTargets,
            DispatchError::JobTimeout { .. } => ErrorKind::Timeout,
            DispatchError::Publish(err) => err.kind(),
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::collections::BTreeMap;

    use ah_common::{Alert, AlertStatus, EnrichedAlert, Target, TargetType};
    use chrono::{TimeZone, Utc};

    pub fn firing_alert(fingerprint: &str) -> EnrichedAlert {
        EnrichedAlert {
            alert: Alert {
                fingerprint: fingerprint.to_string(),
                name: "HighCpuUsage".to_string(),
                status: AlertStatus::Firing,
                labels: BTreeMap::from([("severity".to_string(), "critical".to_string())]),
                annotations: BTreeMap::new(),
                starts_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
                ends_at: None,
                generator_url: None,
            },
            classification: None,
            enrichment_metadata: None,
        }
    }

    pub fn webhook_target(name: &str, url: &str) -> Target {
        let mut target = Target::new(name, TargetType::Webhook, url);
        target.format = "webhook".to_string();
        target
    }
}
