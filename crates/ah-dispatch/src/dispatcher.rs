//! Dispatcher: the top of the publishing pipeline.
//!
//! Ties discovery, health, mode, the priority queue, the worker pool, and
//! the parallel publisher together. `dispatch` is the asynchronous path
//! (one queued job per enabled target); `publish_sync` fans out inline and
//! waits for the aggregate result.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use ah_common::{EnrichedAlert, Mode};
use ah_discovery::TargetDiscovery;
use ah_publisher::{
    HealthMonitor, MultiPublishFailure, MultiPublishOptions, MultiPublishResult, MultiPublisher,
    PublisherSet,
};

use crate::job::{classify_priority, DispatchJob};
use crate::mode::{ModeManager, ModeStatus};
use crate::queue::{PriorityQueue, QueueStats};
use crate::tracker::JobTrackerStore;
use crate::worker::{WorkerPool, WorkerPoolConfig};
use crate::DispatchError;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub queue_capacity: usize,
    pub worker: WorkerPoolConfig,
    pub multi: MultiPublishOptions,
    pub tracker_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            worker: WorkerPoolConfig::default(),
            multi: MultiPublishOptions::default(),
            tracker_capacity: crate::tracker::DEFAULT_TRACKER_CAPACITY,
        }
    }
}

/// Introspection snapshot of the whole dispatch pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStats {
    pub queue: QueueStats,
    pub tracked_jobs: usize,
    pub skipped_jobs: u64,
    pub discovered_targets: usize,
    pub enabled_targets: usize,
    pub mode: Mode,
    pub mode_transitions: u64,
}

pub struct Dispatcher {
    discovery: Arc<TargetDiscovery>,
    mode: Arc<ModeManager>,
    queue: Arc<PriorityQueue>,
    workers: WorkerPool,
    tracker: Arc<JobTrackerStore>,
    multi: MultiPublisher,
}

impl Dispatcher {
    /// Build the pipeline and start its workers.
    pub fn new(
        discovery: Arc<TargetDiscovery>,
        publishers: Arc<PublisherSet>,
        health: Arc<HealthMonitor>,
        config: DispatcherConfig,
    ) -> Arc<Self> {
        let mode = Arc::new(ModeManager::new());
        let queue = Arc::new(PriorityQueue::new(config.queue_capacity));
        let tracker = Arc::new(JobTrackerStore::new(config.tracker_capacity));
        let workers = WorkerPool::new(
            queue.clone(),
            publishers.clone(),
            mode.clone(),
            tracker.clone(),
            config.worker,
        );
        workers.start();

        let multi = MultiPublisher::new(publishers, health, config.multi);

        info!(queue_capacity = config.queue_capacity, "Dispatcher started");
        Arc::new(Self {
            discovery,
            mode,
            queue,
            workers,
            tracker,
            multi,
        })
    }

    /// Enqueue one job per enabled target at the alert's priority.
    ///
    /// In metrics-only mode the alert is observed and counted but nothing
    /// is queued; the return value is the number of jobs submitted.
    pub async fn dispatch(&self, alert: &EnrichedAlert) -> Result<usize, DispatchError> {
        alert
            .validate()
            .map_err(|e| DispatchError::InvalidInput(e.to_string()))?;

        let (mode, _) = self
            .mode
            .check_mode_transition(self.discovery.enabled_count());
        if mode == Mode::MetricsOnly {
            metrics::counter!("publishing_jobs_skipped_total").increment(1);
            debug!(
                fingerprint = %alert.alert.fingerprint,
                "Metrics-only mode, observing without publishing"
            );
            return Ok(0);
        }

        let targets = self.discovery.enabled_targets();
        if targets.is_empty() {
            return Err(DispatchError::NoTargets);
        }

        let priority = classify_priority(alert);
        let mut submitted = 0;
        for target in targets {
            let job = DispatchJob::new(alert.clone(), target, priority);
            self.tracker.add(job.snapshot());
            self.queue.submit(job)?;
            submitted += 1;
        }
        debug!(
            fingerprint = %alert.alert.fingerprint,
            priority = priority.as_str(),
            jobs = submitted,
            "Alert dispatched"
        );
        Ok(submitted)
    }

    /// Synchronous fan-out to every enabled target.
    pub async fn publish_sync(
        &self,
        alert: &EnrichedAlert,
    ) -> Result<MultiPublishResult, MultiPublishFailure> {
        self.mode
            .check_mode_transition(self.discovery.enabled_count());
        let targets = self.discovery.enabled_targets();
        self.multi.publish_to_multiple(alert, &targets).await
    }

    pub fn mode_manager(&self) -> &Arc<ModeManager> {
        &self.mode
    }

    pub fn tracker(&self) -> &Arc<JobTrackerStore> {
        &self.tracker
    }

    /// Re-derive the mode from the current discovery state.
    pub fn sync_mode(&self) -> (Mode, bool) {
        self.mode
            .check_mode_transition(self.discovery.enabled_count())
    }

    /// The mode observability payload.
    pub fn mode_status(&self) -> ModeStatus {
        self.mode
            .status(self.discovery.len(), self.discovery.enabled_count())
    }

    pub fn stats(&self) -> DispatcherStats {
        let mode_metrics = self.mode.metrics();
        DispatcherStats {
            queue: self.queue.stats(),
            tracked_jobs: self.tracker.len(),
            skipped_jobs: self.workers.skipped_count(),
            discovered_targets: self.discovery.len(),
            enabled_targets: self.discovery.enabled_count(),
            mode: mode_metrics.current_mode,
            mode_transitions: mode_metrics.transition_count,
        }
    }

    /// Stop accepting work and drain in-flight jobs.
    pub async fn shutdown(&self) {
        info!("Dispatcher shutting down");
        self.workers.shutdown().await;
    }
}
