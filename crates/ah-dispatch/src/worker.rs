//! Worker pool: executes queued jobs with retry scheduling.
//!
//! Workers dequeue by priority, gate on the mode manager (metrics-only jobs
//! are dropped, not retried), execute with a per-job timeout, and classify
//! failures: transient kinds are rescheduled with capped exponential
//! backoff, everything else dead-letters immediately. Terminal jobs are
//! snapshotted into the tracking store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use ah_common::{EnrichedAlert, ErrorKind, JobState, Target};
use ah_publisher::{PublishError, PublisherSet};

use crate::job::DispatchJob;
use crate::mode::ModeManager;
use crate::queue::PriorityQueue;
use crate::tracker::JobTrackerStore;
use crate::DispatchError;

/// Executes one job's delivery. The publisher set is the production
/// implementation; tests substitute stubs.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, alert: &EnrichedAlert, target: &Target) -> Result<(), PublishError>;
}

#[async_trait]
impl JobExecutor for PublisherSet {
    async fn execute(&self, alert: &EnrichedAlert, target: &Target) -> Result<(), PublishError> {
        self.publish(alert, target).await
    }
}

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of concurrent workers.
    pub workers: usize,
    /// Worker-level retries per job, on top of any transport retries.
    pub max_retries: u32,
    pub retry_base: Duration,
    pub retry_max: Duration,
    /// Per-job execution timeout.
    pub job_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_retries: 3,
            retry_base: Duration::from_secs(1),
            retry_max: Duration::from_secs(60),
            job_timeout: Duration::from_secs(30),
        }
    }
}

/// State shared between the pool handle and its worker tasks.
struct PoolShared {
    queue: Arc<PriorityQueue>,
    executor: Arc<dyn JobExecutor>,
    mode: Arc<ModeManager>,
    tracker: Arc<JobTrackerStore>,
    config: WorkerPoolConfig,
    retry_timers: Mutex<Vec<JoinHandle<()>>>,
    skipped: AtomicU64,
}

pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<PriorityQueue>,
        executor: Arc<dyn JobExecutor>,
        mode: Arc<ModeManager>,
        tracker: Arc<JobTrackerStore>,
        config: WorkerPoolConfig,
    ) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                queue,
                executor,
                mode,
                tracker,
                config,
                retry_timers: Mutex::new(Vec::new()),
                skipped: AtomicU64::new(0),
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker tasks. Callers start the pool once.
    pub fn start(&self) {
        let worker_count = self.shared.config.workers.max(1);
        let mut workers = self.workers.lock();
        for worker_id in 0..worker_count {
            let shared = Arc::clone(&self.shared);
            workers.push(tokio::spawn(async move {
                debug!(worker_id = worker_id, "Dispatch worker started");
                while let Some(job) = shared.queue.pop().await {
                    PoolShared::process(&shared, job).await;
                }
                debug!(worker_id = worker_id, "Dispatch worker exited");
            }));
        }
        info!(workers = worker_count, "Worker pool started");
    }

    /// Jobs dropped because the pipeline was in metrics-only mode.
    pub fn skipped_count(&self) -> u64 {
        self.shared.skipped.load(Ordering::Relaxed)
    }

    /// Close the queue, stop retry timers, and wait for in-flight jobs to
    /// finish.
    pub async fn shutdown(&self) {
        info!("Worker pool shutting down");
        self.shared.queue.close();
        for timer in self.shared.retry_timers.lock().drain(..) {
            timer.abort();
        }
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for worker in workers {
            let _ = worker.await;
        }
    }
}

impl PoolShared {
    async fn process(shared: &Arc<PoolShared>, mut job: DispatchJob) {
        // Mode gate: in metrics-only the job is observed, counted, and
        // dropped. No retry.
        if shared.mode.is_metrics_only() {
            shared.skipped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("publishing_jobs_skipped_total").increment(1);
            debug!(
                job_id = %job.id,
                fingerprint = %job.alert.alert.fingerprint,
                "Dropping job in metrics-only mode"
            );
            return;
        }

        job.state = JobState::Processing;
        job.started_at = Some(Utc::now());
        shared.tracker.add(job.snapshot());

        let outcome = tokio::time::timeout(
            shared.config.job_timeout,
            shared.executor.execute(&job.alert, &job.target),
        )
        .await;

        let error: Option<(ErrorKind, String)> = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some((err.kind(), err.to_string())),
            Err(_) => {
                let err = DispatchError::JobTimeout {
                    timeout: shared.config.job_timeout,
                };
                Some((err.kind(), err.to_string()))
            }
        };

        match error {
            None => {
                job.state = JobState::Succeeded;
                job.completed_at = Some(Utc::now());
                job.error_kind = None;
                job.last_error = None;
                shared.tracker.add(job.snapshot());
                debug!(job_id = %job.id, "Job succeeded");
            }
            Some((kind, message)) => {
                job.error_kind = Some(kind);
                job.last_error = Some(message.clone());

                if kind.is_retryable() && job.retry_count < shared.config.max_retries {
                    Self::schedule_retry(shared, job, kind, message);
                } else {
                    job.state = JobState::DeadLetter;
                    job.completed_at = Some(Utc::now());
                    shared.tracker.add(job.snapshot());
                    warn!(
                        job_id = %job.id,
                        target_name = %job.target.name,
                        error_kind = kind.as_str(),
                        error = %message,
                        retries = job.retry_count,
                        "Job dead-lettered"
                    );
                    metrics::counter!(
                        "publishing_jobs_dead_letter_total",
                        "type" => kind.as_str(),
                    )
                    .increment(1);
                }
            }
        }
    }

    fn schedule_retry(
        shared: &Arc<PoolShared>,
        mut job: DispatchJob,
        kind: ErrorKind,
        message: String,
    ) {
        job.retry_count += 1;
        job.state = JobState::Retrying;
        shared.tracker.add(job.snapshot());
        metrics::counter!("publishing_retries_total").increment(1);

        let delay = retry_delay(
            shared.config.retry_base,
            shared.config.retry_max,
            job.retry_count,
        );
        debug!(
            job_id = %job.id,
            retry = job.retry_count,
            max_retries = shared.config.max_retries,
            delay_ms = delay.as_millis() as u64,
            error_kind = kind.as_str(),
            error = %message,
            "Scheduling job retry"
        );

        let pool = Arc::clone(shared);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            job.state = JobState::Queued;
            let job_id = job.id;
            let snapshot = job.snapshot();
            if let Err(err) = pool.queue.submit(job) {
                let mut dead = snapshot;
                dead.state = JobState::DeadLetter;
                dead.completed_at = Some(Utc::now());
                dead.error_kind = Some(err.kind());
                dead.last_error = Some(err.to_string());
                pool.tracker.add(dead);
                warn!(job_id = %job_id, error = %err, "Retry resubmission failed");
            }
        });

        let mut timers = shared.retry_timers.lock();
        timers.retain(|t| !t.is_finished());
        timers.push(timer);
    }
}

/// Worker-level backoff: `base * 2^(attempt-1)` capped at `max`.
fn retry_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let factor = 2u32
        .checked_pow(attempt.saturating_sub(1))
        .unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(max).min(max)
}
