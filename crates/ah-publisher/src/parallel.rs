//! Parallel multi-target publishing.
//!
//! Fans one alert out to many targets with bounded concurrency and a
//! deadline. The fan-out never aborts on the first failure: every target
//! either completes, is skipped by health policy, or is cut off by the
//! deadline. Partial results are always available, even on error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use ah_common::{EnrichedAlert, ErrorKind, HealthStatus, Target};

use crate::{HealthMonitor, PublisherSet};

/// How health classifications gate the fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HealthStrategy {
    /// Skip targets classified unhealthy.
    #[default]
    SkipUnhealthy,
    /// Ignore health entirely.
    PublishToAll,
    /// Skip both unhealthy and degraded targets.
    SkipUnhealthyAndDegraded,
}

#[derive(Debug, Clone)]
pub struct MultiPublishOptions {
    pub max_concurrent: usize,
    pub timeout: Duration,
    pub health_strategy: HealthStrategy,
    /// Consult the health monitor at all; when false every target is
    /// attempted.
    pub check_health: bool,
}

impl Default for MultiPublishOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            timeout: Duration::from_secs(30),
            health_strategy: HealthStrategy::default(),
            check_health: true,
        }
    }
}

/// Outcome for a single target.
#[derive(Debug, Clone)]
pub struct TargetPublishResult {
    pub target_name: String,
    pub success: bool,
    pub skipped: bool,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub duration: Duration,
}

/// Aggregate outcome of a fan-out.
#[derive(Debug, Clone, Default)]
pub struct MultiPublishResult {
    pub total_targets: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub skipped_count: usize,
    pub is_partial_success: bool,
    pub results: Vec<TargetPublishResult>,
    pub total_duration: Duration,
}

impl MultiPublishResult {
    pub fn success(&self) -> bool {
        self.success_count > 0
    }

    pub fn all_succeeded(&self) -> bool {
        self.success_count == self.total_targets
    }

    pub fn all_failed(&self) -> bool {
        self.success_count == 0 && self.total_targets > 0
    }

    /// Percentage of targets that succeeded.
    pub fn success_rate(&self) -> f64 {
        if self.total_targets == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.total_targets as f64 * 100.0
    }
}

#[derive(Debug, Error)]
pub enum MultiPublishError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no healthy targets out of {total}")]
    NoHealthyTargets { total: usize },

    #[error("all targets failed ({failures} failures, {skipped} skipped)")]
    AllTargetsFailed { failures: usize, skipped: usize },

    #[error("publish deadline of {timeout:?} exceeded")]
    DeadlineExceeded { timeout: Duration },
}

impl MultiPublishError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MultiPublishError::InvalidInput(_) => ErrorKind::Validation,
            MultiPublishError::NoHealthyTargets { .. } => ErrorKind::NoTargets,
            MultiPublishError::AllTargetsFailed { .. } => ErrorKind::AllTargetsFailed,
            MultiPublishError::DeadlineExceeded { .. } => ErrorKind::ContextTimeout,
        }
    }
}

/// A failed fan-out still carries the per-target results that completed.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct MultiPublishFailure {
    #[source]
    pub error: MultiPublishError,
    pub partial: MultiPublishResult,
}

pub struct MultiPublisher {
    publishers: Arc<PublisherSet>,
    health: Arc<HealthMonitor>,
    options: MultiPublishOptions,
}

impl MultiPublisher {
    pub fn new(
        publishers: Arc<PublisherSet>,
        health: Arc<HealthMonitor>,
        options: MultiPublishOptions,
    ) -> Self {
        Self {
            publishers,
            health,
            options,
        }
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    /// Fan one alert out to every given target.
    pub async fn publish_to_multiple(
        &self,
        alert: &EnrichedAlert,
        targets: &[Target],
    ) -> Result<MultiPublishResult, MultiPublishFailure> {
        let started = Instant::now();

        if alert.validate().is_err() {
            return Err(failure(
                MultiPublishError::InvalidInput("alert fingerprint must not be empty".to_string()),
                MultiPublishResult::default(),
            ));
        }
        if targets.is_empty() {
            return Err(failure(
                MultiPublishError::InvalidInput("no targets given".to_string()),
                MultiPublishResult::default(),
            ));
        }

        // Health gate first: skipped targets get a result entry up front.
        let mut skipped: Vec<TargetPublishResult> = Vec::new();
        let mut attempt: Vec<Target> = Vec::new();
        for target in targets {
            match self.skip_reason(target) {
                Some(status) => {
                    debug!(
                        target_name = %target.name,
                        health = status.as_str(),
                        "Skipping target by health policy"
                    );
                    skipped.push(TargetPublishResult {
                        target_name: target.name.clone(),
                        success: false,
                        skipped: true,
                        error: Some(format!("skipped: target is {}", status.as_str())),
                        error_kind: None,
                        duration: Duration::ZERO,
                    });
                }
                None => attempt.push(target.clone()),
            }
        }

        if attempt.is_empty() {
            let partial = summarize(targets.len(), skipped, started.elapsed());
            return Err(failure(
                MultiPublishError::NoHealthyTargets {
                    total: targets.len(),
                },
                partial,
            ));
        }

        let results: Arc<Mutex<Vec<TargetPublishResult>>> = Arc::new(Mutex::new(skipped));
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent.max(1)));
        let mut join_set = JoinSet::new();

        for target in attempt {
            let publishers = self.publishers.clone();
            let health = self.health.clone();
            let semaphore = semaphore.clone();
            let results = results.clone();
            let alert = alert.clone();

            join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let target_started = Instant::now();
                let outcome = publishers.publish(&alert, &target).await;
                let duration = target_started.elapsed();

                match outcome {
                    Ok(()) => health.record_success(&target.name),
                    Err(_) => health.record_failure(&target.name),
                }
                let entry = match outcome {
                    Ok(()) => TargetPublishResult {
                        target_name: target.name.clone(),
                        success: true,
                        skipped: false,
                        error: None,
                        error_kind: None,
                        duration,
                    },
                    Err(err) => TargetPublishResult {
                        target_name: target.name.clone(),
                        success: false,
                        skipped: false,
                        error: Some(err.to_string()),
                        error_kind: Some(err.kind()),
                        duration,
                    },
                };
                results.lock().push(entry);
            });
        }

        let drain = async {
            while join_set.join_next().await.is_some() {}
        };
        let timed_out = tokio::time::timeout(self.options.timeout, drain)
            .await
            .is_err();

        if timed_out {
            // In-flight publishes are cancelled; their outcomes are simply
            // absent from the collected results.
            join_set.abort_all();
            warn!(
                timeout_ms = self.options.timeout.as_millis() as u64,
                "Parallel publish hit its deadline"
            );
            let collected = results.lock().clone();
            let partial = summarize(targets.len(), collected, started.elapsed());
            return Err(failure(
                MultiPublishError::DeadlineExceeded {
                    timeout: self.options.timeout,
                },
                partial,
            ));
        }

        let collected = Arc::try_unwrap(results)
            .map(|mutex| mutex.into_inner())
            .unwrap_or_default();
        let summary = summarize(targets.len(), collected, started.elapsed());

        if summary.success_count == 0 && (summary.failure_count > 0 || summary.skipped_count > 0) {
            let error = MultiPublishError::AllTargetsFailed {
                failures: summary.failure_count,
                skipped: summary.skipped_count,
            };
            return Err(failure(error, summary));
        }
        Ok(summary)
    }

    fn skip_reason(&self, target: &Target) -> Option<HealthStatus> {
        if !self.options.check_health {
            return None;
        }
        let status = self.health.get_health(&target.name);
        match (self.options.health_strategy, status) {
            (HealthStrategy::PublishToAll, _) => None,
            (HealthStrategy::SkipUnhealthy, HealthStatus::Unhealthy) => Some(status),
            (HealthStrategy::SkipUnhealthyAndDegraded, HealthStatus::Unhealthy)
            | (HealthStrategy::SkipUnhealthyAndDegraded, HealthStatus::Degraded) => Some(status),
            _ => None,
        }
    }
}

fn failure(error: MultiPublishError, partial: MultiPublishResult) -> MultiPublishFailure {
    MultiPublishFailure { error, partial }
}

fn summarize(
    total_targets: usize,
    results: Vec<TargetPublishResult>,
    total_duration: Duration,
) -> MultiPublishResult {
    let success_count = results.iter().filter(|r| r.success).count();
    let skipped_count = results.iter().filter(|r| r.skipped).count();
    let failure_count = results
        .iter()
        .filter(|r| !r.success && !r.skipped)
        .count();
    MultiPublishResult {
        total_targets,
        success_count,
        failure_count,
        skipped_count,
        is_partial_success: success_count > 0 && (failure_count > 0 || skipped_count > 0),
        results,
        total_duration,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with(success: usize, failed: usize, skipped: usize) -> MultiPublishResult {
        let mut results = Vec::new();
        for i in 0..success {
            results.push(TargetPublishResult {
                target_name: format!("ok-{i}"),
                success: true,
                skipped: false,
                error: None,
                error_kind: None,
                duration: Duration::ZERO,
            });
        }
        for i in 0..failed {
            results.push(TargetPublishResult {
                target_name: format!("bad-{i}"),
                success: false,
                skipped: false,
                error: Some("boom".to_string()),
                error_kind: Some(ErrorKind::Server),
                duration: Duration::ZERO,
            });
        }
        for i in 0..skipped {
            results.push(TargetPublishResult {
                target_name: format!("skip-{i}"),
                success: false,
                skipped: true,
                error: Some("skipped".to_string()),
                error_kind: None,
                duration: Duration::ZERO,
            });
        }
        summarize(success + failed + skipped, results, Duration::ZERO)
    }

    #[test]
    fn counts_always_partition_the_total() {
        let summary = result_with(2, 1, 1);
        assert_eq!(
            summary.success_count + summary.failure_count + summary.skipped_count,
            summary.total_targets
        );
    }

    #[test]
    fn derived_predicates() {
        let mixed = result_with(2, 0, 1);
        assert!(mixed.success());
        assert!(!mixed.all_succeeded());
        assert!(!mixed.all_failed());
        assert!(mixed.is_partial_success);
        assert!((mixed.success_rate() - 66.666).abs() < 0.1);

        let clean = result_with(3, 0, 0);
        assert!(clean.all_succeeded());
        assert!(!clean.is_partial_success);
        assert_eq!(clean.success_rate(), 100.0);

        let broken = result_with(0, 2, 0);
        assert!(broken.all_failed());
        assert!(!broken.success());
        assert_eq!(broken.success_rate(), 0.0);
    }

    #[test]
    fn error_kinds() {
        assert_eq!(
            MultiPublishError::NoHealthyTargets { total: 2 }.kind(),
            ErrorKind::NoTargets
        );
        assert_eq!(
            MultiPublishError::AllTargetsFailed {
                failures: 1,
                skipped: 0
            }
            .kind(),
            ErrorKind::AllTargetsFailed
        );
        assert_eq!(
            MultiPublishError::DeadlineExceeded {
                timeout: Duration::from_secs(30)
            }
            .kind(),
            ErrorKind::ContextTimeout
        );
    }
}
