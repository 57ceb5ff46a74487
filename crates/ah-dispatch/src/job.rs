//! Dispatch jobs and priority classification.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use ah_common::{EnrichedAlert, ErrorKind, JobPriority, JobState, Severity, Target};

/// One (alert, target) delivery unit owned by the queue and workers.
#[derive(Debug, Clone)]
pub struct DispatchJob {
    pub id: Uuid,
    pub alert: EnrichedAlert,
    pub target: Target,
    pub priority: JobPriority,
    pub state: JobState,
    pub retry_count: u32,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_kind: Option<ErrorKind>,
    pub last_error: Option<String>,
}

impl DispatchJob {
    pub fn new(alert: EnrichedAlert, target: Target, priority: JobPriority) -> Self {
        Self {
            id: Uuid::new_v4(),
            alert,
            target,
            priority,
            state: JobState::Queued,
            retry_count: 0,
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_kind: None,
            last_error: None,
        }
    }

    /// Plain-value snapshot for the tracking store; holds no reference to
    /// the live job.
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            fingerprint: self.alert.alert.fingerprint.clone(),
            target_name: self.target.name.clone(),
            priority: self.priority,
            state: self.state,
            retry_count: self.retry_count,
            submitted_at: self.submitted_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            error_kind: self.error_kind,
            last_error: self.last_error.clone(),
        }
    }
}

/// Snapshot of a job's externally interesting fields.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: Uuid,
    pub fingerprint: String,
    pub target_name: String,
    pub priority: JobPriority,
    pub state: JobState,
    pub retry_count: u32,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Scheduling priority for an alert.
///
/// High: a critical firing alert (by label) or anything the classifier
/// marks critical. Low: resolves and informational alerts. Everything else
/// is medium.
pub fn classify_priority(alert: &EnrichedAlert) -> JobPriority {
    let critical_label = alert.severity_label() == Some("critical");
    let critical_classification = alert.classified_severity() == Some(Severity::Critical);
    if (critical_label && alert.is_firing()) || critical_classification {
        return JobPriority::High;
    }
    if alert.is_resolved() || alert.severity_label() == Some("info") {
        return JobPriority::Low;
    }
    JobPriority::Medium
}
