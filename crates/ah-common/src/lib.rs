//! Shared domain types for the alert publishing core.
//!
//! Everything that crosses a crate boundary lives here: the enriched alert
//! input unit, publishing targets, the stable error-kind taxonomy, health and
//! mode enums, and job metadata shared between the dispatch queue and the
//! tracking store.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod urlcheck;

/// Headers managed by the HTTP clients themselves; target-supplied headers
/// never override these.
pub const RESERVED_HEADERS: [&str; 7] = [
    "Content-Type",
    "User-Agent",
    "Accept",
    "Accept-Encoding",
    "Connection",
    "Host",
    "Content-Length",
];

/// Maximum number of custom headers a target may carry.
pub const MAX_TARGET_HEADERS: usize = 100;

/// Maximum size of a single target header value, in bytes.
pub const MAX_HEADER_VALUE_BYTES: usize = 4096;

// ============================================================================
// Alert Types
// ============================================================================

/// Lifecycle state of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Firing,
    Resolved,
    Unknown,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Firing => "firing",
            AlertStatus::Resolved => "resolved",
            AlertStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "firing" => Ok(AlertStatus::Firing),
            "resolved" => Ok(AlertStatus::Resolved),
            _ => Ok(AlertStatus::Unknown),
        }
    }
}

/// A normalized alert as handed over by ingestion.
///
/// `fingerprint` is the stable, opaque identity of the alert and the primary
/// deduplication key across the whole pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub fingerprint: String,
    pub name: String,
    pub status: AlertStatus,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub starts_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generator_url: Option<String>,
}

/// Severity assigned by the ML classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
    Noise,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Info => "info",
            Severity::Noise => "noise",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-learning classification attached to an alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub severity: Severity,
    /// Classifier confidence in `[0, 1]`.
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// The input unit of the publishing core: a normalized alert plus optional
/// classification and free-form enrichment metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedAlert {
    pub alert: Alert,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrichment_metadata: Option<BTreeMap<String, serde_json::Value>>,
}

impl EnrichedAlert {
    /// Check the data-model invariant: the fingerprint must be non-empty.
    pub fn validate(&self) -> Result<(), InvalidAlert> {
        if self.alert.fingerprint.is_empty() {
            return Err(InvalidAlert::new("fingerprint", "must not be empty"));
        }
        Ok(())
    }

    /// Severity from the `severity` label, if present.
    pub fn severity_label(&self) -> Option<&str> {
        self.alert.labels.get("severity").map(String::as_str)
    }

    /// Severity assigned by the classifier, if present.
    pub fn classified_severity(&self) -> Option<Severity> {
        self.classification.as_ref().map(|c| c.severity)
    }

    pub fn is_firing(&self) -> bool {
        self.alert.status == AlertStatus::Firing
    }

    pub fn is_resolved(&self) -> bool {
        self.alert.status == AlertStatus::Resolved
    }
}

/// Validation failure on an alert or target field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {field}: {message}")]
pub struct InvalidAlert {
    pub field: String,
    pub message: String,
}

impl InvalidAlert {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// Target Types
// ============================================================================

/// Flavor of a publishing endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Webhook,
    Slack,
    PagerDuty,
    Rootly,
    Alertmanager,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Webhook => "webhook",
            TargetType::Slack => "slack",
            TargetType::PagerDuty => "pagerduty",
            TargetType::Rootly => "rootly",
            TargetType::Alertmanager => "alertmanager",
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetType {
    type Err = InvalidAlert;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "webhook" => Ok(TargetType::Webhook),
            "slack" => Ok(TargetType::Slack),
            "pagerduty" => Ok(TargetType::PagerDuty),
            "rootly" => Ok(TargetType::Rootly),
            "alertmanager" => Ok(TargetType::Alertmanager),
            other => Err(InvalidAlert::new(
                "type",
                format!("unknown target type: {}", other),
            )),
        }
    }
}

/// A discovered publishing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    /// Unique key within the discovered set.
    pub name: String,
    #[serde(rename = "type")]
    pub target_type: TargetType,
    pub url: String,
    /// Format key used to render payloads; defaults to the target type.
    pub format: String,
    pub enabled: bool,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Target {
    pub fn new(name: impl Into<String>, target_type: TargetType, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target_type,
            url: url.into(),
            format: target_type.as_str().to_string(),
            enabled: true,
            headers: BTreeMap::new(),
        }
    }

    /// Enforce the target invariants: HTTPS URL on a public host, no
    /// credentials in the URL, bounded header count and value sizes.
    pub fn validate(&self) -> Result<(), InvalidAlert> {
        if self.name.is_empty() {
            return Err(InvalidAlert::new("name", "must not be empty"));
        }
        urlcheck::validate_target_url(&self.url)
            .map_err(|e| InvalidAlert::new("url", e.to_string()))?;
        if self.headers.len() > MAX_TARGET_HEADERS {
            return Err(InvalidAlert::new(
                "headers",
                format!("at most {} headers allowed", MAX_TARGET_HEADERS),
            ));
        }
        for (key, value) in &self.headers {
            if value.len() > MAX_HEADER_VALUE_BYTES {
                return Err(InvalidAlert::new(
                    "headers",
                    format!("value for {} exceeds {} bytes", key, MAX_HEADER_VALUE_BYTES),
                ));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Error Kind Taxonomy
// ============================================================================

/// Stable classification of every error surfaced by the publishing core.
///
/// The kind drives retry policy and metrics labels; the per-crate error enums
/// all map onto it via their `kind()` accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Auth,
    Network,
    Timeout,
    RateLimit,
    Server,
    Permanent,
    NotTracked,
    QueueFull,
    NoTargets,
    AllTargetsFailed,
    ContextCancelled,
    ContextTimeout,
    Unknown,
}

impl ErrorKind {
    /// Only transient delivery failures are retried; everything else
    /// propagates immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::RateLimit | ErrorKind::Server
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Auth => "auth",
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Server => "server",
            ErrorKind::Permanent => "permanent",
            ErrorKind::NotTracked => "not_tracked",
            ErrorKind::QueueFull => "queue_full",
            ErrorKind::NoTargets => "no_targets",
            ErrorKind::AllTargetsFailed => "all_targets_failed",
            ErrorKind::ContextCancelled => "context_cancelled",
            ErrorKind::ContextTimeout => "context_timeout",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Health & Mode Types
// ============================================================================

/// Per-target health classification, owned by the health monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        }
    }
}

/// Process-wide operating mode of the pipeline.
///
/// `MetricsOnly` means no enabled target exists: alerts are observed and
/// counted but never published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum Mode {
    Normal = 0,
    MetricsOnly = 1,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Normal => "normal",
            Mode::MetricsOnly => "metrics-only",
        }
    }

    /// Decode from the atomic representation. Any unexpected value reads as
    /// `Normal`.
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Mode::MetricsOnly,
            _ => Mode::Normal,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Job Types
// ============================================================================

/// Scheduling class of a dispatch job. Workers always serve `High` before
/// `Medium` before `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    High,
    Medium,
    Low,
}

impl JobPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPriority::High => "high",
            JobPriority::Medium => "medium",
            JobPriority::Low => "low",
        }
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a dispatch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    Queued,
    Processing,
    Retrying,
    Succeeded,
    Failed,
    DeadLetter,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Processing => "processing",
            JobState::Retrying => "retrying",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::DeadLetter => "dead-letter",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::DeadLetter
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
