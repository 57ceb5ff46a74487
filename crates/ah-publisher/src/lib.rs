//! Target publishers for the alert publishing core.
//!
//! A `Publisher` delivers one alert to one target with provider-specific
//! semantics (trigger/resolve correlation, chat threading, incident
//! lifecycle). `PublisherSet` picks the flavor for a target and wraps every
//! publish with metrics; `MultiPublisher` fans one alert out to many targets
//! with bounded concurrency and health gating.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use ah_common::{urlcheck, EnrichedAlert, ErrorKind, InvalidAlert, Target, TargetType};
use ah_format::{FormatError, FormatRegistry};
use ah_transport::TransportError;

pub mod health;
pub mod pagerduty;
pub mod parallel;
pub mod rootly;
pub mod slack;
pub mod webhook;

pub use health::{HealthMonitor, HealthMonitorConfig};
pub use pagerduty::EnhancedPagerDutyPublisher;
pub use parallel::{
    HealthStrategy, MultiPublishError, MultiPublishFailure, MultiPublishOptions,
    MultiPublishResult, MultiPublisher, TargetPublishResult,
};
pub use rootly::RootlyPublisher;
pub use slack::SlackPublisher;
pub use webhook::WebhookPublisher;

/// Errors surfaced by the publishers.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid target {target}: {source}")]
    Target {
        target: String,
        #[source]
        source: InvalidAlert,
    },

    #[error("target {target} has no usable credentials")]
    MissingCredentials { target: String },

    #[error("payload for {target} is {size} bytes, over the {limit}-byte limit")]
    PayloadTooLarge {
        target: String,
        size: usize,
        limit: usize,
    },

    #[error("no trigger event tracked for fingerprint {fingerprint}")]
    EventNotTracked { fingerprint: String },

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl PublishError {
    /// Stable kind for retry policy and metrics labels.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PublishError::InvalidInput(_)
            | PublishError::Target { .. }
            | PublishError::PayloadTooLarge { .. } => ErrorKind::Validation,
            PublishError::MissingCredentials { .. } => ErrorKind::Auth,
            PublishError::EventNotTracked { .. } => ErrorKind::NotTracked,
            PublishError::Format(err) => err.kind(),
            PublishError::Transport(err) => err.kind(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Delivers one alert to one target.
#[async_trait]
pub trait Publisher: Send + Sync {
    fn name(&self) -> &str;

    async fn publish(&self, alert: &EnrichedAlert, target: &Target) -> Result<(), PublishError>;
}

/// Validate a target at publish time. Mirrors `Target::validate` but honors
/// the test-only `allow_http` escape hatch.
pub(crate) fn validate_target(target: &Target, allow_http: bool) -> Result<(), PublishError> {
    let check = || -> Result<(), InvalidAlert> {
        if target.name.is_empty() {
            return Err(InvalidAlert::new("name", "must not be empty"));
        }
        urlcheck::validate(&target.url, allow_http)
            .map_err(|e| InvalidAlert::new("url", e.to_string()))?;
        if target.headers.len() > ah_common::MAX_TARGET_HEADERS {
            return Err(InvalidAlert::new("headers", "too many headers"));
        }
        for (key, value) in &target.headers {
            if value.len() > ah_common::MAX_HEADER_VALUE_BYTES {
                return Err(InvalidAlert::new("headers", format!("value for {key} too large")));
            }
        }
        Ok(())
    };
    check().map_err(|source| PublishError::Target {
        target: target.name.clone(),
        source,
    })
}

/// Extract the bearer token from a target's `Authorization` header.
pub(crate) fn bearer_token(target: &Target) -> Option<String> {
    target
        .headers
        .get("Authorization")
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Shared configuration for the publisher set.
#[derive(Debug, Clone)]
pub struct PublisherSetConfig {
    /// Maximum serialized payload size for webhook-style targets.
    pub max_payload_bytes: usize,
    /// Admit plain-http target URLs. Test-only.
    pub allow_http: bool,
}

impl Default for PublisherSetConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: 1024 * 1024,
            allow_http: false,
        }
    }
}

/// The closed set of publisher flavors, keyed by target type.
pub struct PublisherSet {
    pagerduty: Arc<EnhancedPagerDutyPublisher>,
    slack: Arc<SlackPublisher>,
    rootly: Arc<RootlyPublisher>,
    webhook: Arc<WebhookPublisher>,
}

impl PublisherSet {
    pub fn new(
        registry: Arc<FormatRegistry>,
        config: PublisherSetConfig,
    ) -> Result<Self, PublishError> {
        Ok(Self {
            pagerduty: Arc::new(EnhancedPagerDutyPublisher::new(
                registry.clone(),
                config.allow_http,
            )),
            slack: Arc::new(SlackPublisher::new(registry.clone(), config.allow_http)),
            rootly: Arc::new(RootlyPublisher::new(registry.clone(), config.allow_http)),
            webhook: Arc::new(WebhookPublisher::new(registry, config)?),
        })
    }

    /// Publisher responsible for a target type. Alertmanager targets reuse
    /// the webhook publisher (with the alertmanager format).
    pub fn for_target(&self, target_type: TargetType) -> Arc<dyn Publisher> {
        match target_type {
            TargetType::PagerDuty => self.pagerduty.clone(),
            TargetType::Slack => self.slack.clone(),
            TargetType::Rootly => self.rootly.clone(),
            TargetType::Webhook | TargetType::Alertmanager => self.webhook.clone(),
        }
    }

    /// Publish one alert to one target, with per-target metrics.
    pub async fn publish(
        &self,
        alert: &EnrichedAlert,
        target: &Target,
    ) -> Result<(), PublishError> {
        let publisher = self.for_target(target.target_type);
        let start = Instant::now();
        let result = publisher.publish(alert, target).await;
        let elapsed = start.elapsed();

        let outcome = if result.is_ok() { "success" } else { "failure" };
        metrics::counter!(
            "publishing_alerts_total",
            "target" => target.name.clone(),
            "result" => outcome,
        )
        .increment(1);
        metrics::histogram!(
            "publishing_duration_seconds",
            "target" => target.name.clone(),
            "result" => outcome,
        )
        .record(elapsed.as_secs_f64());
        if let Err(err) = &result {
            metrics::counter!(
                "publishing_errors_total",
                "target" => target.name.clone(),
                "type" => err.kind().as_str(),
            )
            .increment(1);
        }

        debug!(
            target_name = %target.name,
            publisher = publisher.name(),
            outcome = outcome,
            duration_ms = elapsed.as_millis() as u64,
            "Publish finished"
        );
        result
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::collections::BTreeMap;

    use ah_common::{Alert, AlertStatus, EnrichedAlert};
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

    pub fn resolved_alert(fingerprint: &str) -> EnrichedAlert {
        let mut enriched = firing_alert(fingerprint);
        enriched.alert.status = AlertStatus::Resolved;
        enriched.alert.ends_at = Some(Utc.with_ymd_and_hms(2025, 6, 1, 13, 0, 0).unwrap());
        enriched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_extraction() {
        let mut target = Target::new("t", TargetType::PagerDuty, "https://example.com");
        assert_eq!(bearer_token(&target), None);
        target
            .headers
            .insert("Authorization".to_string(), "Bearer rk".to_string());
        assert_eq!(bearer_token(&target), Some("rk".to_string()));
        target
            .headers
            .insert("Authorization".to_string(), "Basic xyz".to_string());
        assert_eq!(bearer_token(&target), None);
    }

    #[test]
    fn publish_error_kinds() {
        assert_eq!(
            PublishError::InvalidInput("x".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            PublishError::MissingCredentials { target: "t".into() }.kind(),
            ErrorKind::Auth
        );
        assert_eq!(
            PublishError::EventNotTracked {
                fingerprint: "fp".into()
            }
            .kind(),
            ErrorKind::NotTracked
        );
        assert!(!PublishError::EventNotTracked {
            fingerprint: "fp".into()
        }
        .is_retryable());
    }

    #[test]
    fn validate_target_honors_allow_http() {
        let target = Target::new("t", TargetType::Webhook, "http://127.0.0.1:9/hook");
        assert!(validate_target(&target, true).is_ok());
        assert!(validate_target(&target, false).is_err());
    }
}
