//! Generic webhook publisher.
//!
//! Serves both `webhook` and `alertmanager` target types; the only
//! difference between them is the format key the target carries. Payload
//! size is bounded before anything hits the wire.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use ah_common::{EnrichedAlert, Target, TargetType};
use ah_format::{FormatRegistry, Payload};
use ah_transport::{WebhookClient, WebhookClientConfig};

use crate::{validate_target, PublishError, Publisher, PublisherSetConfig};

pub struct WebhookPublisher {
    registry: Arc<FormatRegistry>,
    client: WebhookClient,
    max_payload_bytes: usize,
    allow_http: bool,
}

impl WebhookPublisher {
    pub fn new(
        registry: Arc<FormatRegistry>,
        config: PublisherSetConfig,
    ) -> Result<Self, PublishError> {
        let client = WebhookClient::new(WebhookClientConfig {
            allow_http: config.allow_http,
            ..WebhookClientConfig::default()
        })?;
        Ok(Self {
            registry,
            client,
            max_payload_bytes: config.max_payload_bytes,
            allow_http: config.allow_http,
        })
    }

    fn format_name<'a>(&self, target: &'a Target) -> &'a str {
        if !target.format.is_empty() {
            return &target.format;
        }
        match target.target_type {
            TargetType::Alertmanager => "alertmanager",
            _ => "webhook",
        }
    }

    async fn format(
        &self,
        alert: &EnrichedAlert,
        target: &Target,
    ) -> Result<Payload, PublishError> {
        Ok(self.registry.get(self.format_name(target))?.format(alert).await?)
    }
}

/// Which auth mechanism the target's headers carry.
fn auth_scheme(target: &Target) -> &'static str {
    if target
        .headers
        .get("Authorization")
        .is_some_and(|v| v.starts_with("Bearer "))
    {
        return "bearer";
    }
    if target
        .headers
        .keys()
        .any(|k| k.eq_ignore_ascii_case("x-api-key"))
    {
        return "api_key";
    }
    "none"
}

#[async_trait]
impl Publisher for WebhookPublisher {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn publish(&self, alert: &EnrichedAlert, target: &Target) -> Result<(), PublishError> {
        validate_target(target, self.allow_http)?;
        alert
            .validate()
            .map_err(|e| PublishError::InvalidInput(e.to_string()))?;

        let payload = self.format(alert, target).await?;
        let body = serde_json::Value::Object(payload);

        let size = serde_json::to_vec(&body)
            .map_err(ah_format::FormatError::from)?
            .len();
        metrics::histogram!("publishing_payload_bytes", "target" => target.name.clone())
            .record(size as f64);
        if size > self.max_payload_bytes {
            return Err(PublishError::PayloadTooLarge {
                target: target.name.clone(),
                size,
                limit: self.max_payload_bytes,
            });
        }

        debug!(
            target_name = %target.name,
            format = self.format_name(target),
            auth = auth_scheme(target),
            payload_bytes = size,
            "Posting webhook payload"
        );
        self.client.post(&target.url, &body, &target.headers).await?;
        Ok(())
    }
}
