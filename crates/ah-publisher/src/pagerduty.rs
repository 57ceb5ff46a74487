//! PagerDuty publisher with event-key correlation.
//!
//! A firing alert triggers an incident and remembers the provider's dedup
//! key; the matching resolve reuses that key and forgets it. A resolve with
//! no tracked trigger is a non-fatal warning (`EventNotTracked`), since the
//! submitter may deliver events out of order. Alerts labelled
//! `change_event=true` are routed to the change-events endpoint instead.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use tracing::{debug, warn};

use ah_cache::EventKeyCache;
use ah_common::{EnrichedAlert, Target};
use ah_format::{FormatRegistry, Payload};
use ah_transport::{PagerDutyClient, PagerDutyConfig};

use crate::{bearer_token, validate_target, PublishError, Publisher};

pub struct EnhancedPagerDutyPublisher {
    registry: Arc<FormatRegistry>,
    event_keys: Arc<EventKeyCache>,
    clients: DashMap<String, Arc<PagerDutyClient>>,
    allow_http: bool,
}

impl EnhancedPagerDutyPublisher {
    pub fn new(registry: Arc<FormatRegistry>, allow_http: bool) -> Self {
        Self::with_event_keys(registry, Arc::new(EventKeyCache::default()), allow_http)
    }

    pub fn with_event_keys(
        registry: Arc<FormatRegistry>,
        event_keys: Arc<EventKeyCache>,
        allow_http: bool,
    ) -> Self {
        Self {
            registry,
            event_keys,
            clients: DashMap::new(),
            allow_http,
        }
    }

    /// The dedup-key cache, for cleanup wiring and introspection.
    pub fn event_keys(&self) -> &Arc<EventKeyCache> {
        &self.event_keys
    }

    fn client_for(&self, target: &Target) -> Result<Arc<PagerDutyClient>, PublishError> {
        if let Some(client) = self.clients.get(&target.name) {
            return Ok(client.clone());
        }
        let routing_key = bearer_token(target).ok_or_else(|| PublishError::MissingCredentials {
            target: target.name.clone(),
        })?;
        let mut config = PagerDutyConfig::new(routing_key);
        config.base_url = target.url.trim_end_matches('/').to_string();
        config.allow_http = self.allow_http;
        let client = Arc::new(PagerDutyClient::new(config)?);
        self.clients.insert(target.name.clone(), client.clone());
        Ok(client)
    }

    async fn format(
        &self,
        alert: &EnrichedAlert,
        target: &Target,
    ) -> Result<Payload, PublishError> {
        let name = if target.format.is_empty() {
            "pagerduty"
        } else {
            &target.format
        };
        Ok(self.registry.get(name)?.format(alert).await?)
    }
}

/// Pull dashboard links and snapshots out of the annotations into the
/// PagerDuty event.
fn attach_link_assets(event: &mut Payload, alert: &EnrichedAlert) {
    let annotations = &alert.alert.annotations;

    let mut links = Vec::new();
    if let Some(url) = annotations.get("grafana_url") {
        links.push(json!({"href": url, "text": "Grafana Dashboard"}));
    }
    if let Some(url) = annotations.get("runbook_url") {
        links.push(json!({"href": url, "text": "Runbook"}));
    }
    if !links.is_empty() {
        event.insert("links".to_string(), json!(links));
    }

    if let Some(url) = annotations.get("grafana_snapshot") {
        event.insert(
            "images".to_string(),
            json!([{"src": url, "alt": "Grafana Snapshot"}]),
        );
    }
}

#[async_trait]
impl Publisher for EnhancedPagerDutyPublisher {
    fn name(&self) -> &str {
        "pagerduty"
    }

    async fn publish(&self, alert: &EnrichedAlert, target: &Target) -> Result<(), PublishError> {
        validate_target(target, self.allow_http)?;
        alert
            .validate()
            .map_err(|e| PublishError::InvalidInput(e.to_string()))?;
        let client = self.client_for(target)?;
        let fingerprint = alert.alert.fingerprint.clone();

        // Deployment notifications bypass the alert-event flow entirely.
        let is_change_event = alert
            .alert
            .labels
            .get("change_event")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));
        if is_change_event {
            let mut change = Payload::new();
            change.insert("summary".to_string(), json!(alert.alert.name));
            change.insert(
                "timestamp".to_string(),
                json!(alert.alert.starts_at.to_rfc3339()),
            );
            change.insert("custom_details".to_string(), json!(alert.alert.labels));
            client.send_change_event(change).await?;
            return Ok(());
        }

        if alert.is_resolved() {
            let Some(dedup_key) = self.event_keys.lookup(&fingerprint) else {
                warn!(
                    fingerprint = %fingerprint,
                    target_name = %target.name,
                    "Resolve received without a tracked trigger event"
                );
                return Err(PublishError::EventNotTracked { fingerprint });
            };

            let mut event = self.format(alert, target).await?;
            event.insert("event_action".to_string(), json!("resolve"));
            event.insert("dedup_key".to_string(), json!(dedup_key));
            client.send_event(event).await?;

            self.event_keys.forget(&fingerprint);
            debug!(fingerprint = %fingerprint, "Resolved and forgot dedup key");
            return Ok(());
        }

        let mut event = self.format(alert, target).await?;
        attach_link_assets(&mut event, alert);
        let response = client.send_event(event).await?;

        let dedup_key = response.dedup_key.unwrap_or_else(|| fingerprint.clone());
        self.event_keys.track(&fingerprint, dedup_key.clone());
        debug!(
            fingerprint = %fingerprint,
            dedup_key = %dedup_key,
            "Tracked dedup key for future resolve"
        );
        Ok(())
    }
}
