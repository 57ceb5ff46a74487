//! Slack publisher with message threading.
//!
//! The first alert for a fingerprint posts a parent message and records its
//! `ts`; every later state change for the same fingerprint posts a reply in
//! that thread. The cache entry is never mutated by replies, so the thread
//! anchor stays stable for the lifetime of the entry.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use ah_cache::MessageCache;
use ah_common::{AlertStatus, EnrichedAlert, Target};
use ah_format::{FormatRegistry, Payload};
use ah_transport::{SlackClient, SlackConfig};

use crate::{validate_target, PublishError, Publisher};

pub struct SlackPublisher {
    registry: Arc<FormatRegistry>,
    messages: Arc<MessageCache>,
    clients: DashMap<String, Arc<SlackClient>>,
    allow_http: bool,
}

impl SlackPublisher {
    pub fn new(registry: Arc<FormatRegistry>, allow_http: bool) -> Self {
        Self::with_messages(registry, Arc::new(MessageCache::default()), allow_http)
    }

    pub fn with_messages(
        registry: Arc<FormatRegistry>,
        messages: Arc<MessageCache>,
        allow_http: bool,
    ) -> Self {
        Self {
            registry,
            messages,
            clients: DashMap::new(),
            allow_http,
        }
    }

    /// The thread cache, for cleanup wiring and introspection.
    pub fn messages(&self) -> &Arc<MessageCache> {
        &self.messages
    }

    fn client_for(&self, target: &Target) -> Result<Arc<SlackClient>, PublishError> {
        if let Some(client) = self.clients.get(&target.name) {
            return Ok(client.clone());
        }
        let mut config = SlackConfig::new(target.url.clone());
        config.allow_http = self.allow_http;
        let client = Arc::new(SlackClient::new(config)?);
        self.clients.insert(target.name.clone(), client.clone());
        Ok(client)
    }

    async fn format(
        &self,
        alert: &EnrichedAlert,
        target: &Target,
    ) -> Result<Payload, PublishError> {
        let name = if target.format.is_empty() {
            "slack"
        } else {
            &target.format
        };
        Ok(self.registry.get(name)?.format(alert).await?)
    }
}

#[async_trait]
impl Publisher for SlackPublisher {
    fn name(&self) -> &str {
        "slack"
    }

    async fn publish(&self, alert: &EnrichedAlert, target: &Target) -> Result<(), PublishError> {
        validate_target(target, self.allow_http)?;
        alert
            .validate()
            .map_err(|e| PublishError::InvalidInput(e.to_string()))?;
        let client = self.client_for(target)?;
        let fingerprint = &alert.alert.fingerprint;

        match self.messages.lookup(fingerprint) {
            None => {
                let payload = self.format(alert, target).await?;
                let ts = client.post_message(&payload).await?;
                // The parent message anchors the thread.
                self.messages.record(fingerprint, ts.clone(), ts.clone());
                debug!(fingerprint = %fingerprint, ts = %ts, "Posted parent message");
                Ok(())
            }
            Some(entry) => {
                if alert.alert.status == AlertStatus::Unknown {
                    return Err(PublishError::InvalidInput(format!(
                        "unknown status for threaded update of {fingerprint}"
                    )));
                }
                let payload = self.format(alert, target).await?;
                let ts = client.reply_in_thread(&entry.thread_ts, &payload).await?;
                debug!(
                    fingerprint = %fingerprint,
                    thread_ts = %entry.thread_ts,
                    ts = %ts,
                    "Posted threaded reply"
                );
                Ok(())
            }
        }
    }
}
