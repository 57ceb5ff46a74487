//! Rootly publisher with incident-id correlation.
//!
//! First firing creates an incident and remembers its id; repeated firings
//! patch it; resolve resolves it and forgets the id. A 409 on resolve means
//! the incident is already resolved and counts as success (handled by the
//! client).

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, warn};

use ah_cache::IncidentIdCache;
use ah_common::{EnrichedAlert, Target};
use ah_format::{FormatRegistry, Payload};
use ah_transport::{RootlyClient, RootlyConfig};

use crate::{bearer_token, validate_target, PublishError, Publisher};

pub struct RootlyPublisher {
    registry: Arc<FormatRegistry>,
    incidents: Arc<IncidentIdCache>,
    clients: DashMap<String, Arc<RootlyClient>>,
    allow_http: bool,
}

impl RootlyPublisher {
    pub fn new(registry: Arc<FormatRegistry>, allow_http: bool) -> Self {
        Self::with_incidents(registry, Arc::new(IncidentIdCache::default()), allow_http)
    }

    pub fn with_incidents(
        registry: Arc<FormatRegistry>,
        incidents: Arc<IncidentIdCache>,
        allow_http: bool,
    ) -> Self {
        Self {
            registry,
            incidents,
            clients: DashMap::new(),
            allow_http,
        }
    }

    /// The incident-id cache, for cleanup wiring and introspection.
    pub fn incidents(&self) -> &Arc<IncidentIdCache> {
        &self.incidents
    }

    fn client_for(&self, target: &Target) -> Result<Arc<RootlyClient>, PublishError> {
        if let Some(client) = self.clients.get(&target.name) {
            return Ok(client.clone());
        }
        let api_token = bearer_token(target).ok_or_else(|| PublishError::MissingCredentials {
            target: target.name.clone(),
        })?;
        let mut config = RootlyConfig::new(api_token);
        config.base_url = target.url.trim_end_matches('/').to_string();
        config.allow_http = self.allow_http;
        let client = Arc::new(RootlyClient::new(config)?);
        self.clients.insert(target.name.clone(), client.clone());
        Ok(client)
    }

    async fn format(
        &self,
        alert: &EnrichedAlert,
        target: &Target,
    ) -> Result<Payload, PublishError> {
        let name = if target.format.is_empty() {
            "rootly"
        } else {
            &target.format
        };
        Ok(self.registry.get(name)?.format(alert).await?)
    }
}

#[async_trait]
impl Publisher for RootlyPublisher {
    fn name(&self) -> &str {
        "rootly"
    }

    async fn publish(&self, alert: &EnrichedAlert, target: &Target) -> Result<(), PublishError> {
        validate_target(target, self.allow_http)?;
        alert
            .validate()
            .map_err(|e| PublishError::InvalidInput(e.to_string()))?;
        let client = self.client_for(target)?;
        let fingerprint = alert.alert.fingerprint.clone();

        if alert.is_resolved() {
            let Some(incident_id) = self.incidents.lookup(&fingerprint) else {
                warn!(
                    fingerprint = %fingerprint,
                    target_name = %target.name,
                    "Resolve received without a tracked incident"
                );
                return Err(PublishError::EventNotTracked { fingerprint });
            };
            client.resolve_incident(&incident_id).await?;
            self.incidents.forget(&fingerprint);
            debug!(
                fingerprint = %fingerprint,
                incident_id = %incident_id,
                "Resolved incident and forgot id"
            );
            return Ok(());
        }

        let incident = self.format(alert, target).await?;
        match self.incidents.lookup(&fingerprint) {
            None => {
                let incident_id = client.create_incident(&incident).await?;
                self.incidents.track(&fingerprint, incident_id.clone());
                debug!(
                    fingerprint = %fingerprint,
                    incident_id = %incident_id,
                    "Created incident"
                );
            }
            Some(incident_id) => {
                client.update_incident(&incident_id, &incident).await?;
                debug!(
                    fingerprint = %fingerprint,
                    incident_id = %incident_id,
                    "Updated incident"
                );
            }
        }
        Ok(())
    }
}
