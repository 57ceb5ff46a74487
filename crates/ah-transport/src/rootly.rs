//! Rootly incidents API client.
//!
//! Create expects 201, update 200, resolve 200 or 409 (the incident was
//! already resolved, which is treated as success). Error bodies are
//! JSON-API style (`errors[]` with `title`/`detail`) and are folded into the
//! surfaced message. The documented quota is 60 requests per minute.

use std::time::Duration;

use reqwest::Method;
use serde::Deserialize;
use tracing::debug;

use ah_common::urlcheck;

use crate::client::{HttpCore, RetryPolicy};
use crate::{Payload, TransportError};

/// Default API base.
pub const DEFAULT_API_BASE: &str = "https://api.rootly.com";

/// Documented per-token quota.
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 60;

#[derive(Debug, Clone)]
pub struct RootlyConfig {
    pub base_url: String,
    pub api_token: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub rate_limit_per_minute: u32,
    /// Test-only escape hatch for local mock servers.
    pub allow_http: bool,
}

impl RootlyConfig {
    pub fn new(api_token: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            api_token: api_token.into(),
            request_timeout: crate::DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::default(),
            rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
            allow_http: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IncidentEnvelope {
    data: IncidentData,
}

#[derive(Debug, Deserialize)]
struct IncidentData {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrors {
    #[serde(default)]
    errors: Vec<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

pub struct RootlyClient {
    config: RootlyConfig,
    core: HttpCore,
}

impl RootlyClient {
    pub fn new(config: RootlyConfig) -> Result<Self, TransportError> {
        let core = HttpCore::new(
            Some(config.request_timeout),
            Some(config.rate_limit_per_minute),
            config.retry.clone(),
        )?;
        Ok(Self { config, core })
    }

    /// Create an incident; returns the provider-assigned incident id.
    pub async fn create_incident(&self, incident: &Payload) -> Result<String, TransportError> {
        let url = self.endpoint("/v1/incidents")?;
        let severity = incident
            .get("severity")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();

        let (_, body) = self
            .request(Method::POST, &url, &serde_json::Value::Object(incident.clone()), &[])
            .await?;

        let envelope: IncidentEnvelope =
            serde_json::from_str(&body).map_err(|_| {
                TransportError::Provider("incident response missing data.id".to_string())
            })?;
        metrics::counter!("rootly_incidents_created_total", "severity" => severity).increment(1);
        debug!(incident_id = %envelope.data.id, "Rootly incident created");
        Ok(envelope.data.id)
    }

    /// Update an existing incident in place.
    pub async fn update_incident(
        &self,
        incident_id: &str,
        incident: &Payload,
    ) -> Result<(), TransportError> {
        let url = self.endpoint(&format!("/v1/incidents/{incident_id}"))?;
        self.request(
            Method::PATCH,
            &url,
            &serde_json::Value::Object(incident.clone()),
            &[],
        )
        .await?;
        Ok(())
    }

    /// Resolve an incident. A 409 means it is already resolved and counts as
    /// success.
    pub async fn resolve_incident(&self, incident_id: &str) -> Result<(), TransportError> {
        let url = self.endpoint(&format!("/v1/incidents/{incident_id}/resolve"))?;
        self.request(Method::POST, &url, &serde_json::json!({}), &[409])
            .await?;
        Ok(())
    }

    /// Cheap health probe: configuration validity only.
    pub fn health(&self) -> bool {
        !self.config.api_token.is_empty() && self.endpoint("/v1/incidents").is_ok()
    }

    fn endpoint(&self, path: &str) -> Result<String, TransportError> {
        let url = format!("{}{}", self.config.base_url, path);
        urlcheck::validate(&url, self.config.allow_http)?;
        Ok(url)
    }

    async fn request(
        &self,
        method: Method,
        url: &str,
        body: &serde_json::Value,
        extra_ok: &[u16],
    ) -> Result<(u16, String), TransportError> {
        let headers = vec![(
            "Authorization".to_string(),
            format!("Bearer {}", self.config.api_token),
        )];
        self.core
            .request_json(method, url, body, &headers, extra_ok)
            .await
            .map_err(digest_api_errors)
    }
}

/// Replace raw error bodies with the parsed JSON-API error messages, when
/// present.
fn digest_api_errors(err: TransportError) -> TransportError {
    match err {
        TransportError::Rejected { status, body } => TransportError::Rejected {
            status,
            body: flatten_errors(body),
        },
        TransportError::Server { status, body } => TransportError::Server {
            status,
            body: flatten_errors(body),
        },
        TransportError::Permanent { status, body } => TransportError::Permanent {
            status,
            body: flatten_errors(body),
        },
        other => other,
    }
}

fn flatten_errors(body: String) -> String {
    let Ok(parsed) = serde_json::from_str::<ApiErrors>(&body) else {
        return body;
    };
    if parsed.errors.is_empty() {
        return body;
    }
    parsed
        .errors
        .into_iter()
        .map(|e| match (e.title, e.detail) {
            (Some(title), Some(detail)) => format!("{title}: {detail}"),
            (Some(title), None) => title,
            (None, Some(detail)) => detail,
            (None, None) => "unknown error".to_string(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ah_common::ErrorKind;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(server: &MockServer) -> RootlyConfig {
        RootlyConfig {
            base_url: server.uri(),
            allow_http: true,
            retry: RetryPolicy {
                base: Duration::from_millis(1),
                max: Duration::from_millis(5),
                max_retries: 1,
            },
            ..RootlyConfig::new("token")
        }
    }

    fn incident() -> Payload {
        json!({"title": "T", "severity": "critical", "status": "started"})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn create_parses_incident_id_and_sends_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/incidents"))
            .and(header("authorization", "Bearer token"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!({"data": {"id": "inc-1", "type": "incidents"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = RootlyClient::new(test_config(&server)).unwrap();
        assert_eq!(client.create_incident(&incident()).await.unwrap(), "inc-1");
    }

    #[tokio::test]
    async fn update_patches_incident() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/v1/incidents/inc-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"id": "inc-1"}})))
            .expect(1)
            .mount(&server)
            .await;

        let client = RootlyClient::new(test_config(&server)).unwrap();
        client.update_incident("inc-1", &incident()).await.unwrap();
    }

    #[tokio::test]
    async fn resolve_treats_conflict_as_already_resolved() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/incidents/inc-1/resolve"))
            .respond_with(ResponseTemplate::new(409))
            .expect(1)
            .mount(&server)
            .await;

        let client = RootlyClient::new(test_config(&server)).unwrap();
        client.resolve_incident("inc-1").await.unwrap();
    }

    #[tokio::test]
    async fn api_errors_are_flattened_into_the_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/incidents"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "errors": [{"title": "Invalid severity", "detail": "must be one of ..."}],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = RootlyClient::new(test_config(&server)).unwrap();
        let err = client.create_incident(&incident()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("Invalid severity"));
    }
}
