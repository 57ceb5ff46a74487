//! PagerDuty Events API v2 client.
//!
//! `send_event` posts trigger/acknowledge/resolve events; `send_change_event`
//! posts deployment-style change events. The documented quota is 120
//! requests per minute per integration key.

use std::time::Duration;

use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use ah_common::urlcheck;

use crate::client::{HttpCore, RetryPolicy};
use crate::{Payload, TransportError};

/// Default Events API base.
pub const DEFAULT_EVENTS_BASE: &str = "https://events.pagerduty.com";

const EVENTS_PATH: &str = "/v2/events";
const CHANGE_PATH: &str = "/v2/change/enqueue";

/// Documented per-integration quota.
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 120;

#[derive(Debug, Clone)]
pub struct PagerDutyConfig {
    pub base_url: String,
    /// Integration routing key; injected into every event body.
    pub routing_key: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub rate_limit_per_minute: u32,
    /// Test-only escape hatch for local mock servers.
    pub allow_http: bool,
}

impl PagerDutyConfig {
    pub fn new(routing_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_EVENTS_BASE.to_string(),
            routing_key: routing_key.into(),
            request_timeout: crate::DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::default(),
            rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
            allow_http: false,
        }
    }
}

/// Response body of the Events API.
#[derive(Debug, Clone, Deserialize)]
pub struct EventResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub dedup_key: Option<String>,
}

pub struct PagerDutyClient {
    config: PagerDutyConfig,
    core: HttpCore,
}

impl PagerDutyClient {
    pub fn new(config: PagerDutyConfig) -> Result<Self, TransportError> {
        let core = HttpCore::new(
            Some(config.request_timeout),
            Some(config.rate_limit_per_minute),
            config.retry.clone(),
        )?;
        Ok(Self { config, core })
    }

    /// Send an alert event. The payload must carry `event_action`;
    /// acknowledge/resolve additionally require a `dedup_key`. The routing
    /// key is injected here. Success is HTTP 202.
    pub async fn send_event(&self, mut event: Payload) -> Result<EventResponse, TransportError> {
        if self.config.routing_key.is_empty() {
            return Err(TransportError::InvalidRequest(
                "routing key must not be empty".to_string(),
            ));
        }
        let action = event
            .get("event_action")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                TransportError::InvalidRequest("event_action is required".to_string())
            })?
            .to_string();
        if matches!(action.as_str(), "acknowledge" | "resolve") {
            let has_dedup = event
                .get("dedup_key")
                .and_then(|v| v.as_str())
                .is_some_and(|k| !k.is_empty());
            if !has_dedup {
                return Err(TransportError::InvalidRequest(format!(
                    "dedup_key is required for {action}"
                )));
            }
        }
        event.insert("routing_key".to_string(), json!(self.config.routing_key));

        let url = format!("{}{}", self.config.base_url, EVENTS_PATH);
        urlcheck::validate(&url, self.config.allow_http)?;

        let result = self
            .core
            .request_json(
                Method::POST,
                &url,
                &serde_json::Value::Object(event),
                &[],
                &[],
            )
            .await;

        self.count_request(EVENTS_PATH, &result);
        let (_, body) = result?;
        let response: EventResponse =
            serde_json::from_str(&body).unwrap_or_else(|_| EventResponse {
                status: "accepted".to_string(),
                message: String::new(),
                dedup_key: None,
            });
        debug!(
            action = %action,
            dedup_key = ?response.dedup_key,
            "PagerDuty event accepted"
        );
        Ok(response)
    }

    /// Send a change event (deployment notification, not an alert).
    pub async fn send_change_event(&self, change: Payload) -> Result<(), TransportError> {
        if self.config.routing_key.is_empty() {
            return Err(TransportError::InvalidRequest(
                "routing key must not be empty".to_string(),
            ));
        }
        let url = format!("{}{}", self.config.base_url, CHANGE_PATH);
        urlcheck::validate(&url, self.config.allow_http)?;

        let body = json!({
            "routing_key": self.config.routing_key,
            "payload": serde_json::Value::Object(change),
        });
        let result = self
            .core
            .request_json(Method::POST, &url, &body, &[], &[])
            .await;
        self.count_request(CHANGE_PATH, &result);
        result.map(|_| ())
    }

    /// Cheap health probe: configuration validity only.
    pub fn health(&self) -> bool {
        !self.config.routing_key.is_empty()
            && urlcheck::validate(
                &format!("{}{}", self.config.base_url, EVENTS_PATH),
                self.config.allow_http,
            )
            .is_ok()
    }

    fn count_request(&self, endpoint: &'static str, result: &Result<(u16, String), TransportError>) {
        let status = match result {
            Ok((status, _)) => status.to_string(),
            Err(_) => "error".to_string(),
        };
        metrics::counter!(
            "pagerduty_api_requests_total",
            "endpoint" => endpoint,
            "status" => status,
        )
        .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ah_common::ErrorKind;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(server: &MockServer) -> PagerDutyConfig {
        PagerDutyConfig {
            base_url: server.uri(),
            allow_http: true,
            retry: RetryPolicy {
                base: Duration::from_millis(1),
                max: Duration::from_millis(5),
                max_retries: 2,
            },
            ..PagerDutyConfig::new("rk")
        }
    }

    fn trigger_event() -> Payload {
        json!({
            "event_action": "trigger",
            "dedup_key": "fp1",
            "payload": {"summary": "s", "severity": "critical", "source": "x"},
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[tokio::test]
    async fn trigger_injects_routing_key_and_returns_dedup_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/events"))
            .and(body_partial_json(json!({
                "routing_key": "rk",
                "event_action": "trigger",
                "dedup_key": "fp1",
            })))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({
                "status": "success",
                "message": "Event processed",
                "dedup_key": "pd1",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = PagerDutyClient::new(test_config(&server)).unwrap();
        let response = client.send_event(trigger_event()).await.unwrap();
        assert_eq!(response.dedup_key.as_deref(), Some("pd1"));
    }

    #[tokio::test]
    async fn resolve_without_dedup_key_is_rejected_locally() {
        let server = MockServer::start().await;
        let client = PagerDutyClient::new(test_config(&server)).unwrap();

        let event = json!({"event_action": "resolve"}).as_object().cloned().unwrap();
        let err = client.send_event(event).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(server.received_requests().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn empty_routing_key_is_rejected_locally() {
        let server = MockServer::start().await;
        let mut config = test_config(&server);
        config.routing_key.clear();
        let client = PagerDutyClient::new(config).unwrap();

        let err = client.send_event(trigger_event()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!client.health());
    }

    #[tokio::test]
    async fn rate_limit_response_retries_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/events"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3) // initial + 2 retries
            .mount(&server)
            .await;

        let client = PagerDutyClient::new(test_config(&server)).unwrap();
        let err = client.send_event(trigger_event()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimit);
    }

    #[tokio::test]
    async fn change_event_posts_to_change_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/change/enqueue"))
            .and(body_partial_json(json!({"routing_key": "rk"})))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let client = PagerDutyClient::new(test_config(&server)).unwrap();
        let change = json!({"summary": "deployed v2"}).as_object().cloned().unwrap();
        client.send_change_event(change).await.unwrap();
    }
}
