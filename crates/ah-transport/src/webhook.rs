//! Generic HTTPS webhook client.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Method;
use tracing::debug;

use ah_common::{urlcheck, RESERVED_HEADERS};

use crate::client::{HttpCore, RetryPolicy};
use crate::TransportError;

#[derive(Debug, Clone)]
pub struct WebhookClientConfig {
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    /// Optional per-integration quota; generic webhooks default to none.
    pub rate_limit_per_minute: Option<u32>,
    /// Admit plain-http URLs. Test-only escape hatch for local mock servers.
    pub allow_http: bool,
}

impl Default for WebhookClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: crate::DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::default(),
            rate_limit_per_minute: None,
            allow_http: false,
        }
    }
}

/// POSTs JSON payloads to arbitrary allow-listed HTTPS endpoints.
pub struct WebhookClient {
    core: HttpCore,
    allow_http: bool,
}

impl WebhookClient {
    pub fn new(config: WebhookClientConfig) -> Result<Self, TransportError> {
        Ok(Self {
            core: HttpCore::new(
                Some(config.request_timeout),
                config.rate_limit_per_minute,
                config.retry,
            )?,
            allow_http: config.allow_http,
        })
    }

    /// POST a payload. Target headers pass through except the reserved set,
    /// which the client owns.
    pub async fn post(
        &self,
        url: &str,
        payload: &serde_json::Value,
        headers: &BTreeMap<String, String>,
    ) -> Result<(), TransportError> {
        urlcheck::validate(url, self.allow_http)?;

        let forwarded: Vec<(String, String)> = headers
            .iter()
            .filter(|(key, _)| {
                let keep = !RESERVED_HEADERS
                    .iter()
                    .any(|reserved| reserved.eq_ignore_ascii_case(key));
                if !keep {
                    debug!(header = %key, "Dropping reserved header from target config");
                }
                keep
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        self.core
            .request_json(Method::POST, url, payload, &forwarded, &[])
            .await?;
        Ok(())
    }

    /// Cheap health probe: is the endpoint configuration acceptable?
    pub fn health(&self, url: &str) -> bool {
        urlcheck::validate(url, self.allow_http).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ah_common::ErrorKind;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client() -> WebhookClient {
        WebhookClient::new(WebhookClientConfig {
            retry: RetryPolicy {
                base: Duration::from_millis(1),
                max: Duration::from_millis(5),
                max_retries: 2,
            },
            allow_http: true,
            ..WebhookClientConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn posts_json_with_custom_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("content-type", "application/json"))
            .and(header("x-team", "sre"))
            .and(body_json(json!({"alert_name": "A"})))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let headers = BTreeMap::from([
            ("X-Team".to_string(), "sre".to_string()),
            // Reserved: must not reach the wire from target config.
            ("User-Agent".to_string(), "spoofed".to_string()),
        ]);
        test_client()
            .post(
                &format!("{}/hook", server.uri()),
                &json!({"alert_name": "A"}),
                &headers,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        test_client()
            .post(
                &format!("{}/hook", server.uri()),
                &json!({}),
                &BTreeMap::new(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn permanent_rejection_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let err = test_client()
            .post(
                &format!("{}/hook", server.uri()),
                &json!({}),
                &BTreeMap::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn auth_failure_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let err = test_client()
            .post(
                &format!("{}/hook", server.uri()),
                &json!({}),
                &BTreeMap::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
    }

    #[tokio::test]
    async fn rejects_disallowed_urls_without_sending() {
        let client = WebhookClient::new(WebhookClientConfig::default()).unwrap();
        for url in ["", "http://example.com/hook", "https://127.0.0.1/hook"] {
            let err = client
                .post(url, &json!({}), &BTreeMap::new())
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{url}");
        }
        assert!(!client.health("https://localhost/hook"));
        assert!(client.health("https://hooks.example.com/hook"));
    }
}
