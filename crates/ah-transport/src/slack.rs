//! Slack webhook client.
//!
//! Posts Blocks API messages to an incoming-webhook URL. Thread replies pass
//! `thread_ts` in the message body; the response carries `ok` and the new
//! message `ts`.

use std::time::Duration;

use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use ah_common::urlcheck;

use crate::client::{HttpCore, RetryPolicy};
use crate::{Payload, TransportError};

/// Conservative default quota for a single webhook.
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 60;

#[derive(Debug, Clone)]
pub struct SlackConfig {
    pub webhook_url: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub rate_limit_per_minute: u32,
    /// Test-only escape hatch for local mock servers.
    pub allow_http: bool,
}

impl SlackConfig {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            request_timeout: crate::DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::default(),
            rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
            allow_http: false,
        }
    }
}

/// Webhook response.
#[derive(Debug, Clone, Deserialize)]
pub struct SlackResponse {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

pub struct SlackClient {
    config: SlackConfig,
    core: HttpCore,
}

impl SlackClient {
    pub fn new(config: SlackConfig) -> Result<Self, TransportError> {
        let core = HttpCore::new(
            Some(config.request_timeout),
            Some(config.rate_limit_per_minute),
            config.retry.clone(),
        )?;
        Ok(Self { config, core })
    }

    /// Post a message; returns the new message `ts`.
    pub async fn post_message(&self, message: &Payload) -> Result<String, TransportError> {
        urlcheck::validate(&self.config.webhook_url, self.config.allow_http)?;

        let (_, body) = self
            .core
            .request_json(
                Method::POST,
                &self.config.webhook_url,
                &serde_json::Value::Object(message.clone()),
                &[],
                &[],
            )
            .await?;

        let response: SlackResponse = serde_json::from_str(&body)
            .map_err(|_| TransportError::Provider(format!("unexpected slack response: {body}")))?;
        if !response.ok {
            return Err(TransportError::Provider(
                response.error.unwrap_or_else(|| "unknown slack error".to_string()),
            ));
        }
        let ts = response
            .ts
            .ok_or_else(|| TransportError::Provider("slack response missing ts".to_string()))?;
        debug!(ts = %ts, "Slack message posted");
        Ok(ts)
    }

    /// Post a reply into an existing thread; returns the reply's `ts`.
    pub async fn reply_in_thread(
        &self,
        thread_ts: &str,
        message: &Payload,
    ) -> Result<String, TransportError> {
        if thread_ts.is_empty() {
            return Err(TransportError::InvalidRequest(
                "thread_ts must not be empty".to_string(),
            ));
        }
        let mut threaded = message.clone();
        threaded.insert("thread_ts".to_string(), json!(thread_ts));
        self.post_message(&threaded).await
    }

    /// Cheap health probe: configuration validity only.
    pub fn health(&self) -> bool {
        urlcheck::validate(&self.config.webhook_url, self.config.allow_http).is_ok()
    }
}
