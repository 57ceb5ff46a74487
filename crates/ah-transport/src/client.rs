//! Shared request core: rate-limited, retrying JSON requests.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use tracing::{debug, warn};

use crate::{classify_status, TransportError, DEFAULT_REQUEST_TIMEOUT, USER_AGENT};

/// Capped exponential backoff between retry attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            max: Duration::from_secs(5),
            max_retries: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after `attempt` (zero-based): `base * 2^attempt`
    /// capped at `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base.checked_mul(factor).unwrap_or(self.max).min(self.max)
    }
}

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate-limited, retrying JSON request executor shared by all client flavors.
pub(crate) struct HttpCore {
    client: reqwest::Client,
    limiter: Option<Arc<DirectLimiter>>,
    retry: RetryPolicy,
}

impl HttpCore {
    pub(crate) fn new(
        request_timeout: Option<Duration>,
        rate_limit_per_minute: Option<u32>,
        retry: RetryPolicy,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT))
            .user_agent(USER_AGENT)
            .build()
            .map_err(TransportError::Build)?;

        let limiter = rate_limit_per_minute
            .and_then(NonZeroU32::new)
            .map(|rpm| Arc::new(RateLimiter::direct(Quota::per_minute(rpm))));

        Ok(Self {
            client,
            limiter,
            retry,
        })
    }

    /// Execute a JSON request, retrying transient failures with capped
    /// exponential backoff. The body is serialized once and re-sent on every
    /// attempt. Returns the status code and body text of the successful
    /// response.
    ///
    /// Every wait point (limiter, request, backoff sleep) is a plain await,
    /// so dropping the returned future abandons pending retries.
    pub(crate) async fn request_json(
        &self,
        method: Method,
        url: &str,
        body: &serde_json::Value,
        headers: &[(String, String)],
        extra_ok: &[u16],
    ) -> Result<(u16, String), TransportError> {
        let header_map = build_headers(headers);
        let mut attempt = 0u32;

        loop {
            if let Some(limiter) = &self.limiter {
                limiter.until_ready().await;
            }

            let outcome = self
                .send_once(method.clone(), url, body, header_map.clone(), extra_ok)
                .await;

            match outcome {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay(attempt);
                    attempt += 1;
                    debug!(
                        url = url,
                        attempt = attempt,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying request after transient error"
                    );
                    metrics::counter!("publishing_retries_total").increment(1);
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        body: &serde_json::Value,
        headers: HeaderMap,
        extra_ok: &[u16],
    ) -> Result<(u16, String), TransportError> {
        let response = self
            .client
            .request(method, url)
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(TransportError::from_reqwest)?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(TransportError::from_reqwest)?;

        classify_status(status, text.clone(), extra_ok)?;
        Ok((status.as_u16(), text))
    }
}

/// Build the header map, skipping anything that fails header-name/value
/// parsing rather than failing the whole request.
fn build_headers(headers: &[(String, String)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        match (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => warn!(header = %key, "Skipping malformed header"),
        }
    }
    map
}
