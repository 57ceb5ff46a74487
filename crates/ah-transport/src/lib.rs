//! HTTP transports for the alert publishing core.
//!
//! One client per provider flavor, all sharing the same contract: JSON over
//! TLS, per-integration rate limiting, status-classified retry with capped
//! exponential backoff, and the outbound URL allow-list.

use std::time::Duration;

use ah_common::urlcheck::UrlCheckError;
use ah_common::ErrorKind;
use thiserror::Error;

mod client;
pub mod pagerduty;
pub mod rootly;
pub mod slack;
pub mod webhook;

pub use client::RetryPolicy;
pub use pagerduty::{PagerDutyClient, PagerDutyConfig};
pub use rootly::{RootlyClient, RootlyConfig};
pub use slack::{SlackClient, SlackConfig, SlackResponse};
pub use webhook::{WebhookClient, WebhookClientConfig};

/// A JSON object body, as produced by the formatters.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// User agent sent on every outbound request.
pub const USER_AGENT: &str = concat!("alert-history-publisher/", env!("CARGO_PKG_VERSION"));

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport-level errors, classified for retry policy.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("target url rejected: {0}")]
    UrlRejected(#[from] UrlCheckError),

    #[error("authentication rejected (status {status})")]
    Auth { status: u16 },

    #[error("request rejected (status {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("rate limited by provider (status 429)")]
    RateLimited,

    #[error("server error (status {status}): {body}")]
    Server { status: u16, body: String },

    #[error("permanent failure (status {status}): {body}")]
    Permanent { status: u16, body: String },

    #[error("provider reported failure: {0}")]
    Provider(String),

    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("request timed out: {0}")]
    Timeout(#[source] reqwest::Error),

    #[error("response decode failed: {0}")]
    Decode(#[source] reqwest::Error),

    #[error("http client build failed: {0}")]
    Build(#[source] reqwest::Error),
}

impl TransportError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err)
        } else {
            TransportError::Network(err)
        }
    }

    /// Stable kind for retry policy and metrics labels.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::InvalidRequest(_)
            | TransportError::UrlRejected(_)
            | TransportError::Rejected { .. }
            | TransportError::Build(_) => ErrorKind::Validation,
            TransportError::Auth { .. } => ErrorKind::Auth,
            TransportError::RateLimited => ErrorKind::RateLimit,
            TransportError::Server { .. } | TransportError::Decode(_) => ErrorKind::Server,
            TransportError::Permanent { .. } | TransportError::Provider(_) => ErrorKind::Permanent,
            TransportError::Network(_) => ErrorKind::Network,
            TransportError::Timeout(_) => ErrorKind::Timeout,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Map an HTTP status (plus already-read body) onto the transport taxonomy.
///
/// `extra_ok` lists non-2xx statuses a caller treats as success, e.g. 409 on
/// a Rootly resolve.
pub(crate) fn classify_status(
    status: reqwest::StatusCode,
    body: String,
    extra_ok: &[u16],
) -> Result<(), TransportError> {
    let code = status.as_u16();
    if status.is_success() || extra_ok.contains(&code) {
        return Ok(());
    }
    match code {
        400 | 404 => Err(TransportError::Rejected { status: code, body }),
        401 | 403 => Err(TransportError::Auth { status: code }),
        429 => Err(TransportError::RateLimited),
        500 | 502 | 503 | 504 => Err(TransportError::Server { status: code, body }),
        _ if status.is_client_error() => Err(TransportError::Permanent { status: code, body }),
        _ => Err(TransportError::Server { status: code, body }),
    }
}
