//! Payload formatting for the alert publishing core.
//!
//! A `Formatter` turns an `EnrichedAlert` into a provider-shaped payload map.
//! The `FormatRegistry` maps format names to formatters with reference-counted
//! handles, and the middleware chain composes cross-cutting behavior
//! (validation, metrics, caching, rate limiting, timeout, retry) around any
//! formatter.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use ah_common::{EnrichedAlert, ErrorKind};

pub mod formats;
pub mod middleware;
pub mod registry;

pub use registry::{FormatHandle, FormatRegistry};

/// A provider-shaped payload: a JSON object ready for serialization.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Renders an enriched alert into a payload map.
#[async_trait]
pub trait Formatter: Send + Sync {
    async fn format(&self, alert: &EnrichedAlert) -> Result<Payload, FormatError>;
}

/// Shared, dynamically dispatched formatter.
pub type SharedFormatter = Arc<dyn Formatter>;

/// Adapter turning a plain function into a [`Formatter`].
pub struct FormatterFn<F>(pub F);

#[async_trait]
impl<F> Formatter for FormatterFn<F>
where
    F: Fn(&EnrichedAlert) -> Result<Payload, FormatError> + Send + Sync,
{
    async fn format(&self, alert: &EnrichedAlert) -> Result<Payload, FormatError> {
        (self.0)(alert)
    }
}

/// Wrap a plain function as a [`SharedFormatter`].
pub fn formatter_fn<F>(f: F) -> SharedFormatter
where
    F: Fn(&EnrichedAlert) -> Result<Payload, FormatError> + Send + Sync + 'static,
{
    Arc::new(FormatterFn(f))
}

/// Errors surfaced by the registry, the formatters, and the middleware chain.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("invalid format name: {0}")]
    InvalidName(String),

    #[error("format not found: {0}")]
    NotFound(String),

    #[error("format {name} is in use ({refs} outstanding references)")]
    InUse { name: String, refs: usize },

    #[error("validation failed on {field}: {message}")]
    Validation { field: String, message: String },

    #[error("format rate limit exceeded")]
    RateLimited,

    #[error("formatting timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("formatting failed: {0}")]
    Internal(String),
}

impl FormatError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Stable kind for retry policy and metrics labels.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FormatError::InvalidName(_)
            | FormatError::NotFound(_)
            | FormatError::InUse { .. }
            | FormatError::Validation { .. }
            | FormatError::Serialization(_) => ErrorKind::Validation,
            FormatError::RateLimited => ErrorKind::RateLimit,
            FormatError::Timeout { .. } => ErrorKind::Timeout,
            FormatError::Internal(_) => ErrorKind::Unknown,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}
