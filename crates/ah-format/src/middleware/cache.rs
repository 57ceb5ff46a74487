//! Formatter result caching.
//!
//! The cache key is the hex SHA-256 of a canonical JSON rendering of the
//! fields that determine the formatted output: fingerprint, status, and (when
//! classified) severity, confidence, and the first 100 characters of the
//! reasoning. Identical inputs therefore share a key across processes and
//! languages. Errors are never cached.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};

use ah_cache::TtlLruCache;
use ah_common::EnrichedAlert;

use crate::{FormatError, Formatter, Payload, SharedFormatter};

use super::FormatMiddleware;

/// Characters of reasoning included in the cache key. Two classifications
/// sharing this prefix collide; that is the documented contract.
const REASONING_PREFIX_CHARS: usize = 100;

/// Default TTL for cached payloads.
pub const DEFAULT_FORMAT_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Serialize)]
struct CacheKeyParts<'a> {
    fingerprint: &'a str,
    status: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    severity: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_prefix: Option<String>,
}

/// Compute the cache key for an alert.
pub fn cache_key(alert: &EnrichedAlert) -> String {
    let classification = alert.classification.as_ref();
    let parts = CacheKeyParts {
        fingerprint: &alert.alert.fingerprint,
        status: alert.alert.status.as_str(),
        severity: classification.map(|c| c.severity.as_str()),
        confidence: classification.map(|c| c.confidence),
        reasoning_prefix: classification
            .map(|c| c.reasoning.chars().take(REASONING_PREFIX_CHARS).collect()),
    };
    let encoded = serde_json::to_vec(&parts).expect("key parts serialize");
    hex::encode(Sha256::digest(&encoded))
}

pub struct CachingMiddleware {
    cache: Arc<TtlLruCache<Payload>>,
    ttl: Duration,
}

impl CachingMiddleware {
    pub fn new(cache: Arc<TtlLruCache<Payload>>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    pub fn cache(&self) -> &Arc<TtlLruCache<Payload>> {
        &self.cache
    }
}

impl FormatMiddleware for CachingMiddleware {
    fn wrap(&self, next: SharedFormatter) -> SharedFormatter {
        Arc::new(CachingFormatter {
            cache: self.cache.clone(),
            ttl: self.ttl,
            next,
        })
    }
}

struct CachingFormatter {
    cache: Arc<TtlLruCache<Payload>>,
    ttl: Duration,
    next: SharedFormatter,
}

#[async_trait]
impl Formatter for CachingFormatter {
    async fn format(&self, alert: &EnrichedAlert) -> Result<Payload, FormatError> {
        let key = cache_key(alert);
        if let Some(payload) = self.cache.get(&key) {
            return Ok(payload);
        }
        let payload = self.next.format(alert).await?;
        self.cache.set(key, payload.clone(), self.ttl);
        Ok(payload)
    }
}
