//! Formatter rate limiting.

use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

use ah_common::EnrichedAlert;

use crate::{FormatError, Formatter, Payload, SharedFormatter};

use super::FormatMiddleware;

/// Limiter consulted before each format call.
#[async_trait]
pub trait FormatRateLimiter: Send + Sync {
    /// Non-blocking check; `false` means the call is denied right now.
    fn allow(&self) -> bool;

    /// Wait until a permit is available.
    async fn wait(&self);
}

/// Token-bucket limiter backed by `governor`.
pub struct GovernorLimiter {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl GovernorLimiter {
    pub fn new(quota: Quota) -> Self {
        Self {
            limiter: RateLimiter::direct(quota),
        }
    }

    pub fn per_minute(permits: NonZeroU32) -> Self {
        Self::new(Quota::per_minute(permits))
    }
}

#[async_trait]
impl FormatRateLimiter for GovernorLimiter {
    fn allow(&self) -> bool {
        self.limiter.check().is_ok()
    }

    async fn wait(&self) {
        self.limiter.until_ready().await;
    }
}

/// Whether a denied permit fails fast or waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateLimitMode {
    /// Deny immediately with `FormatError::RateLimited`.
    #[default]
    Deny,
    /// Await a permit; the caller's timeout bounds the wait.
    Wait,
}

pub struct RateLimitMiddleware {
    limiter: Arc<dyn FormatRateLimiter>,
    mode: RateLimitMode,
}

impl RateLimitMiddleware {
    pub fn new(limiter: Arc<dyn FormatRateLimiter>, mode: RateLimitMode) -> Self {
        Self { limiter, mode }
    }
}

impl FormatMiddleware for RateLimitMiddleware {
    fn wrap(&self, next: SharedFormatter) -> SharedFormatter {
        Arc::new(RateLimitedFormatter {
            limiter: self.limiter.clone(),
            mode: self.mode,
            next,
        })
    }
}

struct RateLimitedFormatter {
    limiter: Arc<dyn FormatRateLimiter>,
    mode: RateLimitMode,
    next: SharedFormatter,
}

#[async_trait]
impl Formatter for RateLimitedFormatter {
    async fn format(&self, alert: &EnrichedAlert) -> Result<Payload, FormatError> {
        match self.mode {
            RateLimitMode::Deny => {
                if !self.limiter.allow() {
                    return Err(FormatError::RateLimited);
                }
            }
            RateLimitMode::Wait => self.limiter.wait().await,
        }
        self.next.format(alert).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::testutil::firing_alert;
    use crate::middleware::chain;
    use nonzero_ext::nonzero;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn denial_surfaces_without_invoking_inner() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let base = crate::formatter_fn(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(Payload::new())
        });

        // Burst of three per minute: the fourth call is denied.
        let limiter = Arc::new(GovernorLimiter::per_minute(nonzero!(3u32)));
        let chained = chain(
            &[Arc::new(RateLimitMiddleware::new(
                limiter,
                RateLimitMode::Deny,
            ))],
            base,
        );

        for _ in 0..3 {
            assert!(chained.format(&firing_alert()).await.is_ok());
        }
        let err = chained.format(&firing_alert()).await.unwrap_err();
        assert!(matches!(err, FormatError::RateLimited));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
