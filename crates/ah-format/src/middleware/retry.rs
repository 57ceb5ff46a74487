//! Formatting retry middleware.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use ah_common::EnrichedAlert;

use crate::{FormatError, Formatter, Payload, SharedFormatter};

use super::FormatMiddleware;

/// Retries the inner formatter on transient errors with a fixed delay
/// between attempts. Total attempts = 1 initial + `max_retries`.
/// Validation failures (and any other non-retryable kind) propagate
/// immediately.
pub struct RetryMiddleware {
    max_retries: u32,
    delay: Duration,
}

impl RetryMiddleware {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }
}

impl FormatMiddleware for RetryMiddleware {
    fn wrap(&self, next: SharedFormatter) -> SharedFormatter {
        Arc::new(RetryingFormatter {
            max_retries: self.max_retries,
            delay: self.delay,
            next,
        })
    }
}

struct RetryingFormatter {
    max_retries: u32,
    delay: Duration,
    next: SharedFormatter,
}

#[async_trait]
impl Formatter for RetryingFormatter {
    async fn format(&self, alert: &EnrichedAlert) -> Result<Payload, FormatError> {
        let mut attempt = 0u32;
        loop {
            match self.next.format(alert).await {
                Ok(payload) => return Ok(payload),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    debug!(
                        attempt = attempt,
                        max_retries = self.max_retries,
                        error = %err,
                        "Retrying format after transient error"
                    );
                    tokio::time::sleep(self.delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
