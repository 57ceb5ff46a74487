//! Formatting timeout middleware.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use ah_common::EnrichedAlert;

use crate::{FormatError, Formatter, Payload, SharedFormatter};

use super::FormatMiddleware;

/// Bounds the inner formatter's duration. On expiry the inner future is
/// dropped, which cancels any nested waits.
pub struct TimeoutMiddleware {
    timeout: Duration,
}

impl TimeoutMiddleware {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl FormatMiddleware for TimeoutMiddleware {
    fn wrap(&self, next: SharedFormatter) -> SharedFormatter {
        Arc::new(TimedFormatter {
            timeout: self.timeout,
            next,
        })
    }
}

struct TimedFormatter {
    timeout: Duration,
    next: SharedFormatter,
}

#[async_trait]
impl Formatter for TimedFormatter {
    async fn format(&self, alert: &EnrichedAlert) -> Result<Payload, FormatError> {
        tokio::time::timeout(self.timeout, self.next.format(alert))
            .await
            .map_err(|_| FormatError::Timeout {
                timeout: self.timeout,
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::testutil::firing_alert;
    use crate::middleware::chain;

    struct SlowFormatter {
        delay: Duration,
    }

    #[async_trait]
    impl crate::Formatter for SlowFormatter {
        async fn format(&self, _alert: &EnrichedAlert) -> Result<Payload, FormatError> {
            tokio::time::sleep(self.delay).await;
            Ok(Payload::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_inner_times_out() {
        let chained = chain(
            &[Arc::new(TimeoutMiddleware::new(Duration::from_millis(50)))],
            Arc::new(SlowFormatter {
                delay: Duration::from_secs(10),
            }),
        );
        let err = chained.format(&firing_alert()).await.unwrap_err();
        assert!(matches!(err, FormatError::Timeout { .. }));
    }

    #[tokio::test]
    async fn fast_inner_passes() {
        let chained = chain(
            &[Arc::new(TimeoutMiddleware::new(Duration::from_secs(5)))],
            Arc::new(SlowFormatter {
                delay: Duration::from_millis(1),
            }),
        );
        assert!(chained.format(&firing_alert()).await.is_ok());
    }
}
