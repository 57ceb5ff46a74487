//! Formatting metrics middleware.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use ah_common::EnrichedAlert;

use crate::{FormatError, Formatter, Payload, SharedFormatter};

use super::FormatMiddleware;

/// Records per-call duration and success/failure counters under the format
/// name it is constructed with.
pub struct MetricsMiddleware {
    format_name: String,
}

impl MetricsMiddleware {
    pub fn new(format_name: impl Into<String>) -> Self {
        Self {
            format_name: format_name.into(),
        }
    }
}

impl FormatMiddleware for MetricsMiddleware {
    fn wrap(&self, next: SharedFormatter) -> SharedFormatter {
        Arc::new(MeteredFormatter {
            format_name: self.format_name.clone(),
            next,
        })
    }
}

struct MeteredFormatter {
    format_name: String,
    next: SharedFormatter,
}

#[async_trait]
impl Formatter for MeteredFormatter {
    async fn format(&self, alert: &EnrichedAlert) -> Result<Payload, FormatError> {
        let start = Instant::now();
        let result = self.next.format(alert).await;
        let outcome = if result.is_ok() { "success" } else { "failure" };

        metrics::histogram!(
            "publishing_format_duration_seconds",
            "format" => self.format_name.clone(),
            "result" => outcome,
        )
        .record(start.elapsed().as_secs_f64());
        metrics::counter!(
            "publishing_format_total",
            "format" => self.format_name.clone(),
            "result" => outcome,
        )
        .increment(1);

        result
    }
}
