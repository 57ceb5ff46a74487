//! Input validation middleware.
//!
//! Rejects malformed alerts before any formatting work happens. Failures are
//! non-retryable `FormatError::Validation` values carrying the offending
//! field.

use std::sync::Arc;

use async_trait::async_trait;

use ah_common::{AlertStatus, EnrichedAlert};

use crate::{FormatError, Formatter, Payload, SharedFormatter};

use super::FormatMiddleware;

#[derive(Default)]
pub struct ValidationMiddleware;

impl FormatMiddleware for ValidationMiddleware {
    fn wrap(&self, next: SharedFormatter) -> SharedFormatter {
        Arc::new(ValidatingFormatter { next })
    }
}

struct ValidatingFormatter {
    next: SharedFormatter,
}

#[async_trait]
impl Formatter for ValidatingFormatter {
    async fn format(&self, alert: &EnrichedAlert) -> Result<Payload, FormatError> {
        if alert.alert.fingerprint.is_empty() {
            return Err(FormatError::validation("fingerprint", "must not be empty"));
        }
        if alert.alert.name.is_empty() {
            return Err(FormatError::validation("name", "must not be empty"));
        }
        if alert.alert.status == AlertStatus::Unknown {
            return Err(FormatError::validation("status", "unknown alert status"));
        }
        self.next.format(alert).await
    }
}
