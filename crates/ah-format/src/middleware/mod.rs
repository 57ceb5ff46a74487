//! Composable formatter middleware.
//!
//! A middleware wraps a formatter and returns a new one. `chain` applies a
//! slice outer-first: for `[m1, m2]` over `base` the execution order is
//! m1-before, m2-before, base, m2-after, m1-after.

use std::sync::Arc;

use crate::SharedFormatter;

pub mod cache;
pub mod metrics;
pub mod rate_limit;
pub mod retry;
pub mod timeout;
pub mod validation;

pub use cache::CachingMiddleware;
pub use metrics::MetricsMiddleware;
pub use rate_limit::{FormatRateLimiter, GovernorLimiter, RateLimitMiddleware, RateLimitMode};
pub use retry::RetryMiddleware;
pub use timeout::TimeoutMiddleware;
pub use validation::ValidationMiddleware;

/// Wraps a formatter with cross-cutting behavior.
pub trait FormatMiddleware: Send + Sync {
    fn wrap(&self, next: SharedFormatter) -> SharedFormatter;
}

/// Compose a middleware slice around a base formatter, outer-first.
pub fn chain(middlewares: &[Arc<dyn FormatMiddleware>], base: SharedFormatter) -> SharedFormatter {
    middlewares
        .iter()
        .rev()
        .fold(base, |next, middleware| middleware.wrap(next))
}
