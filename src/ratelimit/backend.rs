//! Rate limiter trait for abstracting over limiter implementations.

use std::sync::Arc;

/// Trait for keyed rate limiter implementations.
///
/// Request-handling code depends on this trait rather than on
/// [`LimiterRegistry`](super::LimiterRegistry) so it can be handed any
/// admission policy, including test doubles.
pub trait RateLimiter: Send + Sync {
    /// Decide whether one more request for `key` may proceed right now.
    fn allow(&self, key: &str) -> bool;
}

impl<T: RateLimiter + ?Sized> RateLimiter for Arc<T> {
    fn allow(&self, key: &str) -> bool {
        (**self).allow(key)
    }
}
