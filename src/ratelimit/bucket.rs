//! Token bucket implementation.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::clock::Clock;
use crate::error::{LimiterError, Result};

/// Default bucket size: 100 requests.
pub const DEFAULT_CAPACITY: f64 = 100.0;
/// Default refill rate: 100 requests per minute.
pub const DEFAULT_REFILL_RATE: f64 = 100.0 / 60.0;

/// The parameters a token bucket is built from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketPolicy {
    /// Maximum number of tokens the bucket can hold
    #[serde(default = "default_capacity")]
    pub capacity: f64,
    /// Tokens added per second
    #[serde(default = "default_refill_rate")]
    pub refill_rate: f64,
}

fn default_capacity() -> f64 {
    DEFAULT_CAPACITY
}

fn default_refill_rate() -> f64 {
    DEFAULT_REFILL_RATE
}

impl Default for BucketPolicy {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            refill_rate: DEFAULT_REFILL_RATE,
        }
    }
}

impl BucketPolicy {
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
        }
    }

    /// Reject parameters that would make a bucket silently useless.
    ///
    /// A refill rate of zero is accepted: the bucket then grants a fixed
    /// quota of `capacity` requests and never replenishes.
    pub fn validate(&self) -> Result<()> {
        if !self.capacity.is_finite() || self.capacity < 1.0 {
            return Err(LimiterError::InvalidArgument(format!(
                "capacity must be a finite number >= 1, got {}",
                self.capacity
            )));
        }
        if !self.refill_rate.is_finite() || self.refill_rate < 0.0 {
            return Err(LimiterError::InvalidArgument(format!(
                "refill rate must be a finite, non-negative number of tokens per second, got {}",
                self.refill_rate
            )));
        }
        Ok(())
    }
}

/// Mutable part of a bucket; always updated together.
#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Duration,
}

impl BucketState {
    /// Token count as of `now`, capped at `capacity`. Readings earlier than
    /// `last_refill` contribute nothing.
    fn refilled(&self, policy: &BucketPolicy, now: Duration) -> f64 {
        let elapsed = now.saturating_sub(self.last_refill).as_secs_f64();
        (self.tokens + elapsed * policy.refill_rate).min(policy.capacity)
    }
}

/// A token bucket guarding a single key.
///
/// Refill is lazy: tokens are recomputed from elapsed time on every call
/// rather than by a background task. The refill, the admission check and the
/// decrement happen under one lock.
#[derive(Debug)]
pub struct TokenBucket {
    policy: BucketPolicy,
    state: Mutex<BucketState>,
    clock: Arc<dyn Clock>,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(policy: BucketPolicy, clock: Arc<dyn Clock>) -> Result<Self> {
        policy.validate()?;
        Ok(Self::with_validated(policy, clock))
    }

    pub(crate) fn with_validated(policy: BucketPolicy, clock: Arc<dyn Clock>) -> Self {
        let last_refill = clock.now();
        Self {
            policy,
            state: Mutex::new(BucketState {
                tokens: policy.capacity,
                last_refill,
            }),
            clock,
        }
    }

    /// Try to consume one token.
    ///
    /// Returns `true` if the request is admitted, `false` if it is rate limited.
    pub fn allow(&self) -> bool {
        let mut state = self.state.lock();
        let now = self.clock.now();

        state.tokens = state.refilled(&self.policy, now);
        if now > state.last_refill {
            state.last_refill = now;
        }

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens available right now, without consuming any.
    pub fn available(&self) -> f64 {
        let state = self.state.lock();
        state.refilled(&self.policy, self.clock.now())
    }

    pub fn capacity(&self) -> f64 {
        self.policy.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.policy.refill_rate
    }

    pub fn policy(&self) -> BucketPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn bucket(capacity: f64, refill_rate: f64) -> (TokenBucket, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let bucket = TokenBucket::new(BucketPolicy::new(capacity, refill_rate), clock.clone())
            .expect("valid policy");
        (bucket, clock)
    }

    #[test]
    fn test_new_bucket_starts_full() {
        let (bucket, _clock) = bucket(5.0, 1.0);
        assert_eq!(bucket.available(), 5.0);
        assert_eq!(bucket.capacity(), 5.0);
        assert_eq!(bucket.refill_rate(), 1.0);
    }

    #[test]
    fn test_burst_then_throttle() {
        let (bucket, _clock) = bucket(3.0, 0.0);

        for i in 0..3 {
            assert!(bucket.allow(), "Request {} should be admitted", i);
        }

        // The 4th request should be rejected
        assert!(!bucket.allow());
        assert!(!bucket.allow());
    }

    #[test]
    fn test_fractional_capacity_admits_floor() {
        let (bucket, _clock) = bucket(2.5, 0.0);

        assert!(bucket.allow());
        assert!(bucket.allow());
        assert!(!bucket.allow());
        assert_eq!(bucket.available(), 0.5);
    }

    #[test]
    fn test_refill_with_manual_clock() {
        let (bucket, clock) = bucket(1.0, 2.0);

        // t=0: 1 -> 0
        assert!(bucket.allow());

        // t=0.4s: 0 + 0.8 < 1, rejected but the partial refill is kept
        clock.advance(Duration::from_millis(400));
        assert!(!bucket.allow());

        // t=0.6s: 0.8 + 0.4 = 1.2, capped at 1
        clock.advance(Duration::from_millis(200));
        assert!(bucket.allow());

        // Nothing left at the same instant
        assert!(!bucket.allow());
    }

    #[test]
    fn test_refill_from_empty_after_one_interval() {
        let (bucket, clock) = bucket(1.0, 2.0);

        assert!(bucket.allow());
        clock.advance(Duration::from_millis(500));
        assert!(bucket.allow());
        assert!(!bucket.allow());
    }

    #[test]
    fn test_refill_is_capped_at_capacity() {
        let (bucket, clock) = bucket(4.0, 10.0);

        for _ in 0..4 {
            assert!(bucket.allow());
        }

        clock.advance(Duration::from_secs(3600));
        assert_eq!(bucket.available(), 4.0);

        // After a long idle period, exactly capacity requests succeed
        for _ in 0..4 {
            assert!(bucket.allow());
        }
        assert!(!bucket.allow());
    }

    #[test]
    fn test_steady_state_spacing_admits_every_call() {
        let (bucket, clock) = bucket(2.0, 4.0);

        assert!(bucket.allow());
        assert!(bucket.allow());
        assert!(!bucket.allow());

        // Calls spaced exactly 1/rate apart are always admitted
        for i in 0..100 {
            clock.advance(Duration::from_millis(250));
            assert!(bucket.allow(), "Spaced request {} should be admitted", i);
        }
    }

    #[test]
    fn test_fast_callers_converge_to_refill_rate() {
        let (bucket, clock) = bucket(1.0, 5.0);
        assert!(bucket.allow());

        // 10 seconds of calls every 50ms (20 per second) against 5 tokens/sec
        let admitted = (0..200)
            .filter(|_| {
                clock.advance(Duration::from_millis(50));
                bucket.allow()
            })
            .count();

        assert!(
            (49..=51).contains(&admitted),
            "expected ~50 admits, got {}",
            admitted
        );
    }

    #[test]
    fn test_backwards_clock_is_clamped() {
        let (bucket, clock) = bucket(1.0, 1.0);
        clock.set(Duration::from_secs(10));
        assert!(bucket.allow());

        // Clock jumps back: no refill, and no negative refill either
        clock.set(Duration::from_secs(5));
        assert!(!bucket.allow());
        assert_eq!(bucket.available(), 0.0);

        // Returning to the original reading does not grant the same time twice
        clock.set(Duration::from_secs(10));
        assert!(!bucket.allow());

        clock.set(Duration::from_secs(11));
        assert!(bucket.allow());
    }

    #[test]
    fn test_available_does_not_consume() {
        let (bucket, clock) = bucket(2.0, 1.0);
        assert!(bucket.allow());
        assert!(bucket.allow());

        clock.advance(Duration::from_millis(1500));
        assert_eq!(bucket.available(), 1.5);
        assert_eq!(bucket.available(), 1.5);
        assert!(bucket.allow());
    }

    #[test]
    fn test_invalid_policies_are_rejected() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());

        for policy in [
            BucketPolicy::new(0.0, 1.0),
            BucketPolicy::new(0.5, 1.0),
            BucketPolicy::new(-3.0, 1.0),
            BucketPolicy::new(f64::NAN, 1.0),
            BucketPolicy::new(f64::INFINITY, 1.0),
            BucketPolicy::new(10.0, -1.0),
            BucketPolicy::new(10.0, f64::NAN),
            BucketPolicy::new(10.0, f64::INFINITY),
        ] {
            let result = TokenBucket::new(policy, clock.clone());
            assert!(
                matches!(result, Err(LimiterError::InvalidArgument(_))),
                "policy {:?} should be rejected",
                policy
            );
        }
    }

    #[test]
    fn test_concurrent_allow_is_exact() {
        let (bucket, _clock) = bucket(50.0, 0.0);
        let admitted = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..20 {
                        if bucket.allow() {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(admitted.into_inner(), 50);
    }

    #[test]
    fn test_default_policy() {
        let policy = BucketPolicy::default();
        assert_eq!(policy.capacity, 100.0);
        assert!((policy.refill_rate - 1.6667).abs() < 1e-3);
        assert!(policy.validate().is_ok());
    }
}
