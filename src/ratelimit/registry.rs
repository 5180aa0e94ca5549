//! Per-key registry of token buckets.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

use super::backend::RateLimiter;
use super::bucket::{BucketPolicy, TokenBucket};
use super::clock::{Clock, MonotonicClock};
use crate::config::LimiterConfig;
use crate::error::{LimiterError, Result};

/// Maps keys to their own token bucket, created on first use.
///
/// This struct is thread-safe and can be shared across threads and tasks.
/// Lookups of existing buckets only take the map's read lock; creating a
/// bucket takes the write lock and re-checks, so each key gets exactly one
/// bucket for the lifetime of the registry. The map lock is always released
/// before a bucket's own lock is taken.
#[derive(Debug)]
pub struct LimiterRegistry {
    /// Token buckets indexed by key
    buckets: RwLock<HashMap<String, Arc<TokenBucket>>>,
    /// Policy for keys without an override
    default_policy: BucketPolicy,
    /// Per-key policies, fixed at construction
    overrides: HashMap<String, BucketPolicy>,
    /// Shared by every bucket this registry creates
    clock: Arc<dyn Clock>,
}

impl LimiterRegistry {
    /// Create a registry whose buckets hold `capacity` tokens and refill at
    /// `refill_rate_per_sec` tokens per second.
    pub fn new(capacity: u32, refill_rate_per_sec: f64) -> Result<Self> {
        Self::with_clock(
            BucketPolicy::new(f64::from(capacity), refill_rate_per_sec),
            Arc::new(MonotonicClock::new()),
        )
    }

    /// Create a registry driven by the given clock.
    pub fn with_clock(policy: BucketPolicy, clock: Arc<dyn Clock>) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            buckets: RwLock::new(HashMap::new()),
            default_policy: policy,
            overrides: HashMap::new(),
            clock,
        })
    }

    /// Create a registry from configuration, including per-key overrides.
    pub fn from_config(config: &LimiterConfig) -> Result<Self> {
        Self::from_config_with_clock(config, Arc::new(MonotonicClock::new()))
    }

    pub fn from_config_with_clock(config: &LimiterConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let mut registry = Self::with_clock(config.default, clock)?;
        for (key, policy) in &config.overrides {
            registry = registry.with_override(key.clone(), *policy)?;
        }
        Ok(registry)
    }

    /// Give `key` its own policy instead of the registry default.
    pub fn with_override(mut self, key: impl Into<String>, policy: BucketPolicy) -> Result<Self> {
        let key = key.into();
        policy.validate().map_err(|e| {
            LimiterError::InvalidArgument(format!("override for key {:?}: {}", key, e))
        })?;
        self.overrides.insert(key, policy);
        Ok(self)
    }

    /// Decide whether one more request for `key` may proceed right now.
    pub fn allow(&self, key: &str) -> bool {
        let bucket = self.bucket(key);
        let allowed = bucket.allow();

        trace!(key = %key, allowed = allowed, "Checked rate limit");
        if !allowed {
            debug!(key = %key, "Rate limit exceeded");
        }

        allowed
    }

    /// Policy that applies, or would apply, to `key`'s bucket.
    pub fn policy_for(&self, key: &str) -> BucketPolicy {
        self.overrides
            .get(key)
            .copied()
            .unwrap_or(self.default_policy)
    }

    /// Tokens currently available to `key`, or `None` if it has no bucket yet.
    pub fn available(&self, key: &str) -> Option<f64> {
        let bucket = self.buckets.read().get(key).cloned();
        bucket.map(|b| b.available())
    }

    /// Whether a bucket has been created for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.buckets.read().contains_key(key)
    }

    /// Get the number of buckets created so far.
    pub fn bucket_count(&self) -> usize {
        self.buckets.read().len()
    }

    /// Look up the bucket for `key`, creating it on first use.
    fn bucket(&self, key: &str) -> Arc<TokenBucket> {
        if let Some(bucket) = self.buckets.read().get(key) {
            return Arc::clone(bucket);
        }

        let mut buckets = self.buckets.write();
        // Another caller may have created it between the two locks
        if let Some(bucket) = buckets.get(key) {
            return Arc::clone(bucket);
        }

        let policy = self.policy_for(key);
        debug!(
            key = %key,
            capacity = policy.capacity,
            refill_rate = policy.refill_rate,
            "Creating new token bucket"
        );
        // Every policy held by the registry was validated when it was added
        let bucket = Arc::new(TokenBucket::with_validated(policy, Arc::clone(&self.clock)));
        buckets.insert(key.to_string(), Arc::clone(&bucket));
        bucket
    }
}

impl RateLimiter for LimiterRegistry {
    fn allow(&self, key: &str) -> bool {
        LimiterRegistry::allow(self, key)
    }
}
