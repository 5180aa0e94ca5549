//! Keygate - Per-Key Token Bucket Rate Limiting
//!
//! This crate implements admission control for arbitrarily many independent
//! keys (users, client addresses, API tokens). Each key gets its own token
//! bucket, created lazily on first use and owned by a [`LimiterRegistry`].

pub mod config;
pub mod error;
pub mod ratelimit;

pub use config::LimiterConfig;
pub use error::{LimiterError, Result};
pub use ratelimit::{
    BucketPolicy, Clock, LimiterRegistry, ManualClock, MonotonicClock, RateLimiter, TokenBucket,
};
