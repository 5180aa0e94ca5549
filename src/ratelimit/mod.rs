//! Rate limiting logic and state management.

mod backend;
mod bucket;
mod clock;
mod registry;

pub use backend::RateLimiter;
pub use bucket::{BucketPolicy, TokenBucket, DEFAULT_CAPACITY, DEFAULT_REFILL_RATE};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use registry::LimiterRegistry;
