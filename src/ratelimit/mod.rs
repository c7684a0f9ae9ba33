//! Rate limiting for the completion service.
//!
//! This module provides:
//! - **Token buckets**: Lazily refilled single-resource admission counters.
//! - **Backoff**: Exponential and decorrelated-jitter retry schedules.
//! - **RateLimitManager**: All-or-nothing admission over requests, input
//!   tokens and output tokens, with provider header reconciliation.
//! - **Clock**: Injectable time so waits are deterministic under test.

mod backoff;
mod bucket;
mod clock;
mod headers;
mod manager;

pub use backoff::{Backoff, BackoffConfig, BackoffStrategy, DecorrelatedJitterBackoff, ExponentialBackoff};
pub use bucket::TokenBucket;
pub use clock::{Clock, ManualClock, SystemClock};
pub use headers::RateLimitHeaders;
pub use manager::{Admission, RateLimitConfig, RateLimitManager, RateLimitStatus, UsageTotals};
