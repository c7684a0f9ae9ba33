//! Multi-dimension admission control.
//!
//! Three token buckets (requests, input tokens, output tokens) must all admit
//! a call before it goes out. Admission is all-or-nothing: when a later bucket
//! refuses, tokens already taken from earlier buckets are refunded before the
//! caller sleeps, so no caller ever holds one dimension while waiting on
//! another.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::backoff::{Backoff, BackoffConfig};
use super::bucket::TokenBucket;
use super::clock::Clock;
use super::headers::RateLimitHeaders;
use crate::domain::TokenUsage;
use crate::error::{DrainError, Result};

/// Share of output capacity that must be free for an immediate request.
const IMMEDIATE_OUTPUT_HEADROOM: f64 = 0.1;

/// Rate limit configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_minute: u64,
    pub input_tokens_per_minute: u64,
    pub output_tokens_per_minute: u64,
    pub backoff: BackoffConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 50,
            input_tokens_per_minute: 40_000,
            output_tokens_per_minute: 8_000,
            backoff: BackoffConfig::default(),
        }
    }
}

impl RateLimitConfig {
    /// Create config with custom per-minute ceilings and default backoff.
    pub fn new(requests_per_minute: u64, input_tokens_per_minute: u64, output_tokens_per_minute: u64) -> Self {
        Self {
            requests_per_minute,
            input_tokens_per_minute,
            output_tokens_per_minute,
            backoff: BackoffConfig::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Outcome of a single non-blocking admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Granted,
    /// Nothing was taken; try again after this long
    Wait(Duration),
}

/// Ground-truth usage, independent of bucket estimates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageTotals {
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Point-in-time view of the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub requests_available: u64,
    pub input_tokens_available: u64,
    pub output_tokens_available: u64,
    pub usage: UsageTotals,
    pub consecutive_hits: u32,
}

#[derive(Debug)]
struct Buckets {
    requests: TokenBucket,
    input: TokenBucket,
    output: TokenBucket,
}

#[derive(Debug)]
struct BackoffState {
    strategy: Box<dyn Backoff>,
    /// Number of consecutive rate limit hits
    consecutive_hits: u32,
}

/// Shared admission controller for all concurrently executing tasks.
#[derive(Debug)]
pub struct RateLimitManager {
    buckets: Mutex<Buckets>,
    backoff: Mutex<BackoffState>,
    usage: Mutex<UsageTotals>,
    clock: Arc<dyn Clock>,
    max_retries: u32,
}

impl RateLimitManager {
    pub fn new(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let buckets = Buckets {
            requests: TokenBucket::per_minute(config.requests_per_minute, clock.clone()),
            input: TokenBucket::per_minute(config.input_tokens_per_minute, clock.clone()),
            output: TokenBucket::per_minute(config.output_tokens_per_minute, clock.clone()),
        };
        Self {
            buckets: Mutex::new(buckets),
            backoff: Mutex::new(BackoffState {
                strategy: config.backoff.build(),
                consecutive_hits: 0,
            }),
            usage: Mutex::new(UsageTotals::default()),
            clock,
            max_retries: config.backoff.max_retries,
        }
    }

    /// Attempt cap for one task, taken from the backoff configuration.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    // A panic while holding one of these locks cannot leave the counters in a
    // torn state, so poisoning is ignored.
    fn buckets(&self) -> MutexGuard<'_, Buckets> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn backoff(&self) -> MutexGuard<'_, BackoffState> {
        self.backoff.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn usage(&self) -> MutexGuard<'_, UsageTotals> {
        self.usage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// One all-or-nothing admission attempt across the three buckets.
    pub fn try_acquire(&self, est_input: u64, est_output: u64) -> Result<Admission> {
        let mut b = self.buckets();
        check_fits("requests", 1, &b.requests)?;
        check_fits("input tokens", est_input, &b.input)?;
        if est_output > 0 {
            check_fits("output tokens", est_output, &b.output)?;
        }

        if !b.requests.try_consume(1) {
            return Ok(Admission::Wait(to_wait(b.requests.wait_time(1))));
        }

        if !b.input.try_consume(est_input) {
            b.requests.refund(1);
            return Ok(Admission::Wait(to_wait(b.input.wait_time(est_input))));
        }

        if est_output > 0 && !b.output.try_consume(est_output) {
            b.requests.refund(1);
            b.input.refund(est_input);
            return Ok(Admission::Wait(to_wait(b.output.wait_time(est_output))));
        }

        Ok(Admission::Granted)
    }

    /// Block until all three buckets admit the call. Returns the time spent
    /// waiting.
    pub async fn acquire_permit(&self, est_input: u64, est_output: u64) -> Result<Duration> {
        let mut waited = Duration::ZERO;
        loop {
            match self.try_acquire(est_input, est_output)? {
                Admission::Granted => {
                    if !waited.is_zero() {
                        tracing::debug!(waited_ms = waited.as_millis() as u64, "Permit granted after wait");
                    }
                    return Ok(waited);
                }
                Admission::Wait(delay) => {
                    tracing::debug!(
                        delay_ms = delay.as_millis() as u64,
                        est_input,
                        est_output,
                        "Rate limit bucket exhausted, waiting for refill"
                    );
                    self.clock.sleep(delay).await;
                    waited += delay;
                }
            }
        }
    }

    /// Non-blocking check: at least one request, the estimated input tokens
    /// and a tenth of the output capacity are available right now.
    pub fn can_request_immediately(&self, est_input: u64) -> bool {
        let mut b = self.buckets();
        let output_floor = (b.output.capacity() as f64 * IMMEDIATE_OUTPUT_HEADROOM).ceil() as u64;
        b.requests.available() >= 1 && b.input.available() >= est_input && b.output.available() >= output_floor
    }

    /// Accumulate actual usage. Buckets are not touched.
    pub fn record_usage(&self, actual: TokenUsage) {
        let mut usage = self.usage();
        usage.requests += 1;
        usage.input_tokens += actual.input_tokens;
        usage.output_tokens += actual.output_tokens;
    }

    /// Overwrite bucket remaining capacity with provider-reported values.
    pub fn update_from_headers(&self, headers: &RateLimitHeaders) {
        let mut b = self.buckets();

        if let Some(requests) = headers.requests_remaining {
            b.requests.set_tokens(requests);
        }

        let explicit_split = headers.input_tokens_remaining.is_some() || headers.output_tokens_remaining.is_some();
        if let Some(input) = headers.input_tokens_remaining {
            b.input.set_tokens(input);
        }
        if let Some(output) = headers.output_tokens_remaining {
            b.output.set_tokens(output);
        }

        if !explicit_split {
            if let Some(total) = headers.tokens_remaining {
                let (input_share, output_share) = split_combined(total, &mut b);
                b.input.set_tokens(input_share);
                b.output.set_tokens(output_share);
            }
        }

        tracing::debug!(
            requests = b.requests.available(),
            input_tokens = b.input.available(),
            output_tokens = b.output.available(),
            "Synced buckets from provider headers"
        );
    }

    /// Wait out a rate limit response: exactly `retry_after` when the provider
    /// gave one, otherwise the backoff strategy's next delay. Returns the delay.
    pub async fn handle_rate_limit_error(&self, retry_after: Option<Duration>) -> Duration {
        let (delay, hits) = {
            let mut state = self.backoff();
            state.consecutive_hits += 1;
            let delay = match retry_after {
                Some(d) => d,
                None => state.strategy.next_delay(),
            };
            (delay, state.consecutive_hits)
        };

        tracing::warn!(
            delay_ms = delay.as_millis() as u64,
            consecutive_hits = hits,
            "Rate limited, backing off"
        );
        self.clock.sleep(delay).await;
        tracing::info!(consecutive_hits = hits, "Resuming after rate limit backoff");
        delay
    }

    /// Record a successful call: clears the backoff sequence.
    pub fn record_success(&self) {
        let mut state = self.backoff();
        state.consecutive_hits = 0;
        state.strategy.reset();
    }

    pub fn status(&self) -> RateLimitStatus {
        let mut b = self.buckets();
        RateLimitStatus {
            requests_available: b.requests.available(),
            input_tokens_available: b.input.available(),
            output_tokens_available: b.output.available(),
            usage: *self.usage(),
            consecutive_hits: self.backoff().consecutive_hits,
        }
    }

    pub fn usage_totals(&self) -> UsageTotals {
        *self.usage()
    }

    /// Refill every bucket to capacity.
    pub fn reset(&self) {
        let mut b = self.buckets();
        b.requests.reset();
        b.input.reset();
        b.output.reset();
    }
}

fn check_fits(dimension: &'static str, requested: u64, bucket: &TokenBucket) -> Result<()> {
    if requested > bucket.capacity() {
        return Err(DrainError::PermitTooLarge {
            dimension,
            requested,
            capacity: bucket.capacity(),
        });
    }
    Ok(())
}

fn to_wait(ms: u64) -> Duration {
    // Never spin on a zero wait caused by fractional tokens
    Duration::from_millis(ms.max(1))
}

/// Split a combined remaining-tokens figure across input/output by fill ratio.
fn split_combined(total: u64, b: &mut Buckets) -> (u64, u64) {
    let input_ratio = b.input.fill_ratio();
    let output_ratio = b.output.fill_ratio();
    let (input_weight, output_weight) = if input_ratio + output_ratio > 0.0 {
        (input_ratio, output_ratio)
    } else {
        (b.input.capacity() as f64, b.output.capacity() as f64)
    };
    if input_weight + output_weight <= 0.0 {
        return (0, 0);
    }
    let input_share = (total as f64 * input_weight / (input_weight + output_weight)).round() as u64;
    let input_share = input_share.min(total);
    (input_share, total - input_share)
}
