//! Single-resource token bucket with lazy continuous refill.
//!
//! The bucket never blocks. Callers ask how long to wait and do the waiting
//! themselves.

use std::sync::Arc;
use std::time::Duration;

use super::clock::Clock;

#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    /// Tokens added per `refill_interval_ms`
    refill_amount: f64,
    refill_interval_ms: f64,
    last_refill_ms: u64,
    clock: Arc<dyn Clock>,
}

impl TokenBucket {
    /// Full bucket refilling `refill_amount` tokens every `refill_interval`.
    pub fn new(capacity: u64, refill_amount: u64, refill_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        let last_refill_ms = clock.now_ms();
        Self {
            capacity: capacity as f64,
            tokens: capacity as f64,
            refill_amount: refill_amount as f64,
            refill_interval_ms: (refill_interval.as_millis() as f64).max(1.0),
            last_refill_ms,
            clock,
        }
    }

    /// Full bucket that regains its whole capacity once per minute.
    pub fn per_minute(capacity: u64, clock: Arc<dyn Clock>) -> Self {
        Self::new(capacity, capacity, Duration::from_secs(60), clock)
    }

    /// Refill rate in tokens per millisecond.
    pub fn refill_rate_per_ms(&self) -> f64 {
        self.refill_amount / self.refill_interval_ms
    }

    pub fn capacity(&self) -> u64 {
        self.capacity as u64
    }

    fn refill(&mut self) {
        let now = self.clock.now_ms();
        let elapsed = now.saturating_sub(self.last_refill_ms) as f64;
        if elapsed > 0.0 {
            let added = elapsed * self.refill_amount / self.refill_interval_ms;
            self.tokens = (self.tokens + added).min(self.capacity);
            self.last_refill_ms = now;
        }
    }

    /// Take `n` tokens if available. Leaves the bucket untouched otherwise.
    pub fn try_consume(&mut self, n: u64) -> bool {
        self.refill();
        let n = n as f64;
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Milliseconds until `n` tokens are available, 0 if they already are.
    pub fn wait_time(&mut self, n: u64) -> u64 {
        self.refill();
        let n = n as f64;
        if self.tokens >= n || self.refill_amount <= 0.0 {
            return 0;
        }
        let deficit = n - self.tokens;
        (deficit * self.refill_interval_ms / self.refill_amount).ceil() as u64
    }

    /// Whole tokens currently available.
    pub fn available(&mut self) -> u64 {
        self.refill();
        self.tokens.floor() as u64
    }

    /// Fraction of capacity currently available, in [0, 1].
    pub fn fill_ratio(&mut self) -> f64 {
        self.refill();
        if self.capacity <= 0.0 { 0.0 } else { self.tokens / self.capacity }
    }

    /// Overwrite the remaining count with an externally observed value.
    pub fn set_tokens(&mut self, n: u64) {
        self.refill();
        self.tokens = (n as f64).clamp(0.0, self.capacity);
    }

    /// Give back tokens taken by an admission attempt that was abandoned.
    pub fn refund(&mut self, n: u64) {
        self.refill();
        self.tokens = (self.tokens + n as f64).min(self.capacity);
    }

    /// Refill to capacity.
    pub fn reset(&mut self) {
        self.tokens = self.capacity;
        self.last_refill_ms = self.clock.now_ms();
    }
}
