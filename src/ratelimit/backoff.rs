//! Retry delay schedules.
//!
//! Two policies share the `Backoff` trait:
//! - `ExponentialBackoff`: base * 2^attempt capped at max, with symmetric jitter
//! - `DecorrelatedJitterBackoff`: random(base, min(max, 3 * previous))

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A stateful delay schedule for one retry sequence.
pub trait Backoff: Send + Sync + std::fmt::Debug {
    /// Delay before the next retry; advances the attempt counter.
    fn next_delay(&mut self) -> Duration;

    /// Whether another retry is allowed.
    fn can_retry(&self) -> bool;

    /// Start over (called on any success).
    fn reset(&mut self);

    /// Retries handed out since the last reset.
    fn attempt(&self) -> u32;
}

/// Which delay schedule to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    #[default]
    Exponential,
    Decorrelated,
}

/// Backoff configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub strategy: BackoffStrategy,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Attempts per task, including the first
    pub max_retries: u32,
    /// Fraction of the delay applied as +/- random jitter (exponential only)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            max_retries: 3,
            jitter_factor: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Build the configured schedule.
    pub fn build(&self) -> Box<dyn Backoff> {
        let base = Duration::from_millis(self.base_delay_ms);
        let max = Duration::from_millis(self.max_delay_ms);
        match self.strategy {
            BackoffStrategy::Exponential => {
                Box::new(ExponentialBackoff::new(base, max, self.max_retries).with_jitter(self.jitter_factor))
            }
            BackoffStrategy::Decorrelated => Box::new(DecorrelatedJitterBackoff::new(base, max, self.max_retries)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    max_retries: u32,
    jitter_factor: f64,
    attempt: u32,
}

impl ExponentialBackoff {
    /// Deterministic schedule (no jitter).
    pub fn new(base: Duration, max: Duration, max_retries: u32) -> Self {
        Self {
            base,
            max,
            max_retries,
            jitter_factor: 0.0,
            attempt: 0,
        }
    }

    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor.clamp(0.0, 1.0);
        self
    }

    /// Un-jittered delay for a given attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

impl Backoff for ExponentialBackoff {
    fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        if self.jitter_factor <= 0.0 {
            return delay;
        }
        let spread = delay.as_secs_f64() * self.jitter_factor * rand::rng().random_range(-1.0..=1.0);
        Duration::from_secs_f64((delay.as_secs_f64() + spread).max(0.0))
    }

    fn can_retry(&self) -> bool {
        self.attempt < self.max_retries
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Spreads concurrent retries further apart than pure exponential.
#[derive(Debug, Clone)]
pub struct DecorrelatedJitterBackoff {
    base: Duration,
    max: Duration,
    max_retries: u32,
    previous: Option<Duration>,
    attempt: u32,
}

impl DecorrelatedJitterBackoff {
    pub fn new(base: Duration, max: Duration, max_retries: u32) -> Self {
        Self {
            base,
            max,
            max_retries,
            previous: None,
            attempt: 0,
        }
    }
}

impl Backoff for DecorrelatedJitterBackoff {
    fn next_delay(&mut self) -> Duration {
        let delay = match self.previous {
            None => self.base.min(self.max),
            Some(previous) => {
                let upper = previous.saturating_mul(3).min(self.max);
                if upper <= self.base {
                    upper
                } else {
                    let ms = rand::rng().random_range(self.base.as_millis() as u64..=upper.as_millis() as u64);
                    Duration::from_millis(ms)
                }
            }
        };
        self.previous = Some(delay);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    fn can_retry(&self) -> bool {
        self.attempt < self.max_retries
    }

    fn reset(&mut self) {
        self.attempt = 0;
        self.previous = None;
    }

    fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_doubles_and_caps() {
        let mut b = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_millis(1_000), 10);
        let delays: Vec<u128> = (0..6).map(|_| b.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
        assert_eq!(b.attempt(), 6);
    }

    #[test]
    fn test_exponential_can_retry_and_reset() {
        let mut b = ExponentialBackoff::new(Duration::from_millis(10), Duration::from_secs(1), 2);
        assert!(b.can_retry());
        b.next_delay();
        b.next_delay();
        assert!(!b.can_retry());

        b.reset();
        assert!(b.can_retry());
        assert_eq!(b.next_delay(), Duration::from_millis(10));
    }

    #[test]
    fn test_exponential_jitter_stays_in_band() {
        let mut b = ExponentialBackoff::new(Duration::from_millis(1_000), Duration::from_secs(60), 100).with_jitter(0.2);
        for _ in 0..50 {
            b.reset();
            let d = b.next_delay().as_millis();
            assert!((800..=1_200).contains(&d), "delay {} out of band", d);
        }
    }

    #[test]
    fn test_exponential_huge_attempt_saturates() {
        let b = ExponentialBackoff::new(Duration::from_millis(1), Duration::from_secs(30), 100);
        assert_eq!(b.delay_for(64), Duration::from_secs(30));
    }

    #[test]
    fn test_decorrelated_first_delay_is_base() {
        let mut b = DecorrelatedJitterBackoff::new(Duration::from_millis(100), Duration::from_secs(10), 5);
        assert_eq!(b.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_decorrelated_bounds() {
        let base = Duration::from_millis(100);
        let max = Duration::from_millis(2_000);
        let mut b = DecorrelatedJitterBackoff::new(base, max, 100);
        let mut previous = b.next_delay();
        for _ in 0..50 {
            let d = b.next_delay();
            assert!(d >= base);
            assert!(d <= max);
            assert!(d <= previous.saturating_mul(3));
            previous = d;
        }
    }

    #[test]
    fn test_decorrelated_reset_forgets_previous() {
        let mut b = DecorrelatedJitterBackoff::new(Duration::from_millis(50), Duration::from_secs(5), 3);
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.attempt(), 0);
        assert_eq!(b.next_delay(), Duration::from_millis(50));
    }

    #[test]
    fn test_config_builds_strategy() {
        let config = BackoffConfig {
            strategy: BackoffStrategy::Decorrelated,
            base_delay_ms: 20,
            max_delay_ms: 100,
            max_retries: 1,
            jitter_factor: 0.0,
        };
        let mut b = config.build();
        assert!(b.can_retry());
        assert_eq!(b.next_delay(), Duration::from_millis(20));
        assert!(!b.can_retry());
    }
}
