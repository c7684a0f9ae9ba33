//! Provider-reported rate limit state.
//!
//! The completion service reports remaining quota on every response. These
//! values overwrite the local bucket estimates when present.

use std::time::Duration;

const REQUESTS_REMAINING: &str = "anthropic-ratelimit-requests-remaining";
const TOKENS_REMAINING: &str = "anthropic-ratelimit-tokens-remaining";
const INPUT_TOKENS_REMAINING: &str = "anthropic-ratelimit-input-tokens-remaining";
const OUTPUT_TOKENS_REMAINING: &str = "anthropic-ratelimit-output-tokens-remaining";
const RETRY_AFTER: &str = "retry-after";

/// Remaining quota as reported by the provider. `None` means "not reported".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub requests_remaining: Option<u64>,
    /// Combined input + output figure, split across buckets when used
    pub tokens_remaining: Option<u64>,
    pub input_tokens_remaining: Option<u64>,
    pub output_tokens_remaining: Option<u64>,
    pub retry_after: Option<Duration>,
}

impl RateLimitHeaders {
    /// Parse from header name/value pairs. Names are matched case-insensitively;
    /// unparseable values are ignored.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut headers = Self::default();
        for (name, value) in pairs {
            let value = value.trim();
            match name.to_ascii_lowercase().as_str() {
                REQUESTS_REMAINING => headers.requests_remaining = value.parse().ok(),
                TOKENS_REMAINING => headers.tokens_remaining = value.parse().ok(),
                INPUT_TOKENS_REMAINING => headers.input_tokens_remaining = value.parse().ok(),
                OUTPUT_TOKENS_REMAINING => headers.output_tokens_remaining = value.parse().ok(),
                RETRY_AFTER => {
                    headers.retry_after = value
                        .parse::<f64>()
                        .ok()
                        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                }
                _ => {}
            }
        }
        headers
    }

    /// True when no field was reported.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
