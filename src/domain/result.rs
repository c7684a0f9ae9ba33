//! Task execution outcome types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::task::TokenUsage;

/// Error taxonomy for a single task attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Provider returned 429
    RateLimited,
    /// Provider signalled it is out of capacity
    Overloaded,
    /// 5xx-class failure
    ServerError,
    /// 4xx-class failure other than rate limiting
    ClientError,
    /// Output failed local checks
    ValidationFailed,
    /// Uncaught fault during an attempt
    ExecutionError,
    UnknownError,
}

impl ErrorCode {
    /// Whether an attempt failing with this code should be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::RateLimited | ErrorCode::Overloaded | ErrorCode::ServerError | ErrorCode::ExecutionError
        )
    }

    /// Map an HTTP status from the completion service to an error code
    pub fn from_http_status(status: u16) -> Self {
        match status {
            429 => ErrorCode::RateLimited,
            529 => ErrorCode::Overloaded,
            500..=599 => ErrorCode::ServerError,
            400..=499 => ErrorCode::ClientError,
            _ => ErrorCode::UnknownError,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::Overloaded => "OVERLOADED",
            ErrorCode::ServerError => "SERVER_ERROR",
            ErrorCode::ClientError => "CLIENT_ERROR",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::ExecutionError => "EXECUTION_ERROR",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error attached to a failed attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskError {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
    /// Provider-supplied wait before the next attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl TaskError {
    /// Create an error whose retryability follows its code
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: code.is_retryable(),
            retry_after_secs: None,
        }
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_secs.map(Duration::from_secs)
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Outcome of running one task (after its retry loop)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub task_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    pub tokens_used: TokenUsage,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionResult {
    /// Successful result with the given output
    pub fn success(task_id: impl Into<String>, output: impl Into<String>, tokens_used: TokenUsage) -> Self {
        Self {
            task_id: task_id.into(),
            success: true,
            output: Some(output.into()),
            artifacts: Vec::new(),
            error: None,
            tokens_used,
            duration_ms: 0,
            timestamp: Utc::now(),
        }
    }

    /// Failed result carrying the given error
    pub fn failure(task_id: impl Into<String>, error: TaskError) -> Self {
        Self {
            task_id: task_id.into(),
            success: false,
            output: None,
            artifacts: Vec::new(),
            error: Some(error),
            tokens_used: TokenUsage::default(),
            duration_ms: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_artifacts(mut self, artifacts: Vec<String>) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn with_tokens(mut self, tokens_used: TokenUsage) -> Self {
        self.tokens_used = tokens_used;
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Whether the retry loop should try this task again
    pub fn is_retryable(&self) -> bool {
        !self.success && self.error.as_ref().is_some_and(|e| e.retryable)
    }

    /// Error text recorded in the failed map
    pub fn error_message(&self) -> String {
        match &self.error {
            Some(e) => e.to_string(),
            None if self.success => String::new(),
            None => "UNKNOWN_ERROR: task failed without an error".to_string(),
        }
    }

    /// One-paragraph summary posted as a comment on the task
    pub fn summary(&self) -> String {
        if self.success {
            let mut text = format!(
                "Completed in {}ms using {} tokens ({} in / {} out).",
                self.duration_ms,
                self.tokens_used.total(),
                self.tokens_used.input_tokens,
                self.tokens_used.output_tokens
            );
            if !self.artifacts.is_empty() {
                text.push_str(&format!(" Artifacts: {}.", self.artifacts.join(", ")));
            }
            text
        } else {
            format!("Failed after {}ms: {}", self.duration_ms, self.error_message())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_retryable() {
        assert!(ErrorCode::RateLimited.is_retryable());
        assert!(ErrorCode::Overloaded.is_retryable());
        assert!(ErrorCode::ServerError.is_retryable());
        assert!(ErrorCode::ExecutionError.is_retryable());
        assert!(!ErrorCode::ClientError.is_retryable());
        assert!(!ErrorCode::ValidationFailed.is_retryable());
        assert!(!ErrorCode::UnknownError.is_retryable());
    }

    #[test]
    fn test_error_code_from_http_status() {
        assert_eq!(ErrorCode::from_http_status(429), ErrorCode::RateLimited);
        assert_eq!(ErrorCode::from_http_status(529), ErrorCode::Overloaded);
        assert_eq!(ErrorCode::from_http_status(503), ErrorCode::ServerError);
        assert_eq!(ErrorCode::from_http_status(400), ErrorCode::ClientError);
        assert_eq!(ErrorCode::from_http_status(302), ErrorCode::UnknownError);
    }

    #[test]
    fn test_error_code_serde() {
        let json = serde_json::to_string(&ErrorCode::ValidationFailed).unwrap();
        assert_eq!(json, "\"VALIDATION_FAILED\"");
        let code: ErrorCode = serde_json::from_str("\"RATE_LIMITED\"").unwrap();
        assert_eq!(code, ErrorCode::RateLimited);
    }

    #[test]
    fn test_task_error_retryable_follows_code() {
        let err = TaskError::new(ErrorCode::ServerError, "502 bad gateway");
        assert!(err.retryable);
        assert_eq!(err.to_string(), "SERVER_ERROR: 502 bad gateway");

        let err = TaskError::new(ErrorCode::ClientError, "400").with_retry_after(3);
        assert!(!err.retryable);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_execution_result_retryable() {
        let ok = ExecutionResult::success("T-1", "done", TokenUsage::new(1, 1));
        assert!(!ok.is_retryable());

        let retry = ExecutionResult::failure("T-1", TaskError::new(ErrorCode::RateLimited, "429"));
        assert!(retry.is_retryable());

        let fatal = ExecutionResult::failure("T-1", TaskError::new(ErrorCode::ValidationFailed, "bad"));
        assert!(!fatal.is_retryable());
    }

    #[test]
    fn test_execution_result_summary() {
        let ok = ExecutionResult::success("T-1", "done", TokenUsage::new(100, 20))
            .with_duration(1500)
            .with_artifacts(vec!["src/lib.rs".to_string()]);
        let summary = ok.summary();
        assert!(summary.contains("1500ms"));
        assert!(summary.contains("120 tokens"));
        assert!(summary.contains("src/lib.rs"));

        let failed = ExecutionResult::failure("T-1", TaskError::new(ErrorCode::ClientError, "nope"));
        assert!(failed.summary().contains("CLIENT_ERROR: nope"));
    }
}
