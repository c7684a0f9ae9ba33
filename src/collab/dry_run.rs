//! Executor that does no work.
//!
//! Succeeds for every task and reports the task's estimate (or a default) as
//! its usage, so a dry run exercises scheduling and rate limiting end to end.

use async_trait::async_trait;
use log::info;
use std::time::{Duration, Instant};

use super::{ExecutionContext, TaskExecutor};
use crate::domain::{ExecutionResult, Task, TokenEstimate, TokenUsage};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct DryRunExecutor {
    default_estimate: TokenEstimate,
    /// Simulated work time per task
    delay: Duration,
}

impl DryRunExecutor {
    pub fn new(default_estimate: TokenEstimate) -> Self {
        Self {
            default_estimate,
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl TaskExecutor for DryRunExecutor {
    async fn execute_task(&self, task: &Task, context: &ExecutionContext) -> Result<ExecutionResult> {
        let started = Instant::now();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let estimate = task.estimated_tokens.unwrap_or(self.default_estimate);
        info!(
            "[dry-run] {} \"{}\" (attempt {}, {} prior completions in context)",
            task.id,
            task.title,
            context.attempt,
            context.recent_completed.len()
        );

        Ok(ExecutionResult::success(
            &task.id,
            format!("dry run: {}", task.title),
            TokenUsage::new(estimate.input, estimate.output),
        )
        .with_duration(started.elapsed().as_millis() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reports_task_estimate() {
        let executor = DryRunExecutor::new(TokenEstimate { input: 10, output: 5 });
        let task = Task::new("T-1", "with estimate").with_estimate(300, 40);

        let result = executor.execute_task(&task, &ExecutionContext::default()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.tokens_used, TokenUsage::new(300, 40));
        assert_eq!(result.task_id, "T-1");
    }

    #[tokio::test]
    async fn test_falls_back_to_default_estimate() {
        let executor = DryRunExecutor::new(TokenEstimate { input: 10, output: 5 });
        let task = Task::new("T-2", "no estimate");

        let result = executor.execute_task(&task, &ExecutionContext::default()).await.unwrap();
        assert_eq!(result.tokens_used, TokenUsage::new(10, 5));
    }
}
