//! Executor that runs a shell command per task.
//!
//! The command sees the task through environment variables:
//! `DRAINQ_TASK_ID`, `DRAINQ_TASK_TITLE`, `DRAINQ_TASK_DESCRIPTION`,
//! `DRAINQ_ATTEMPT` and `DRAINQ_CONTEXT` (JSON list of recent completions).
//!
//! Exit 0 is success with stdout as output. Exit 75 (`EX_TEMPFAIL`) reports a
//! rate limit; any other status is an execution error.

use async_trait::async_trait;
use log::debug;
use std::path::PathBuf;
use std::time::Instant;
use tokio::process::Command;

use super::{ExecutionContext, TaskExecutor};
use crate::domain::{ErrorCode, ExecutionResult, Task, TaskError, TokenUsage};
use crate::error::{DrainError, Result};

/// Exit status a command uses to ask for a backoff
pub const EXIT_TEMPFAIL: i32 = 75;

/// Lines of stderr kept in an error message
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone)]
pub struct CommandExecutor {
    command: String,
    working_dir: Option<PathBuf>,
}

impl CommandExecutor {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

#[async_trait]
impl TaskExecutor for CommandExecutor {
    async fn execute_task(&self, task: &Task, context: &ExecutionContext) -> Result<ExecutionResult> {
        let started = Instant::now();
        let context_json = serde_json::to_string(&context.recent_completed)?;

        let mut command = Command::new("sh");
        command
            .args(["-c", &self.command])
            .env("DRAINQ_TASK_ID", &task.id)
            .env("DRAINQ_TASK_TITLE", &task.title)
            .env("DRAINQ_TASK_DESCRIPTION", &task.description)
            .env("DRAINQ_ATTEMPT", context.attempt.to_string())
            .env("DRAINQ_CONTEXT", context_json);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let output = command
            .output()
            .await
            .map_err(|e| DrainError::Executor(format!("failed to spawn `{}`: {}", self.command, e)))?;
        let duration_ms = started.elapsed().as_millis() as u64;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!("Command for {} exited with {:?}", task.id, output.status.code());

        let result = match output.status.code() {
            Some(0) => ExecutionResult::success(&task.id, stdout, TokenUsage::default()),
            Some(EXIT_TEMPFAIL) => ExecutionResult::failure(
                &task.id,
                TaskError::new(ErrorCode::RateLimited, format!("command asked to back off: {}", stderr_tail(&stderr))),
            ),
            code => {
                let status = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                ExecutionResult::failure(
                    &task.id,
                    TaskError::new(
                        ErrorCode::ExecutionError,
                        format!("command exited with {}: {}", status, stderr_tail(&stderr)),
                    ),
                )
            }
        };
        Ok(result.with_duration(duration_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::CompletedContext;

    #[tokio::test]
    async fn test_success_captures_stdout() {
        let executor = CommandExecutor::new("echo \"done $DRAINQ_TASK_ID attempt $DRAINQ_ATTEMPT\"");
        let task = Task::new("ENG-7", "title");

        let result = executor
            .execute_task(&task, &ExecutionContext::new(Vec::new()))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output.as_deref(), Some("done ENG-7 attempt 1"));
    }

    #[tokio::test]
    async fn test_context_is_passed_as_json() {
        let executor = CommandExecutor::new("printf '%s' \"$DRAINQ_CONTEXT\"");
        let context = ExecutionContext::new(vec![CompletedContext {
            task_id: "ENG-1".into(),
            title: "first".into(),
            summary: "ok".into(),
        }]);

        let result = executor.execute_task(&Task::new("ENG-2", "second"), &context).await.unwrap();
        let parsed: Vec<CompletedContext> = serde_json::from_str(result.output.as_deref().unwrap()).unwrap();
        assert_eq!(parsed[0].task_id, "ENG-1");
    }

    #[tokio::test]
    async fn test_default_context_reports_attempt_one() {
        let executor = CommandExecutor::new("printf '%s' \"$DRAINQ_ATTEMPT\"");
        let result = executor
            .execute_task(&Task::new("T", "t"), &ExecutionContext::default())
            .await
            .unwrap();
        assert_eq!(result.output.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_tempfail_is_rate_limited() {
        let executor = CommandExecutor::new("echo 'slow down' >&2; exit 75");
        let result = executor
            .execute_task(&Task::new("T", "t"), &ExecutionContext::default())
            .await
            .unwrap();
        let error = result.error.unwrap();
        assert_eq!(error.code, ErrorCode::RateLimited);
        assert!(error.retryable);
        assert!(error.message.contains("slow down"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_execution_error() {
        let executor = CommandExecutor::new("exit 3");
        let result = executor
            .execute_task(&Task::new("T", "t"), &ExecutionContext::default())
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error.unwrap().code, ErrorCode::ExecutionError);
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let text: String = (0..30).map(|i| format!("line {}\n", i)).collect();
        let tail = stderr_tail(&text);
        assert!(tail.starts_with("line 10"));
        assert!(tail.ends_with("line 29"));
    }
}
