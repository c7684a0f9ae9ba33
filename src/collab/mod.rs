//! Collaborator seams.
//!
//! The orchestrator talks to the outside world only through these traits:
//! - **TaskSource**: Where tasks come from (an issue tracker, a file)
//! - **TaskExecutor**: Runs one task; called concurrently for distinct tasks
//! - **StatusSink**: Receives status changes and completion comments
//!
//! Shipped implementations: `FileTaskSource`, `CommandExecutor`,
//! `DryRunExecutor`, `LogSink`.

mod command;
mod dry_run;
mod sink;
mod source;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{ExecutionResult, Task, TaskStatus};
use crate::error::Result;

pub use command::{CommandExecutor, EXIT_TEMPFAIL};
pub use dry_run::DryRunExecutor;
pub use sink::LogSink;
pub use source::FileTaskSource;

/// Supplies the tasks for a run
#[async_trait]
pub trait TaskSource: Send + Sync {
    /// Fetch tasks, optionally only those whose tracker status matches
    async fn fetch_tasks(&self, status_filter: Option<&str>) -> Result<Vec<Task>>;
}

/// Runs a single task
///
/// `Err` is reserved for executor faults; task-level failures come back as an
/// unsuccessful `ExecutionResult` with an error code.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute_task(&self, task: &Task, context: &ExecutionContext) -> Result<ExecutionResult>;
}

/// Receives status notifications
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn update_status(&self, task_id: &str, status: TaskStatus) -> Result<()>;

    async fn add_comment(&self, task_id: &str, comment: &str) -> Result<()>;
}

/// A recently completed task, handed to the executor as context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedContext {
    pub task_id: String,
    pub title: String,
    pub summary: String,
}

/// Per-call context passed to the executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    /// Most recent completions, oldest first
    pub recent_completed: Vec<CompletedContext>,
    /// 1-based attempt number within the retry loop
    pub attempt: u32,
}

impl ExecutionContext {
    pub fn new(recent_completed: Vec<CompletedContext>) -> Self {
        Self {
            recent_completed,
            attempt: 1,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}
