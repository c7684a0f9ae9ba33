//! On-disk checkpoint format.
//!
//! Sets and maps from `ExecutionState` are stored as sorted lists so the files
//! diff cleanly between saves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ExecutionState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedTaskEntry {
    pub task_id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointRecord {
    pub checkpoint_id: String,
    pub timestamp: DateTime<Utc>,
    pub completed_tasks: Vec<String>,
    pub failed_tasks: Vec<FailedTaskEntry>,
    pub in_progress_tasks: Vec<String>,
    pub total_tokens_used: u64,
    pub execution_time_ms: u64,
}

impl CheckpointRecord {
    /// Snapshot a state under the given checkpoint id.
    pub fn from_state(state: &ExecutionState, checkpoint_id: impl Into<String>) -> Self {
        let mut completed_tasks: Vec<String> = state.completed.iter().cloned().collect();
        completed_tasks.sort();

        let mut failed_tasks: Vec<FailedTaskEntry> = state
            .failed
            .iter()
            .map(|(task_id, error)| FailedTaskEntry {
                task_id: task_id.clone(),
                error: error.clone(),
            })
            .collect();
        failed_tasks.sort_by(|a, b| a.task_id.cmp(&b.task_id));

        let mut in_progress_tasks: Vec<String> = state.in_progress.iter().cloned().collect();
        in_progress_tasks.sort();

        Self {
            checkpoint_id: checkpoint_id.into(),
            timestamp: state.timestamp,
            completed_tasks,
            failed_tasks,
            in_progress_tasks,
            total_tokens_used: state.total_tokens_used,
            execution_time_ms: state.execution_time_ms,
        }
    }

    pub fn into_state(self) -> ExecutionState {
        ExecutionState {
            checkpoint_id: self.checkpoint_id,
            timestamp: self.timestamp,
            completed: self.completed_tasks.into_iter().collect(),
            failed: self
                .failed_tasks
                .into_iter()
                .map(|entry| (entry.task_id, entry.error))
                .collect(),
            in_progress: self.in_progress_tasks.into_iter().collect(),
            total_tokens_used: self.total_tokens_used,
            execution_time_ms: self.execution_time_ms,
        }
    }
}
