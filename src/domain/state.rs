//! Execution state - the unit of durability
//!
//! Mutated only by the orchestrator and persisted after every batch. The
//! mutators keep `completed` and `failed` disjoint.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

use crate::id::generate_checkpoint_id;

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionState {
    pub checkpoint_id: String,
    pub timestamp: DateTime<Utc>,
    pub completed: HashSet<String>,
    /// Task id -> error text
    pub failed: HashMap<String, String>,
    /// Dispatched in the current batch; empty in every batch checkpoint
    pub in_progress: HashSet<String>,
    pub total_tokens_used: u64,
    pub execution_time_ms: u64,
}

impl ExecutionState {
    /// Fresh state with a new checkpoint id and zeroed counters
    pub fn new() -> Self {
        Self::with_id(generate_checkpoint_id())
    }

    pub fn with_id(checkpoint_id: impl Into<String>) -> Self {
        Self {
            checkpoint_id: checkpoint_id.into(),
            timestamp: Utc::now(),
            completed: HashSet::new(),
            failed: HashMap::new(),
            in_progress: HashSet::new(),
            total_tokens_used: 0,
            execution_time_ms: 0,
        }
    }

    pub fn mark_in_progress(&mut self, task_id: &str) {
        self.in_progress.insert(task_id.to_string());
    }

    pub fn mark_completed(&mut self, task_id: &str) {
        self.in_progress.remove(task_id);
        self.failed.remove(task_id);
        self.completed.insert(task_id.to_string());
    }

    pub fn mark_failed(&mut self, task_id: &str, error: impl Into<String>) {
        self.in_progress.remove(task_id);
        self.completed.remove(task_id);
        self.failed.insert(task_id.to_string(), error.into());
    }

    pub fn clear_in_progress(&mut self) {
        self.in_progress.clear();
    }

    /// Forget failures so a resumed run can try those tasks again
    pub fn clear_failed(&mut self) -> Vec<String> {
        let mut cleared: Vec<String> = self.failed.drain().map(|(id, _)| id).collect();
        cleared.sort();
        cleared
    }

    pub fn add_tokens(&mut self, tokens: u64) {
        self.total_tokens_used += tokens;
    }

    pub fn add_execution_time(&mut self, ms: u64) {
        self.execution_time_ms += ms;
    }

    pub fn is_completed(&self, task_id: &str) -> bool {
        self.completed.contains(task_id)
    }

    pub fn is_failed(&self, task_id: &str) -> bool {
        self.failed.contains_key(task_id)
    }

    /// Refresh the timestamp before persisting
    pub fn touch(&mut self) {
        self.timestamp = Utc::now();
    }
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self::new()
    }
}
