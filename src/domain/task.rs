//! Task record and related types
//!
//! A Task is fetched once per run and never mutated afterwards. Its
//! dependencies are resolved by the task source; the graph only wires them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A unit of work drained from the backlog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    //=== Identity ===
    /// Tracker identifier ("ENG-42")
    pub id: String,

    pub title: String,

    #[serde(default)]
    pub description: String,

    //=== Scheduling ===
    /// Higher = more urgent = dispatched first
    #[serde(default)]
    pub priority: i32,

    /// Ids this task waits on
    #[serde(default)]
    pub dependencies: BTreeSet<String>,

    #[serde(default)]
    pub labels: Vec<String>,

    /// Expected token cost, used for rate-limit admission
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_tokens: Option<TokenEstimate>,
}

impl Task {
    /// Create a task with no dependencies and priority 0
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            priority: 0,
            dependencies: BTreeSet::new(),
            labels: Vec::new(),
            estimated_tokens: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.insert(dependency.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    pub fn with_estimate(mut self, input: u64, output: u64) -> Self {
        self.estimated_tokens = Some(TokenEstimate { input, output });
        self
    }
}

/// Estimated token cost of one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenEstimate {
    pub input: u64,
    pub output: u64,
}

/// Token usage reported by the completion service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Accumulate another usage into this one
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Position of a task in the per-run state machine
///
/// `pending -> executing -> {completed | failed}` and `pending -> blocked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting on dependencies or a free slot
    Pending,
    /// Dispatched in the current batch
    Executing,
    Completed,
    Failed,
    /// An ancestor failed; cannot run this run
    Blocked,
}

impl TaskStatus {
    /// Returns true if the task can no longer change status this run
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Blocked)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Executing => "executing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Blocked => "blocked",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_builder() {
        let task = Task::new("T-1", "Write docs")
            .with_description("Document the API")
            .with_priority(5)
            .with_dependency("T-0")
            .with_label("docs")
            .with_estimate(1000, 500);

        assert_eq!(task.id, "T-1");
        assert_eq!(task.priority, 5);
        assert!(task.dependencies.contains("T-0"));
        assert_eq!(task.labels, vec!["docs".to_string()]);
        assert_eq!(task.estimated_tokens, Some(TokenEstimate { input: 1000, output: 500 }));
    }

    #[test]
    fn test_task_deserialize_minimal() {
        let task: Task = serde_json::from_str(r#"{"id": "T-1", "title": "Minimal"}"#).unwrap();
        assert_eq!(task.priority, 0);
        assert!(task.dependencies.is_empty());
        assert!(task.estimated_tokens.is_none());
    }

    #[test]
    fn test_task_deserialize_camel_case() {
        let json = r#"{
            "id": "T-2",
            "title": "With deps",
            "priority": 3,
            "dependencies": ["T-1"],
            "estimatedTokens": {"input": 10, "output": 20}
        }"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.priority, 3);
        assert_eq!(task.estimated_tokens.unwrap().output, 20);
    }

    #[test]
    fn test_token_usage_add_and_total() {
        let mut usage = TokenUsage::new(100, 50);
        usage.add(TokenUsage::new(10, 5));
        assert_eq!(usage.input_tokens, 110);
        assert_eq!(usage.output_tokens, 55);
        assert_eq!(usage.total(), 165);
    }

    #[test]
    fn test_task_status_terminal() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Executing.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Blocked.is_terminal());
    }

    #[test]
    fn test_task_status_serde_lowercase() {
        let json = serde_json::to_string(&TaskStatus::Blocked).unwrap();
        assert_eq!(json, "\"blocked\"");
        assert_eq!(TaskStatus::Executing.to_string(), "executing");
    }
}
