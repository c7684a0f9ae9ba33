//! Per-task graph node.

use std::collections::BTreeSet;

use crate::domain::TaskStatus;

/// A node in the dependency graph. Only the graph mutates nodes; callers get
/// shared references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskNode {
    pub(super) id: String,
    pub(super) dependencies: BTreeSet<String>,
    /// Reverse edges: tasks that depend on this one
    pub(super) dependents: BTreeSet<String>,
    pub(super) status: TaskStatus,
    /// Created from a dependency reference, never added as a real task
    pub(super) placeholder: bool,
}

impl TaskNode {
    pub(super) fn new(id: impl Into<String>, placeholder: bool) -> Self {
        Self {
            id: id.into(),
            dependencies: BTreeSet::new(),
            dependents: BTreeSet::new(),
            status: TaskStatus::Pending,
            placeholder,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.dependencies
    }

    pub fn dependents(&self) -> &BTreeSet<String> {
        &self.dependents
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }
}
