//! Dependency DAG over task ids with the per-task status state machine.
//!
//! Edges point from a task to the tasks it depends on. Reverse edges
//! (dependents) are maintained alongside so blocking can cascade forward.

use log::{debug, warn};
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet, VecDeque};

use super::node::TaskNode;
use crate::domain::{Task, TaskStatus};
use crate::error::{DrainError, Result};

/// Result of a structural check of the graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Each cycle is the dependency path from its first node back to itself
    pub cycles: Vec<Vec<String>>,
    /// Ids referenced as dependencies but never added as tasks (non-fatal)
    pub orphans: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.cycles.is_empty()
    }
}

/// Number of real (non-placeholder) tasks in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub executing: usize,
    pub completed: usize,
    pub failed: usize,
    pub blocked: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.executing + self.completed + self.failed + self.blocked
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    OnPath,
    Done,
}

/// One frame of the iterative depth-first search.
struct Frame<'a> {
    id: &'a str,
    deps: Vec<&'a str>,
    next: usize,
}

/// Owner of all node state for one run.
#[derive(Debug, Default)]
pub struct TaskGraph {
    nodes: HashMap<String, TaskNode>,
    tasks: HashMap<String, Task>,
    /// Node ids in the order they were first observed
    order: Vec<String>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from a task list.
    pub fn from_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        let mut graph = Self::new();
        for task in tasks {
            graph.add_task(task);
        }
        graph
    }

    fn ensure_node(&mut self, id: &str, placeholder: bool) -> &mut TaskNode {
        if !self.nodes.contains_key(id) {
            self.order.push(id.to_string());
        }
        self.nodes
            .entry(id.to_string())
            .or_insert_with(|| TaskNode::new(id, placeholder))
    }

    /// Insert or replace a task, wiring reverse edges and creating placeholder
    /// nodes for dependencies that have not been seen yet.
    pub fn add_task(&mut self, task: Task) {
        let id = task.id.clone();

        let node = self.ensure_node(&id, false);
        node.placeholder = false;
        let previous = std::mem::replace(&mut node.dependencies, task.dependencies.clone());

        for old in previous.difference(&task.dependencies) {
            if let Some(dep) = self.nodes.get_mut(old) {
                dep.dependents.remove(&id);
            }
        }

        for dep_id in &task.dependencies {
            let dep = self.ensure_node(dep_id, true);
            dep.dependents.insert(id.clone());
        }

        debug!("Added task {} with {} dependencies", id, task.dependencies.len());
        self.tasks.insert(id, task);
    }

    /// Depth-first cycle search plus orphan report.
    pub fn validate_acyclic(&self) -> ValidationReport {
        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut cycles = Vec::new();

        for start in &self.order {
            if marks.contains_key(start.as_str()) {
                continue;
            }

            let mut path: Vec<&str> = vec![start.as_str()];
            let mut stack = vec![self.frame(start)];
            marks.insert(start.as_str(), Mark::OnPath);

            while let Some(frame) = stack.last_mut() {
                if frame.next < frame.deps.len() {
                    let dep = frame.deps[frame.next];
                    frame.next += 1;
                    match marks.get(dep) {
                        Some(Mark::OnPath) => {
                            let from = path.iter().position(|p| *p == dep).unwrap_or(0);
                            let mut cycle: Vec<String> = path[from..].iter().map(|s| s.to_string()).collect();
                            cycle.push(dep.to_string());
                            cycles.push(cycle);
                        }
                        Some(Mark::Done) => {}
                        None => {
                            marks.insert(dep, Mark::OnPath);
                            path.push(dep);
                            stack.push(self.frame(dep));
                        }
                    }
                } else {
                    marks.insert(frame.id, Mark::Done);
                    path.pop();
                    stack.pop();
                }
            }
        }

        let orphans = self
            .order
            .iter()
            .filter(|id| self.nodes.get(id.as_str()).is_some_and(|n| n.placeholder))
            .cloned()
            .collect::<Vec<_>>();

        if !orphans.is_empty() {
            warn!("Dependencies never added as tasks: {}", orphans.join(", "));
        }

        ValidationReport { cycles, orphans }
    }

    fn frame<'a>(&'a self, id: &'a str) -> Frame<'a> {
        let deps = self
            .nodes
            .get(id)
            .map(|n| n.dependencies.iter().map(String::as_str).collect())
            .unwrap_or_default();
        Frame { id, deps, next: 0 }
    }

    /// Kahn's algorithm: every dependency precedes its dependents.
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        let mut in_degree: HashMap<&str, usize> = self
            .nodes
            .iter()
            .map(|(id, n)| (id.as_str(), n.dependencies.len()))
            .collect();

        let mut queue: VecDeque<&str> = self
            .order
            .iter()
            .map(String::as_str)
            .filter(|id| in_degree.get(id) == Some(&0))
            .collect();

        let mut sorted = Vec::with_capacity(self.nodes.len());
        while let Some(id) = queue.pop_front() {
            sorted.push(id.to_string());
            let Some(node) = self.nodes.get(id) else { continue };
            for dependent in &node.dependents {
                if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dependent.as_str());
                    }
                }
            }
        }

        if sorted.len() != self.nodes.len() {
            let cycle = self.validate_acyclic().cycles.into_iter().next().unwrap_or_else(|| {
                let done: HashSet<&String> = sorted.iter().collect();
                self.order.iter().filter(|id| !done.contains(id)).cloned().collect()
            });
            return Err(DrainError::CycleDetected(cycle));
        }

        Ok(sorted)
    }

    /// Pending tasks whose dependencies are all in `completed`, in the order
    /// they were first observed. Placeholders are never ready.
    pub fn ready_tasks(&self, completed: &HashSet<String>) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| {
                self.nodes.get(id.as_str()).is_some_and(|n| {
                    n.status == TaskStatus::Pending
                        && !n.placeholder
                        && n.dependencies.iter().all(|d| completed.contains(d))
                })
            })
            .cloned()
            .collect()
    }

    /// Highest priority first, ties keep input order, at most `max_parallel`.
    pub fn parallel_candidates(&self, ready: &[String], max_parallel: usize) -> Vec<String> {
        let mut candidates = ready.to_vec();
        candidates.sort_by_key(|id| Reverse(self.tasks.get(id).map(|t| t.priority).unwrap_or(0)));
        candidates.truncate(max_parallel);
        candidates
    }

    fn transition(&mut self, id: &str, from: &[TaskStatus], to: TaskStatus) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| DrainError::TaskNotFound(id.to_string()))?;

        if !from.contains(&node.status) {
            return Err(DrainError::InvalidTransition {
                task_id: id.to_string(),
                from: node.status.to_string(),
                to: to.to_string(),
            });
        }

        debug!("Task {}: {} -> {}", id, node.status, to);
        node.status = to;
        Ok(())
    }

    pub fn mark_executing(&mut self, id: &str) -> Result<()> {
        self.transition(id, &[TaskStatus::Pending], TaskStatus::Executing)
    }

    pub fn mark_completed(&mut self, id: &str) -> Result<()> {
        self.transition(id, &[TaskStatus::Executing], TaskStatus::Completed)
    }

    pub fn mark_failed(&mut self, id: &str) -> Result<()> {
        self.transition(id, &[TaskStatus::Executing], TaskStatus::Failed)
    }

    /// Apply a checkpointed outcome to a pending node when resuming a run.
    pub fn restore_status(&mut self, id: &str, status: TaskStatus) -> Result<()> {
        match status {
            TaskStatus::Completed | TaskStatus::Failed => self.transition(id, &[TaskStatus::Pending], status),
            other => Err(DrainError::InvalidTransition {
                task_id: id.to_string(),
                from: TaskStatus::Pending.to_string(),
                to: other.to_string(),
            }),
        }
    }

    /// Block every still-pending descendant of the failed tasks. Completed,
    /// failed and executing nodes are left alone. Returns newly blocked ids.
    pub fn mark_blocked_tasks<I, S>(&mut self, failed: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut queue: VecDeque<String> = VecDeque::new();
        for id in failed {
            if let Some(node) = self.nodes.get(id.as_ref()) {
                queue.extend(node.dependents.iter().cloned());
            }
        }

        let mut visited: HashSet<String> = HashSet::new();
        let mut blocked = Vec::new();

        while let Some(id) = queue.pop_front() {
            if !visited.insert(id.clone()) {
                continue;
            }
            let Some(node) = self.nodes.get_mut(&id) else { continue };
            match node.status {
                TaskStatus::Pending => {
                    node.status = TaskStatus::Blocked;
                    blocked.push(id.clone());
                }
                TaskStatus::Blocked => {}
                _ => continue,
            }
            queue.extend(node.dependents.iter().cloned());
        }

        if !blocked.is_empty() {
            debug!("Blocked {} task(s): {}", blocked.len(), blocked.join(", "));
        }
        blocked
    }

    /// No node is pending or executing.
    pub fn is_complete(&self) -> bool {
        !self
            .nodes
            .values()
            .any(|n| matches!(n.status, TaskStatus::Pending | TaskStatus::Executing))
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for node in self.nodes.values().filter(|n| !n.placeholder) {
            match node.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Executing => counts.executing += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Blocked => counts.blocked += 1,
            }
        }
        counts
    }

    pub fn node(&self, id: &str) -> Option<&TaskNode> {
        self.nodes.get(id)
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn status(&self, id: &str) -> Option<TaskStatus> {
        self.nodes.get(id).map(|n| n.status)
    }

    /// All node ids, in first-observed order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
