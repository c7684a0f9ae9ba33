//! Task dependency graph.
//!
//! This module provides:
//! - **TaskGraph**: Sole owner of per-task node state for a run, with the
//!   `pending -> executing -> {completed | failed}` / `pending -> blocked`
//!   state machine.
//! - **Validation**: Iterative cycle detection and orphan reporting.
//! - **Scheduling queries**: Topological order, ready set, priority batching
//!   and transitive blocking.

mod node;
mod task_graph;

pub use node::TaskNode;
pub use task_graph::{StatusCounts, TaskGraph, ValidationReport};
