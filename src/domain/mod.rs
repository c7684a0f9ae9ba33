//! Domain types for drainq
//!
//! This module contains all core domain types:
//! - Task: An immutable unit of work fetched from the task source
//! - TaskStatus: Per-task state machine position
//! - ExecutionResult: Outcome of running one task, with error taxonomy
//! - ExecutionState: The unit of durability persisted in checkpoints

pub mod result;
pub mod state;
pub mod task;

pub use result::{ErrorCode, ExecutionResult, TaskError};
pub use state::ExecutionState;
pub use task::{Task, TaskStatus, TokenEstimate, TokenUsage};
