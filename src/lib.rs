//! drainq - Drain a dependency-ordered task backlog under API rate limits
//!
//! Tasks are scheduled in priority-ordered batches as their dependencies
//! complete, admitted through per-minute request and token budgets, retried
//! with backoff, and checkpointed after every batch so an interrupted run can
//! pick up where it stopped.

pub mod checkpoint;
pub mod collab;
pub mod domain;
pub mod error;
pub mod graph;
pub mod id;
pub mod orchestrator;
pub mod ratelimit;
pub mod recovery;

pub use error::{DrainError, Result};
