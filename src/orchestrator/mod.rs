//! Run orchestration.
//!
//! This module provides:
//! - **Orchestrator**: The batch loop tying graph, rate limiter, executor and
//!   checkpoint store together
//! - **OrchestratorConfig**: Parallelism, retry and context settings
//! - **RunSummary**: Final counts and usage for a run

mod runner;
mod summary;

pub use runner::{Orchestrator, OrchestratorConfig};
pub use summary::RunSummary;
