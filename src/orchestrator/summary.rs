//! End-of-run summary.

use std::fmt;

use crate::graph::StatusCounts;
use crate::ratelimit::UsageTotals;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub checkpoint_id: String,
    pub completed: usize,
    pub failed: usize,
    pub blocked: usize,
    /// Never dispatched (includes anything left executing)
    pub pending: usize,
    pub batches: usize,
    /// Cumulative across resumed runs
    pub total_tokens_used: u64,
    /// Cumulative across resumed runs
    pub execution_time_ms: u64,
    /// Calls made by this process
    pub usage: UsageTotals,
    /// (task id, error), sorted by id
    pub failures: Vec<(String, String)>,
}

impl RunSummary {
    pub(super) fn new(checkpoint_id: String, counts: StatusCounts, batches: usize) -> Self {
        Self {
            checkpoint_id,
            completed: counts.completed,
            failed: counts.failed,
            blocked: counts.blocked,
            pending: counts.pending + counts.executing,
            batches,
            total_tokens_used: 0,
            execution_time_ms: 0,
            usage: UsageTotals::default(),
            failures: Vec::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.completed + self.failed + self.blocked + self.pending
    }

    /// Every task completed
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.blocked == 0 && self.pending == 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {} ({} batches)", self.checkpoint_id, self.batches)?;
        writeln!(
            f,
            "  completed: {}  failed: {}  blocked: {}  pending: {}  (total {})",
            self.completed,
            self.failed,
            self.blocked,
            self.pending,
            self.total()
        )?;
        writeln!(
            f,
            "  tokens: {} total, this run {} in / {} out over {} requests",
            self.total_tokens_used, self.usage.input_tokens, self.usage.output_tokens, self.usage.requests
        )?;
        write!(f, "  execution time: {}ms", self.execution_time_ms)?;
        for (task_id, error) in &self.failures {
            write!(f, "\n  failed {}: {}", task_id, error)?;
        }
        Ok(())
    }
}
