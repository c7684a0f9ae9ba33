//! Batch scheduler - drains the task graph one batch at a time.
//!
//! Each batch:
//! 1. Selects ready tasks, highest priority first, up to `max_parallel`
//! 2. Runs them concurrently, each with its own admission + retry loop
//! 3. Waits for every result (join barrier)
//! 4. Reconciles results into the graph and execution state
//! 5. Saves a checkpoint and points the run lock at it
//!
//! The next batch is never selected before the previous one is checkpointed.

use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{Duration, Instant};

use super::summary::RunSummary;
use crate::checkpoint::CheckpointStore;
use crate::collab::{CompletedContext, ExecutionContext, StatusSink, TaskExecutor};
use crate::domain::{ErrorCode, ExecutionResult, ExecutionState, Task, TaskError, TaskStatus, TokenEstimate, TokenUsage};
use crate::error::{DrainError, Result};
use crate::graph::TaskGraph;
use crate::ratelimit::RateLimitManager;
use crate::recovery::{RecoveryController, ShutdownFn};

/// Attempts made by a shutdown callback to take the state lock.
const SHUTDOWN_LOCK_ATTEMPTS: u32 = 50;
const SHUTDOWN_LOCK_PAUSE: Duration = Duration::from_millis(10);

/// Scheduling configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Upper bound on tasks per batch
    pub max_parallel: usize,
    /// Recent completions passed to the executor
    pub context_window: usize,
    /// Used for admission when a task carries no estimate
    pub default_estimate: TokenEstimate,
    /// Give previously failed tasks another chance when resuming
    pub retry_failed_on_resume: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parallel: 3,
            context_window: 5,
            default_estimate: TokenEstimate {
                input: 4_000,
                output: 1_000,
            },
            retry_failed_on_resume: false,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    pub fn with_context_window(mut self, context_window: usize) -> Self {
        self.context_window = context_window;
        self
    }

    pub fn with_default_estimate(mut self, input: u64, output: u64) -> Self {
        self.default_estimate = TokenEstimate { input, output };
        self
    }

    pub fn with_retry_failed_on_resume(mut self, retry: bool) -> Self {
        self.retry_failed_on_resume = retry;
        self
    }
}

/// Final result of one task's retry loop.
#[derive(Debug)]
struct TaskOutcome {
    result: ExecutionResult,
    attempts: u32,
    /// Summed over every attempt
    tokens: TokenUsage,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    graph: TaskGraph,
    executor: Arc<dyn TaskExecutor>,
    sink: Arc<dyn StatusSink>,
    rate_limiter: Arc<RateLimitManager>,
    store: Arc<CheckpointStore>,
    recovery: Option<Arc<RecoveryController>>,
    /// Shared with the shutdown callback
    state: Arc<Mutex<ExecutionState>>,
    recent: VecDeque<CompletedContext>,
    batches: usize,
}

impl Orchestrator {
    /// Build the graph and a fresh execution state. Fails if the
    /// dependencies contain a cycle.
    pub fn new(
        tasks: Vec<Task>,
        executor: Arc<dyn TaskExecutor>,
        sink: Arc<dyn StatusSink>,
        rate_limiter: Arc<RateLimitManager>,
        store: Arc<CheckpointStore>,
    ) -> Result<Self> {
        let graph = TaskGraph::from_tasks(tasks);
        let report = graph.validate_acyclic();
        if let Some(cycle) = report.cycles.into_iter().next() {
            return Err(DrainError::CycleDetected(cycle));
        }
        if !report.orphans.is_empty() {
            warn!(
                "{} dependency id(s) never defined, dependents will not run: {}",
                report.orphans.len(),
                report.orphans.join(", ")
            );
        }

        let state = store.create_initial_state();
        info!("Loaded {} tasks into the graph", graph.counts().total());

        Ok(Self {
            config: OrchestratorConfig::default(),
            graph,
            executor,
            sink,
            rate_limiter,
            store,
            recovery: None,
            state: Arc::new(Mutex::new(state)),
            recent: VecDeque::new(),
            batches: 0,
        })
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Keep the run lock pointed at the latest checkpoint.
    pub fn with_recovery(mut self, recovery: Arc<RecoveryController>) -> Self {
        self.recovery = Some(recovery);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    fn state(&self) -> MutexGuard<'_, ExecutionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current execution state.
    pub fn snapshot(&self) -> ExecutionState {
        self.state().clone()
    }

    /// Continue a previous run from its checkpointed state.
    ///
    /// Completed and failed tasks keep their outcome, dependents of failed
    /// tasks are blocked again, and anything that was in flight goes back to
    /// pending. Saves continue under the recovered checkpoint id.
    pub fn resume_from(&mut self, mut state: ExecutionState) -> Result<()> {
        state.clear_in_progress();
        if self.config.retry_failed_on_resume {
            let cleared = state.clear_failed();
            if !cleared.is_empty() {
                info!("Retrying {} previously failed task(s): {}", cleared.len(), cleared.join(", "));
            }
        }

        let mut completed: Vec<&String> = state.completed.iter().collect();
        completed.sort();
        for id in completed {
            self.restore(id, TaskStatus::Completed)?;
            if let Some(task) = self.graph.task(id) {
                let context = CompletedContext {
                    task_id: id.clone(),
                    title: task.title.clone(),
                    summary: "Completed in a previous run.".to_string(),
                };
                push_recent(&mut self.recent, context, self.config.context_window);
            }
        }

        let mut failed: Vec<&String> = state.failed.keys().collect();
        failed.sort();
        for id in &failed {
            self.restore(id, TaskStatus::Failed)?;
        }
        let blocked = self.graph.mark_blocked_tasks(failed);

        info!(
            "Resuming checkpoint {}: {} completed, {} failed, {} blocked",
            state.checkpoint_id,
            state.completed.len(),
            state.failed.len(),
            blocked.len()
        );

        self.store.adopt(state.checkpoint_id.clone());
        *self.state() = state;
        Ok(())
    }

    fn restore(&mut self, id: &str, status: TaskStatus) -> Result<()> {
        match self.graph.restore_status(id, status) {
            Ok(()) => Ok(()),
            Err(DrainError::TaskNotFound(_)) => {
                warn!("Checkpointed task {} is no longer in the task list", id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Callback that checkpoints the current state; handed to the signal and
    /// panic handlers.
    pub fn shutdown_hook(&self) -> ShutdownFn {
        let state = Arc::clone(&self.state);
        let store = Arc::clone(&self.store);
        Arc::new(move || {
            let mut snapshot = lock_for_shutdown(&state)?;
            snapshot.touch();
            let id = store.save_checkpoint(&snapshot)?;
            info!("Saved checkpoint {} before exit", id);
            Ok(())
        })
    }

    /// Drain the graph. Per-task failures are recorded, not returned; only
    /// checkpoint and lock errors abort the run.
    pub async fn run(&mut self) -> Result<RunSummary> {
        let max_parallel = self.config.max_parallel.max(1);
        info!(
            "Starting run with max_parallel={} max_retries={}",
            max_parallel,
            self.rate_limiter.max_retries()
        );

        self.checkpoint()?;

        while !self.graph.is_complete() {
            let ready = {
                let state = self.state();
                self.graph.ready_tasks(&state.completed)
            };
            if ready.is_empty() {
                let counts = self.graph.counts();
                if counts.pending > 0 {
                    warn!("{} task(s) pending with unmet dependencies, stopping", counts.pending);
                }
                break;
            }

            let batch = self.graph.parallel_candidates(&ready, max_parallel);
            self.run_batch(&batch).await?;
        }

        Ok(self.summary())
    }

    async fn run_batch(&mut self, batch: &[String]) -> Result<()> {
        self.batches += 1;
        info!("Batch {}: {}", self.batches, batch.join(", "));
        let started = Instant::now();

        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            for id in batch {
                self.graph.mark_executing(id)?;
                state.mark_in_progress(id);
            }
        }
        for id in batch {
            self.notify_status(id, TaskStatus::Executing).await;
        }

        let tasks: Vec<Task> = batch.iter().filter_map(|id| self.graph.task(id).cloned()).collect();
        let context = ExecutionContext::new(self.recent.iter().cloned().collect());
        let outcomes: Vec<TaskOutcome> = stream::iter(tasks.iter().map(|task| self.execute_with_retry(task, &context)))
            .buffer_unordered(tasks.len().max(1))
            .collect()
            .await;

        for outcome in outcomes {
            self.reconcile(outcome).await?;
        }

        {
            let mut state = self.state();
            state.clear_in_progress();
            state.add_execution_time(started.elapsed().as_millis() as u64);
        }
        self.checkpoint()?;
        Ok(())
    }

    /// Admission plus retry loop for one task.
    async fn execute_with_retry(&self, task: &Task, context: &ExecutionContext) -> TaskOutcome {
        let estimate = task.estimated_tokens.unwrap_or(self.config.default_estimate);
        let max_attempts = self.rate_limiter.max_retries().max(1);
        let mut tokens = TokenUsage::default();
        let mut attempt = 0;

        loop {
            attempt += 1;

            if let Err(e) = self.rate_limiter.acquire_permit(estimate.input, estimate.output).await {
                warn!("Task {} cannot be admitted: {}", task.id, e);
                let result = ExecutionResult::failure(&task.id, TaskError::new(ErrorCode::ClientError, e.to_string()));
                return TaskOutcome {
                    result,
                    attempts: attempt,
                    tokens,
                };
            }

            let attempt_context = context.clone().with_attempt(attempt);
            let started = Instant::now();
            let mut result = match self.executor.execute_task(task, &attempt_context).await {
                Ok(result) => {
                    self.rate_limiter.record_usage(result.tokens_used);
                    tokens.add(result.tokens_used);
                    result
                }
                Err(e) => ExecutionResult::failure(&task.id, TaskError::new(ErrorCode::ExecutionError, e.to_string()))
                    .with_duration(started.elapsed().as_millis() as u64),
            };
            result.task_id = task.id.clone();

            if result.success {
                self.rate_limiter.record_success();
                debug!("Task {} succeeded on attempt {}", task.id, attempt);
                return TaskOutcome {
                    result,
                    attempts: attempt,
                    tokens,
                };
            }

            if result.is_retryable() && attempt < max_attempts {
                warn!(
                    "Task {} attempt {}/{} failed: {}",
                    task.id,
                    attempt,
                    max_attempts,
                    result.error_message()
                );
                let retry_after = result.error.as_ref().and_then(|e| e.retry_after());
                self.rate_limiter.handle_rate_limit_error(retry_after).await;
                continue;
            }

            return TaskOutcome {
                result,
                attempts: attempt,
                tokens,
            };
        }
    }

    async fn reconcile(&mut self, outcome: TaskOutcome) -> Result<()> {
        let TaskOutcome {
            result,
            attempts,
            tokens,
        } = outcome;
        let id = result.task_id.clone();

        if result.success {
            {
                let mut state = self.state();
                state.mark_completed(&id);
                state.add_tokens(tokens.total());
            }
            self.graph.mark_completed(&id)?;
            info!("Task {} completed after {} attempt(s)", id, attempts);

            let title = self.graph.task(&id).map(|t| t.title.clone()).unwrap_or_default();
            let summary = result.summary();
            push_recent(
                &mut self.recent,
                CompletedContext {
                    task_id: id.clone(),
                    title,
                    summary: summary.clone(),
                },
                self.config.context_window,
            );

            self.notify_status(&id, TaskStatus::Completed).await;
            self.notify_comment(&id, &summary).await;
            return Ok(());
        }

        let error = result.error_message();
        {
            let mut state = self.state();
            state.mark_failed(&id, error.clone());
            state.add_tokens(tokens.total());
        }
        self.graph.mark_failed(&id)?;
        let blocked = self.graph.mark_blocked_tasks([id.as_str()]);
        warn!("Task {} failed after {} attempt(s): {}", id, attempts, error);

        self.notify_status(&id, TaskStatus::Failed).await;
        self.notify_comment(&id, &result.summary()).await;
        for blocked_id in &blocked {
            self.notify_status(blocked_id, TaskStatus::Blocked).await;
        }
        Ok(())
    }

    /// Persist the state and record its id in the run lock.
    fn checkpoint(&self) -> Result<String> {
        let snapshot = {
            let mut state = self.state();
            state.touch();
            state.clone()
        };
        let id = self.store.save_checkpoint(&snapshot)?;
        if let Some(recovery) = &self.recovery {
            recovery.update_lock_checkpoint(&id)?;
        }
        Ok(id)
    }

    async fn notify_status(&self, task_id: &str, status: TaskStatus) {
        if let Err(e) = self.sink.update_status(task_id, status).await {
            warn!("Status update for {} failed: {}", task_id, e);
        }
    }

    async fn notify_comment(&self, task_id: &str, comment: &str) {
        if let Err(e) = self.sink.add_comment(task_id, comment).await {
            warn!("Comment on {} failed: {}", task_id, e);
        }
    }

    fn summary(&self) -> RunSummary {
        let state = self.state();
        let mut summary = RunSummary::new(state.checkpoint_id.clone(), self.graph.counts(), self.batches);
        summary.total_tokens_used = state.total_tokens_used;
        summary.execution_time_ms = state.execution_time_ms;
        summary.usage = self.rate_limiter.usage_totals();
        summary.failures = state.failed.iter().map(|(id, e)| (id.clone(), e.clone())).collect();
        summary.failures.sort();
        summary
    }
}

fn push_recent(recent: &mut VecDeque<CompletedContext>, context: CompletedContext, window: usize) {
    if window == 0 {
        return;
    }
    recent.push_back(context);
    while recent.len() > window {
        recent.pop_front();
    }
}

/// Clone the state for a shutdown save. The panic hook can run on a thread
/// that already holds the lock, so this never blocks indefinitely.
fn lock_for_shutdown(state: &Mutex<ExecutionState>) -> Result<ExecutionState> {
    for _ in 0..SHUTDOWN_LOCK_ATTEMPTS {
        match state.try_lock() {
            Ok(guard) => return Ok(guard.clone()),
            Err(TryLockError::Poisoned(poisoned)) => return Ok(poisoned.into_inner().clone()),
            Err(TryLockError::WouldBlock) => std::thread::sleep(SHUTDOWN_LOCK_PAUSE),
        }
    }
    Err(DrainError::Checkpoint("execution state is locked, keeping last batch checkpoint".to_string()))
}
