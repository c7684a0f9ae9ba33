//! End-to-end drain scenarios
//!
//! Drives the orchestrator with scripted executors, a virtual clock and a
//! temporary state directory.

use async_trait::async_trait;
use drainq::checkpoint::CheckpointStore;
use drainq::collab::{DryRunExecutor, ExecutionContext, FileTaskSource, StatusSink, TaskExecutor, TaskSource};
use drainq::domain::{ErrorCode, ExecutionResult, Task, TaskError, TaskStatus, TokenEstimate, TokenUsage};
use drainq::error::Result;
use drainq::orchestrator::{Orchestrator, OrchestratorConfig};
use drainq::ratelimit::{ManualClock, RateLimitConfig, RateLimitManager};
use drainq::recovery::RecoveryController;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Succeeds unless the task id is listed as failing or hanging
#[derive(Default)]
struct TestExecutor {
    failing: HashSet<String>,
    hanging: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl TestExecutor {
    fn failing(ids: &[&str]) -> Self {
        Self {
            failing: ids.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn hanging(ids: &[&str]) -> Self {
        Self {
            hanging: ids.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskExecutor for TestExecutor {
    async fn execute_task(&self, task: &Task, _context: &ExecutionContext) -> Result<ExecutionResult> {
        self.calls.lock().unwrap().push(task.id.clone());
        if self.hanging.contains(&task.id) {
            std::future::pending::<()>().await;
        }
        if self.failing.contains(&task.id) {
            return Ok(ExecutionResult::failure(
                &task.id,
                TaskError::new(ErrorCode::Overloaded, "provider overloaded"),
            ));
        }
        Ok(ExecutionResult::success(&task.id, "done", TokenUsage::new(50, 5)))
    }
}

#[derive(Default)]
struct RecordingSink {
    statuses: Mutex<Vec<(String, TaskStatus)>>,
    comments: Mutex<Vec<String>>,
}

#[async_trait]
impl StatusSink for RecordingSink {
    async fn update_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        self.statuses.lock().unwrap().push((task_id.to_string(), status));
        Ok(())
    }

    async fn add_comment(&self, task_id: &str, _comment: &str) -> Result<()> {
        self.comments.lock().unwrap().push(task_id.to_string());
        Ok(())
    }
}

fn limiter(config: RateLimitConfig) -> (Arc<RateLimitManager>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    (Arc::new(RateLimitManager::new(&config, clock.clone())), clock)
}

fn generous() -> RateLimitConfig {
    RateLimitConfig::new(1_000, 10_000_000, 10_000_000)
}

fn chain() -> Vec<Task> {
    vec![
        Task::new("A", "first"),
        Task::new("B", "second").with_dependency("A"),
        Task::new("C", "third").with_dependency("B"),
    ]
}

/// Scenario: three independent tasks, two slots, highest priority first
#[tokio::test]
async fn test_priority_batching() -> Result<()> {
    let temp = TempDir::new()?;
    let store = Arc::new(CheckpointStore::new(temp.path())?);
    let (rate_limiter, _) = limiter(generous());
    let executor = Arc::new(TestExecutor::default());
    let tasks = vec![
        Task::new("T1", "low").with_priority(1),
        Task::new("T2", "high").with_priority(5),
        Task::new("T3", "mid").with_priority(3),
    ];

    let mut orchestrator = Orchestrator::new(
        tasks,
        executor.clone(),
        Arc::new(RecordingSink::default()),
        rate_limiter,
        store,
    )?
    .with_config(OrchestratorConfig::default().with_max_parallel(2));

    let summary = orchestrator.run().await?;
    assert_eq!(summary.batches, 2);
    assert_eq!(summary.completed, 3);

    let calls = executor.calls();
    let first: HashSet<&str> = calls[..2].iter().map(String::as_str).collect();
    assert_eq!(first, HashSet::from(["T2", "T3"]));
    assert_eq!(calls[2], "T1");
    Ok(())
}

/// Scenario: a task exhausts its retries and its descendants are blocked
#[tokio::test]
async fn test_retry_exhaustion_blocks_descendants() -> Result<()> {
    let temp = TempDir::new()?;
    let store = Arc::new(CheckpointStore::new(temp.path())?);
    let (rate_limiter, clock) = limiter(generous());
    let executor = Arc::new(TestExecutor::failing(&["A"]));
    let sink = Arc::new(RecordingSink::default());

    let mut orchestrator = Orchestrator::new(chain(), executor.clone(), sink.clone(), rate_limiter, store.clone())?;

    let summary = orchestrator.run().await?;
    assert_eq!(executor.calls(), vec!["A", "A", "A"]);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.blocked, 2);
    assert_eq!(summary.completed, 0);
    assert_eq!(clock.sleeps().len(), 2);

    let statuses = sink.statuses.lock().unwrap().clone();
    assert!(statuses.contains(&("A".to_string(), TaskStatus::Failed)));
    assert!(statuses.contains(&("B".to_string(), TaskStatus::Blocked)));
    assert!(statuses.contains(&("C".to_string(), TaskStatus::Blocked)));

    let saved = store.load_checkpoint(&summary.checkpoint_id).unwrap();
    assert!(saved.failed["A"].starts_with("OVERLOADED"));
    Ok(())
}

/// Scenario: the process dies mid-batch; a new process recovers from the
/// checkpoint named in the stale lock and only runs the unfinished task
#[tokio::test]
async fn test_restart_recovery() -> Result<()> {
    let temp = TempDir::new()?;
    let checkpoint_dir = temp.path().join("checkpoints");

    let crashed_id = {
        let store = Arc::new(CheckpointStore::new(&checkpoint_dir)?);
        let recovery = Arc::new(RecoveryController::new(temp.path(), store.clone())?);
        assert!(recovery.acquire_lock(None)?);

        let (rate_limiter, _) = limiter(generous());
        let executor = Arc::new(TestExecutor::hanging(&["C"]));
        let mut orchestrator = Orchestrator::new(
            chain(),
            executor,
            Arc::new(RecordingSink::default()),
            rate_limiter,
            store.clone(),
        )?
        .with_recovery(recovery);

        // Dropping the run future mid-batch stands in for a killed process
        let run = tokio::time::timeout(Duration::from_millis(200), orchestrator.run()).await;
        assert!(run.is_err());
        store.current_id().unwrap()
    };

    let store = Arc::new(CheckpointStore::new(&checkpoint_dir)?);
    let recovery = Arc::new(RecoveryController::new(temp.path(), store.clone())?);
    assert!(recovery.was_interrupted());
    assert_eq!(recovery.read_lock()?.unwrap().checkpoint_id.as_deref(), Some(crashed_id.as_str()));

    let state = recovery.recover()?.unwrap();
    assert_eq!(state.checkpoint_id, crashed_id);
    assert!(state.is_completed("A"));
    assert!(state.is_completed("B"));
    assert!(!state.is_completed("C"));
    assert!(!recovery.was_interrupted());

    assert!(recovery.acquire_lock(Some(&state.checkpoint_id))?);
    let (rate_limiter, _) = limiter(generous());
    let executor = Arc::new(TestExecutor::default());
    let mut orchestrator = Orchestrator::new(
        chain(),
        executor.clone(),
        Arc::new(RecordingSink::default()),
        rate_limiter,
        store.clone(),
    )?
    .with_recovery(recovery.clone());
    orchestrator.resume_from(state)?;

    let summary = orchestrator.run().await?;
    recovery.release_lock()?;

    assert_eq!(executor.calls(), vec!["C"]);
    assert!(summary.is_success());
    assert_eq!(summary.checkpoint_id, crashed_id);
    assert_eq!(summary.total_tokens_used, 165);
    assert_eq!(store.list_checkpoints()?.len(), 1);
    Ok(())
}

/// Scenario: one request per minute makes the second task wait exactly 60s
#[tokio::test]
async fn test_permit_wait_is_exact() -> Result<()> {
    let temp = TempDir::new()?;
    let store = Arc::new(CheckpointStore::new(temp.path())?);
    let (rate_limiter, clock) = limiter(RateLimitConfig::new(1, 1_000_000, 1_000_000));
    let executor = Arc::new(TestExecutor::default());
    let tasks = vec![
        Task::new("X", "x").with_estimate(100, 10),
        Task::new("Y", "y").with_estimate(100, 10),
    ];

    let mut orchestrator = Orchestrator::new(
        tasks,
        executor.clone(),
        Arc::new(RecordingSink::default()),
        rate_limiter,
        store,
    )?
    .with_config(OrchestratorConfig::default().with_max_parallel(1));

    let summary = orchestrator.run().await?;
    assert_eq!(summary.completed, 2);
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(60)]);
    Ok(())
}

/// A dry run over a task file drains everything and reports estimates
#[tokio::test]
async fn test_dry_run_from_task_file() -> Result<()> {
    let temp = TempDir::new()?;
    let task_file = temp.path().join("backlog.yml");
    std::fs::write(
        &task_file,
        "- id: ENG-1\n  title: schema\n  estimatedTokens: {input: 200, output: 20}\n\
         - id: ENG-2\n  title: api\n  dependencies: [ENG-1]\n",
    )?;

    let tasks = FileTaskSource::new(&task_file).fetch_tasks(None).await?;
    let store = Arc::new(CheckpointStore::new(temp.path().join("checkpoints"))?);
    let (rate_limiter, _) = limiter(generous());
    let default_estimate = TokenEstimate { input: 30, output: 3 };
    let sink = Arc::new(RecordingSink::default());

    let mut orchestrator = Orchestrator::new(
        tasks,
        Arc::new(DryRunExecutor::new(default_estimate)),
        sink.clone(),
        rate_limiter.clone(),
        store,
    )?;

    let summary = orchestrator.run().await?;
    assert!(summary.is_success());
    assert_eq!(summary.total_tokens_used, 220 + 33);
    assert_eq!(rate_limiter.usage_totals().requests, 2);
    assert_eq!(sink.comments.lock().unwrap().clone(), vec!["ENG-1", "ENG-2"]);
    Ok(())
}
