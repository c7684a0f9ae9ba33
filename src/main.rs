use clap::Parser;
use colored::*;
use eyre::{Context, Result, bail};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

mod cli;
mod config;

use cli::Cli;
use cli::commands::Commands;
use config::Config;
use drainq::checkpoint::CheckpointStore;
use drainq::collab::{CommandExecutor, DryRunExecutor, FileTaskSource, LogSink, TaskExecutor, TaskSource};
use drainq::domain::{ExecutionState, Task};
use drainq::orchestrator::{Orchestrator, RunSummary};
use drainq::ratelimit::{RateLimitManager, SystemClock};
use drainq::recovery::RecoveryController;

fn setup_logging(config: &Config, verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("drainq")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("drainq.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let default_level = if verbose {
        "debug"
    } else {
        config.log_level.as_deref().unwrap_or("info")
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Options for `drainq run`
struct RunOptions {
    tasks: PathBuf,
    status: Option<String>,
    resume: bool,
    fresh: bool,
    exec: Option<String>,
    dry_run: bool,
}

async fn run_application(cli: Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match cli.command {
        None => {
            println!("{}", "No command given, see --help".yellow());
            Ok(())
        }
        Some(Commands::Run {
            tasks,
            status,
            resume,
            fresh,
            exec,
            dry_run,
        }) => {
            let options = RunOptions {
                tasks,
                status,
                resume,
                fresh,
                exec,
                dry_run,
            };
            handle_run_command(options, config).await
        }
        Some(Commands::Status) => handle_status_command(config),
        Some(Commands::Checkpoints) => handle_checkpoints_command(config),
        Some(Commands::Cleanup { keep }) => handle_cleanup_command(keep, config),
        Some(Commands::ClearLock) => handle_clear_lock_command(config),
    }
}

fn open_state(config: &Config) -> Result<(Arc<CheckpointStore>, Arc<RecoveryController>)> {
    let store = Arc::new(
        CheckpointStore::new(config.storage.checkpoint_dir()).context("Failed to open checkpoint directory")?,
    );
    let recovery = Arc::new(
        RecoveryController::new(&config.storage.state_dir, Arc::clone(&store))
            .context("Failed to open state directory")?,
    );
    Ok((store, recovery))
}

fn build_executor(options: &RunOptions, config: &Config) -> Result<Arc<dyn TaskExecutor>> {
    if options.dry_run {
        return Ok(Arc::new(DryRunExecutor::new(config.orchestrator.default_estimate)));
    }

    let Some(command) = options.exec.clone().or_else(|| config.executor.command.clone()) else {
        bail!("No executor configured: pass --exec, set executor.command, or use --dry-run");
    };
    let mut executor = CommandExecutor::new(command);
    if let Some(dir) = &config.executor.working_dir {
        executor = executor.with_working_dir(dir);
    }
    Ok(Arc::new(executor))
}

/// Decide what state to start from, clearing or recovering a stale lock.
fn resolve_start_state(
    options: &RunOptions,
    store: &CheckpointStore,
    recovery: &RecoveryController,
) -> Result<Option<ExecutionState>> {
    if recovery.was_interrupted() {
        if options.fresh {
            recovery.force_clear_lock()?;
            println!("{}", "Cleared lock left by an interrupted run, starting fresh".yellow());
            return Ok(None);
        }
        if options.resume {
            println!("{}", "Previous run was interrupted, recovering".yellow());
            return Ok(recovery.recover()?);
        }

        let holder = match recovery.read_lock() {
            Ok(Some(lock)) => format!(" (pid {}, started {})", lock.pid, lock.start_time),
            _ => String::new(),
        };
        bail!(
            "Run lock {} exists{}. Another run is active or the last one was interrupted; \
             use --resume to continue it or --fresh to start over",
            recovery.lock_path().display(),
            holder
        );
    }

    if options.resume {
        let latest = store.load_latest_checkpoint()?;
        if latest.is_none() {
            println!("{}", "No checkpoint found, starting fresh".yellow());
        }
        return Ok(latest);
    }
    Ok(None)
}

async fn handle_run_command(options: RunOptions, config: &Config) -> Result<()> {
    info!("Running tasks from {}", options.tasks.display());
    let executor = build_executor(&options, config)?;
    let source = FileTaskSource::new(&options.tasks);
    let tasks = source
        .fetch_tasks(options.status.as_deref())
        .await
        .context("Failed to load tasks")?;

    let (store, recovery) = open_state(config)?;
    let start_state = resolve_start_state(&options, &store, &recovery)?;

    if !recovery.acquire_lock(start_state.as_ref().map(|s| s.checkpoint_id.as_str()))? {
        bail!("Run lock {} was taken by another process", recovery.lock_path().display());
    }

    let outcome = drain(tasks, executor, start_state, config, &store, &recovery).await;
    recovery.release_lock()?;
    let summary = outcome?;

    print_summary(&summary);
    let removed = store.cleanup_old_checkpoints(config.storage.keep_checkpoints)?;
    if removed > 0 {
        info!("Removed {} old checkpoint(s)", removed);
    }
    Ok(())
}

async fn drain(
    tasks: Vec<Task>,
    executor: Arc<dyn TaskExecutor>,
    start_state: Option<ExecutionState>,
    config: &Config,
    store: &Arc<CheckpointStore>,
    recovery: &Arc<RecoveryController>,
) -> Result<RunSummary> {
    let rate_limiter = Arc::new(RateLimitManager::new(&config.rate_limit, Arc::new(SystemClock::new())));
    let mut orchestrator = Orchestrator::new(tasks, executor, Arc::new(LogSink::new()), rate_limiter, Arc::clone(store))
        .context("Invalid task graph")?
        .with_config(config.orchestrator.clone())
        .with_recovery(Arc::clone(recovery));

    if let Some(state) = start_state {
        orchestrator.resume_from(state).context("Failed to resume from checkpoint")?;
    }

    recovery.setup_signal_handlers(orchestrator.shutdown_hook());
    Ok(orchestrator.run().await?)
}

fn print_summary(summary: &RunSummary) {
    let headline = if summary.is_success() {
        "All tasks completed".green()
    } else {
        "Run finished with unfinished tasks".yellow()
    };
    println!("{}", headline.bold());
    println!(
        "  {} completed, {} failed, {} blocked, {} pending",
        summary.completed.to_string().green(),
        summary.failed.to_string().red(),
        summary.blocked.to_string().yellow(),
        summary.pending
    );
    println!(
        "  {} tokens over {} requests, {}ms",
        summary.total_tokens_used, summary.usage.requests, summary.execution_time_ms
    );
    for (task_id, error) in &summary.failures {
        println!("  {} {}: {}", "failed".red(), task_id, error);
    }
    println!("  checkpoint: {}", summary.checkpoint_id.cyan());
}

fn handle_status_command(config: &Config) -> Result<()> {
    let (store, recovery) = open_state(config)?;

    match recovery.read_lock() {
        Ok(Some(lock)) => {
            println!(
                "{} pid {} since {}",
                "Locked:".yellow(),
                lock.pid,
                lock.start_time.format("%Y-%m-%d %H:%M:%S")
            );
            if let Some(id) = lock.checkpoint_id {
                println!("  last checkpoint: {}", id);
            }
        }
        Ok(None) => println!("{}", "No run in progress".green()),
        Err(e) => println!("{} {}", "Unreadable lock:".red(), e),
    }

    match store.load_latest_checkpoint()? {
        Some(state) => {
            println!("{} {}", "Latest checkpoint:".cyan(), state.checkpoint_id);
            println!(
                "  {} completed, {} failed, {} tokens, {}ms",
                state.completed.len(),
                state.failed.len(),
                state.total_tokens_used,
                state.execution_time_ms
            );
        }
        None => println!("No checkpoints in {}", store.dir().display()),
    }
    Ok(())
}

fn handle_checkpoints_command(config: &Config) -> Result<()> {
    let (store, _) = open_state(config)?;
    let records = store.list_checkpoints()?;
    if records.is_empty() {
        println!("No checkpoints in {}", store.dir().display());
        return Ok(());
    }

    for record in records {
        println!(
            "{}  {}  {} completed  {} failed  {} tokens",
            record.checkpoint_id.cyan(),
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.completed_tasks.len(),
            record.failed_tasks.len(),
            record.total_tokens_used
        );
    }
    Ok(())
}

fn handle_cleanup_command(keep: Option<usize>, config: &Config) -> Result<()> {
    let (store, _) = open_state(config)?;
    let keep = keep.unwrap_or(config.storage.keep_checkpoints);
    let removed = store.cleanup_old_checkpoints(keep)?;
    println!("{} removed {}, kept up to {}", "Cleanup:".green(), removed, keep);
    Ok(())
}

fn handle_clear_lock_command(config: &Config) -> Result<()> {
    let (_, recovery) = open_state(config)?;
    if recovery.force_clear_lock()? {
        println!("{} {}", "Removed lock".green(), recovery.lock_path().display());
    } else {
        println!("No lock at {}", recovery.lock_path().display());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging once the level is known
    setup_logging(&config, cli.is_verbose()).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(cli, &config).await.context("Application failed")?;

    Ok(())
}
