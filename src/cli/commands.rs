//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: drain a task file
//! - status: lock and latest checkpoint
//! - checkpoints: list saved checkpoints
//! - cleanup: prune old checkpoints
//! - clear-lock: remove a stale run lock

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// drainq - Drain a dependency-ordered backlog under API rate limits
#[derive(Parser, Debug)]
#[command(name = "drainq")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute every task in a task file
    Run {
        /// YAML or JSON task list
        #[arg(short, long)]
        tasks: PathBuf,

        /// Only tasks with this tracker status
        #[arg(short, long)]
        status: Option<String>,

        /// Continue from the latest checkpoint
        #[arg(long, conflicts_with = "fresh")]
        resume: bool,

        /// Ignore an interrupted run and start over
        #[arg(long)]
        fresh: bool,

        /// Shell command run once per task (overrides executor.command)
        #[arg(short, long, conflicts_with = "dry_run")]
        exec: Option<String>,

        /// Schedule without doing any work
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the run lock and latest checkpoint
    Status,

    /// List saved checkpoints, newest first
    Checkpoints,

    /// Delete all but the most recent checkpoints
    Cleanup {
        /// Number to keep (defaults to storage.keep_checkpoints)
        #[arg(short, long)]
        keep: Option<usize>,
    },

    /// Remove a run lock left behind by a crashed run
    ClearLock,
}
