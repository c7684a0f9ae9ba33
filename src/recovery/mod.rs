//! Crash recovery and graceful shutdown.
//!
//! This module provides:
//! - **Run lock**: Single-instance mutual exclusion via a lock file
//! - **Interruption detection**: A lock left behind means the last run crashed
//! - **Recovery**: Load the checkpoint named in the stale lock, or the newest one
//! - **Shutdown**: Signal and panic handlers that checkpoint, unlock and exit

mod controller;
mod lock;

pub use controller::{EXIT_PANIC, EXIT_SIGINT, EXIT_SIGTERM, RecoveryController, ShutdownFn};
pub use lock::{LOCK_FILE_NAME, LockFile, LockRecord};
