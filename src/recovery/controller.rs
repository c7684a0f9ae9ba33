//! Recovery controller.
//!
//! Owns the run lock, decides whether the previous run was interrupted, loads
//! the state to resume from, and turns signals and panics into a
//! checkpoint-and-exit.

use log::{error, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;

use super::lock::{LockFile, LockRecord};
use crate::checkpoint::CheckpointStore;
use crate::domain::ExecutionState;
use crate::error::{DrainError, Result};

/// Callback that persists the current execution state during shutdown.
pub type ShutdownFn = Arc<dyn Fn() -> Result<()> + Send + Sync>;

pub const EXIT_PANIC: i32 = 1;
pub const EXIT_SIGINT: i32 = 130;
pub const EXIT_SIGTERM: i32 = 143;

pub struct RecoveryController {
    state_dir: PathBuf,
    lock: LockFile,
    store: Arc<CheckpointStore>,
    shutting_down: AtomicBool,
}

impl std::fmt::Debug for RecoveryController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryController")
            .field("state_dir", &self.state_dir)
            .field("lock", &self.lock.path())
            .finish()
    }
}

impl RecoveryController {
    pub fn new(state_dir: impl AsRef<Path>, store: Arc<CheckpointStore>) -> Result<Self> {
        let state_dir = state_dir.as_ref().to_path_buf();
        fs::create_dir_all(&state_dir)?;
        Ok(Self {
            lock: LockFile::in_dir(&state_dir),
            state_dir,
            store,
            shutting_down: AtomicBool::new(false),
        })
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn lock_path(&self) -> &Path {
        self.lock.path()
    }

    pub fn store(&self) -> &Arc<CheckpointStore> {
        &self.store
    }

    /// Take the run lock. Returns false if another run holds it or a crashed
    /// run left it behind.
    pub fn acquire_lock(&self, checkpoint_id: Option<&str>) -> Result<bool> {
        let acquired = self.lock.try_create(&LockRecord::current(checkpoint_id))?;
        if acquired {
            info!("Acquired run lock {}", self.lock.path().display());
        } else {
            warn!("Run lock {} already exists", self.lock.path().display());
        }
        Ok(acquired)
    }

    /// Record the latest checkpoint id in the held lock.
    pub fn update_lock_checkpoint(&self, checkpoint_id: &str) -> Result<()> {
        let mut record = self
            .lock
            .read()?
            .ok_or_else(|| DrainError::Lock("lock is not held".to_string()))?;
        if record.checkpoint_id.as_deref() == Some(checkpoint_id) {
            return Ok(());
        }
        record.checkpoint_id = Some(checkpoint_id.to_string());
        self.lock.rewrite(&record)
    }

    pub fn release_lock(&self) -> Result<()> {
        if self.lock.remove()? {
            info!("Released run lock");
        }
        Ok(())
    }

    pub fn read_lock(&self) -> Result<Option<LockRecord>> {
        self.lock.read()
    }

    /// Operator override: remove the lock whoever holds it.
    pub fn force_clear_lock(&self) -> Result<bool> {
        let removed = self.lock.remove()?;
        if removed {
            warn!("Force-cleared run lock {}", self.lock.path().display());
        }
        Ok(removed)
    }

    /// True when a lock file is present, i.e. the last run never released it.
    pub fn was_interrupted(&self) -> bool {
        self.lock.exists()
    }

    /// Load the state to resume from and release the stale lock.
    ///
    /// Prefers the checkpoint named in the lock, then the newest checkpoint.
    pub fn recover(&self) -> Result<Option<ExecutionState>> {
        let locked_id = match self.lock.read() {
            Ok(record) => record.and_then(|r| r.checkpoint_id),
            Err(e) => {
                warn!("Ignoring unreadable lock during recovery: {}", e);
                None
            }
        };

        let from_lock = locked_id.as_deref().and_then(|id| {
            let state = self.store.load_checkpoint(id);
            if state.is_none() {
                warn!("Checkpoint {} named in lock is missing or unreadable", id);
            }
            state
        });

        let state = match from_lock {
            Some(state) => Some(state),
            None => self.store.load_latest_checkpoint()?,
        };

        match &state {
            Some(state) => info!(
                "Recovered checkpoint {} ({} completed, {} failed)",
                state.checkpoint_id,
                state.completed.len(),
                state.failed.len()
            ),
            None => info!("No checkpoint to recover"),
        }

        self.release_lock()?;
        Ok(state)
    }

    /// Persist state through `on_shutdown`, release the lock and return the
    /// exit code. Only the first caller does any work.
    pub fn run_shutdown(&self, on_shutdown: &ShutdownFn, exit_code: i32) -> i32 {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return exit_code;
        }

        info!("Shutting down with exit code {}", exit_code);
        if let Err(e) = on_shutdown() {
            error!("Failed to persist state during shutdown: {}", e);
        }
        if let Err(e) = self.release_lock() {
            error!("Failed to release lock during shutdown: {}", e);
        }
        exit_code
    }

    /// Install SIGINT/SIGTERM handling and a panic hook. Both run the
    /// shutdown sequence and exit the process.
    pub fn setup_signal_handlers(self: &Arc<Self>, on_shutdown: ShutdownFn) -> JoinHandle<()> {
        let for_panic = Arc::clone(self);
        let panic_shutdown = Arc::clone(&on_shutdown);
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            previous(info);
            let code = for_panic.run_shutdown(&panic_shutdown, EXIT_PANIC);
            std::process::exit(code);
        }));

        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let code = wait_for_signal().await;
            let code = controller.run_shutdown(&on_shutdown, code);
            std::process::exit(code);
        })
    }
}

async fn wait_for_signal() -> i32 {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
            EXIT_SIGINT
        },
        _ = terminate => {
            info!("Received SIGTERM");
            EXIT_SIGTERM
        },
    }
}
