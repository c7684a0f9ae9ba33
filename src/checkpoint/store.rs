//! File-backed checkpoint store with atomic writes.
//!
//! One JSON file per run (`checkpoint-{id}.json`), overwritten on every save.
//! Writes go to a uniquely named temp file in the same directory and are
//! renamed into place, so the final path only ever holds a complete record.

use log::{debug, info, warn};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::record::CheckpointRecord;
use crate::domain::ExecutionState;
use crate::error::{DrainError, Result};
use crate::id::{generate_checkpoint_id, random_suffix};

const FILE_PREFIX: &str = "checkpoint-";
const FILE_SUFFIX: &str = ".json";

/// Durable snapshot/restore of execution state.
#[derive(Debug)]
pub struct CheckpointStore {
    dir: PathBuf,
    /// Id this run saves under; set on first save and reused afterwards
    current_id: Mutex<Option<String>>,
}

impl CheckpointStore {
    /// Open (creating if needed) a checkpoint directory.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            current_id: Mutex::new(None),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn current(&self) -> MutexGuard<'_, Option<String>> {
        self.current_id.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Id the next save will write to, if one has been chosen.
    pub fn current_id(&self) -> Option<String> {
        self.current().clone()
    }

    /// Keep writing to an existing record (used when resuming).
    pub fn adopt(&self, checkpoint_id: impl Into<String>) {
        *self.current() = Some(checkpoint_id.into());
    }

    /// Get the file path for a checkpoint id.
    pub fn path_for(&self, checkpoint_id: &str) -> PathBuf {
        self.dir.join(format!("{}{}{}", FILE_PREFIX, checkpoint_id, FILE_SUFFIX))
    }

    /// Empty state with a fresh id, which this store adopts for later saves.
    pub fn create_initial_state(&self) -> ExecutionState {
        let state = ExecutionState::new();
        self.adopt(state.checkpoint_id.clone());
        state
    }

    /// Persist `state`, overwriting this run's record. Returns the checkpoint id.
    ///
    /// The record carries `state.timestamp`; callers refresh it before saving.
    pub fn save_checkpoint(&self, state: &ExecutionState) -> Result<String> {
        let checkpoint_id = self.current().get_or_insert_with(generate_checkpoint_id).clone();

        let record = CheckpointRecord::from_state(state, &checkpoint_id);
        let bytes = serde_json::to_vec_pretty(&record)?;
        let path = self.path_for(&checkpoint_id);
        write_atomic(&path, &bytes)
            .map_err(|e| DrainError::Checkpoint(format!("failed to write {}: {}", path.display(), e)))?;

        debug!(
            "Saved checkpoint {} ({} completed, {} failed)",
            checkpoint_id,
            record.completed_tasks.len(),
            record.failed_tasks.len()
        );
        Ok(checkpoint_id)
    }

    fn read_record(&self, path: &Path) -> Option<CheckpointRecord> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Cannot read checkpoint {}: {}", path.display(), e);
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Ignoring malformed checkpoint {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Load a checkpoint by id. Missing or malformed records yield `None`.
    pub fn load_checkpoint(&self, checkpoint_id: &str) -> Option<ExecutionState> {
        self.read_record(&self.path_for(checkpoint_id))
            .map(CheckpointRecord::into_state)
    }

    /// All parseable records, newest first.
    pub fn list_checkpoints(&self) -> Result<Vec<CheckpointRecord>> {
        Ok(self.list_files()?.into_iter().map(|(_, record)| record).collect())
    }

    /// Parseable records with the file each was read from, newest first.
    fn list_files(&self) -> Result<Vec<(PathBuf, CheckpointRecord)>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_checkpoint = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(FILE_PREFIX) && n.ends_with(FILE_SUFFIX));
            if !is_checkpoint {
                continue;
            }
            if let Some(record) = self.read_record(&path) {
                records.push((path, record));
            }
        }

        records.sort_by(|(_, a), (_, b)| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }

    /// The record with the greatest timestamp.
    pub fn load_latest_checkpoint(&self) -> Result<Option<ExecutionState>> {
        Ok(self
            .list_checkpoints()?
            .into_iter()
            .next()
            .map(CheckpointRecord::into_state))
    }

    /// Delete a record. Returns false if it did not exist.
    pub fn delete_checkpoint(&self, checkpoint_id: &str) -> Result<bool> {
        remove_if_present(&self.path_for(checkpoint_id))
    }

    /// Keep the `keep` most recent records, delete the rest. Returns the
    /// number deleted.
    pub fn cleanup_old_checkpoints(&self, keep: usize) -> Result<usize> {
        let mut deleted = 0;
        for (path, _) in self.list_files()?.into_iter().skip(keep) {
            if remove_if_present(&path)? {
                deleted += 1;
            }
        }
        if deleted > 0 {
            info!("Removed {} old checkpoint(s), kept {}", deleted, keep);
        }
        Ok(deleted)
    }
}

fn remove_if_present(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Write `bytes` to `path` through a uniquely named temp file in the same
/// directory, renamed into place after `sync_all`. The temp file is removed
/// on failure.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{}.tmp-{}", file_name, random_suffix()));

    let written = (|| -> std::io::Result<()> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if written.is_err() {
        if let Err(cleanup) = fs::remove_file(&tmp) {
            if cleanup.kind() != ErrorKind::NotFound {
                warn!("Failed to remove temp file {}: {}", tmp.display(), cleanup);
            }
        }
    }
    written
}
