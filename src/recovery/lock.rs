//! Run lock file.
//!
//! The lock is created with `create_new`, so two processes racing for it
//! cannot both succeed. Its presence at startup means the previous run did
//! not shut down cleanly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::checkpoint::write_atomic;
use crate::error::{DrainError, Result};

pub const LOCK_FILE_NAME: &str = "drainq.lock";

/// Contents of the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    pub pid: u32,
    pub start_time: DateTime<Utc>,
    /// Last checkpoint saved by the holder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,
}

impl LockRecord {
    /// Record for the current process.
    pub fn current(checkpoint_id: Option<&str>) -> Self {
        Self {
            pid: std::process::id(),
            start_time: Utc::now(),
            checkpoint_id: checkpoint_id.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Lock file inside a state directory.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(LOCK_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Create the lock. Returns false if it already exists.
    pub fn try_create(&self, record: &LockRecord) -> Result<bool> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        file.write_all(&serde_json::to_vec_pretty(record)?)?;
        file.sync_all()?;
        Ok(true)
    }

    /// Replace the contents of an existing lock.
    pub fn rewrite(&self, record: &LockRecord) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(record)?;
        write_atomic(&self.path, &bytes)
            .map_err(|e| DrainError::Lock(format!("failed to update {}: {}", self.path.display(), e)))
    }

    /// Read the lock. `Ok(None)` when absent, `Err` when unreadable.
    pub fn read(&self) -> Result<Option<LockRecord>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| DrainError::Lock(format!("malformed lock {}: {}", self.path.display(), e)))
    }

    /// Delete the lock. Returns false if there was nothing to delete.
    pub fn remove(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_create_fails() {
        let temp = TempDir::new().unwrap();
        let lock = LockFile::in_dir(temp.path());

        assert!(lock.try_create(&LockRecord::current(None)).unwrap());
        assert!(!lock.try_create(&LockRecord::current(None)).unwrap());
        assert!(lock.exists());
    }

    #[test]
    fn test_read_round_trip() {
        let temp = TempDir::new().unwrap();
        let lock = LockFile::in_dir(temp.path());
        assert!(lock.read().unwrap().is_none());

        let record = LockRecord::current(Some("cp-1"));
        lock.try_create(&record).unwrap();
        assert_eq!(lock.read().unwrap(), Some(record));
    }

    #[test]
    fn test_json_shape() {
        let record = LockRecord::current(None);
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("pid").is_some());
        assert!(json.get("startTime").is_some());
        assert!(json.get("checkpointId").is_none());
    }

    #[test]
    fn test_rewrite_updates_checkpoint() {
        let temp = TempDir::new().unwrap();
        let lock = LockFile::in_dir(temp.path());
        let mut record = LockRecord::current(None);
        lock.try_create(&record).unwrap();

        record.checkpoint_id = Some("cp-2".to_string());
        lock.rewrite(&record).unwrap();
        assert_eq!(lock.read().unwrap().unwrap().checkpoint_id.as_deref(), Some("cp-2"));
    }

    #[test]
    fn test_malformed_lock_is_an_error() {
        let temp = TempDir::new().unwrap();
        let lock = LockFile::in_dir(temp.path());
        fs::write(lock.path(), "").unwrap();
        assert!(matches!(lock.read(), Err(DrainError::Lock(_))));
    }

    #[test]
    fn test_remove_missing_is_ok() {
        let temp = TempDir::new().unwrap();
        let lock = LockFile::in_dir(temp.path());
        assert!(!lock.remove().unwrap());
        lock.try_create(&LockRecord::current(None)).unwrap();
        assert!(lock.remove().unwrap());
        assert!(!lock.exists());
    }
}
