//! Task list loaded from a YAML or JSON file.

use async_trait::async_trait;
use log::{debug, info};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::TaskSource;
use crate::domain::Task;
use crate::error::{DrainError, Result};

/// One entry in a task file: a task plus its tracker status.
#[derive(Debug, Clone, Deserialize)]
struct TaskEntry {
    #[serde(flatten)]
    task: Task,
    /// Tracker-side status ("todo", "in-progress"); absent matches any filter
    #[serde(default)]
    status: Option<String>,
}

/// A task file is either a bare list or `{ tasks: [...] }`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TaskFile {
    List(Vec<TaskEntry>),
    Wrapped { tasks: Vec<TaskEntry> },
}

impl TaskFile {
    fn into_entries(self) -> Vec<TaskEntry> {
        match self {
            TaskFile::List(entries) | TaskFile::Wrapped { tasks: entries } => entries,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileTaskSource {
    path: PathBuf,
}

impl FileTaskSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_json(&self) -> bool {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"))
    }

    fn parse(&self, content: &str) -> Result<Vec<TaskEntry>> {
        let file: TaskFile = if self.is_json() {
            serde_json::from_str(content)?
        } else {
            serde_yaml::from_str(content)?
        };
        Ok(file.into_entries())
    }
}

#[async_trait]
impl TaskSource for FileTaskSource {
    async fn fetch_tasks(&self, status_filter: Option<&str>) -> Result<Vec<Task>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| DrainError::Config(format!("cannot read task file {}: {}", self.path.display(), e)))?;

        let entries = self.parse(&content)?;
        let total = entries.len();
        let tasks: Vec<Task> = entries
            .into_iter()
            .filter(|entry| match (status_filter, &entry.status) {
                (Some(filter), Some(status)) => status.eq_ignore_ascii_case(filter),
                _ => true,
            })
            .map(|entry| entry.task)
            .collect();

        if tasks.len() < total {
            debug!("Status filter {:?} kept {} of {} tasks", status_filter, tasks.len(), total);
        }
        info!("Loaded {} tasks from {}", tasks.len(), self.path.display());
        Ok(tasks)
    }
}
