//! Status sink that only logs.

use async_trait::async_trait;
use log::info;

use super::StatusSink;
use crate::domain::TaskStatus;
use crate::error::Result;

#[derive(Debug, Clone, Default)]
pub struct LogSink;

impl LogSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StatusSink for LogSink {
    async fn update_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        info!("Task {} -> {}", task_id, status);
        Ok(())
    }

    async fn add_comment(&self, task_id: &str, comment: &str) -> Result<()> {
        info!("Task {}: {}", task_id, comment);
        Ok(())
    }
}
