//! Error types for drainq
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur in drainq
#[derive(Debug, Error)]
pub enum DrainError {
    /// Dependency graph contains at least one cycle
    #[error("Dependency cycle detected: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    /// Status change not allowed by the task state machine
    #[error("Invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition { task_id: String, from: String, to: String },

    /// Task id is not present in the graph
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Estimate can never fit in the bucket, waiting would never end
    #[error("Permit too large: {requested} {dimension} exceeds capacity {capacity}")]
    PermitTooLarge {
        dimension: &'static str,
        requested: u64,
        capacity: u64,
    },

    /// Checkpoint persistence error
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Run lock error
    #[error("Lock error: {0}")]
    Lock(String),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Fault raised by a task executor
    #[error("Executor error: {0}")]
    Executor(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for drainq operations
pub type Result<T> = std::result::Result<T, DrainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_lists_path() {
        let err = DrainError::CycleDetected(vec!["A".into(), "B".into(), "A".into()]);
        assert_eq!(err.to_string(), "Dependency cycle detected: A -> B -> A");
    }

    #[test]
    fn test_invalid_transition_error() {
        let err = DrainError::InvalidTransition {
            task_id: "T-1".to_string(),
            from: "completed".to_string(),
            to: "executing".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid transition for task T-1: completed -> executing");
    }

    #[test]
    fn test_permit_too_large_error() {
        let err = DrainError::PermitTooLarge {
            dimension: "input tokens",
            requested: 5000,
            capacity: 4000,
        };
        assert_eq!(err.to_string(), "Permit too large: 5000 input tokens exceeds capacity 4000");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: DrainError = io_err.into();
        assert!(matches!(err, DrainError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: DrainError = json_err.into();
        assert!(matches!(err, DrainError::Json(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(DrainError::TaskNotFound("T-9".to_string()))
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }
}
