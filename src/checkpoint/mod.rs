//! Checkpoint persistence.
//!
//! This module provides:
//! - **CheckpointRecord**: The JSON shape of a saved execution state
//! - **CheckpointStore**: Atomic save, load, listing and retention cleanup

mod record;
mod store;

pub use record::{CheckpointRecord, FailedTaskEntry};
pub use store::CheckpointStore;
pub(crate) use store::write_atomic;
