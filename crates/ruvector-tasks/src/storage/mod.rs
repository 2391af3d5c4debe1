//! Persistence for task records
//!
//! The status manager writes every transition through a [`TaskStore`]. One
//! record is kept per task id, with secondary indexes by scope and status so
//! listings and recovery never need a full scan.

mod database;
mod memory;

pub use database::SqliteTaskStore;
pub use memory::MemoryTaskStore;

use std::sync::Arc;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::Result;
use crate::types::{Scope, TaskId, TaskRecord, TaskStatus};

/// Persistence contract for task records
pub trait TaskStore: Send + Sync {
    /// Insert or replace a record
    fn save(&self, record: &TaskRecord) -> Result<()>;

    /// Load a record by id
    fn load(&self, id: TaskId) -> Result<Option<TaskRecord>>;

    /// Records of a scope, optionally filtered by status, oldest first
    fn list_by_scope(&self, scope: &Scope, status: Option<TaskStatus>) -> Result<Vec<TaskRecord>>;

    /// Records in any of the given statuses, oldest first
    fn list_by_status(&self, statuses: &[TaskStatus]) -> Result<Vec<TaskRecord>>;

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// Open the configured backend
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn TaskStore>> {
    match config.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryTaskStore::new())),
        StorageBackend::Sqlite => {
            if let Some(parent) = config.database_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Ok(Arc::new(SqliteTaskStore::new(&config.database_path)?))
        }
    }
}
