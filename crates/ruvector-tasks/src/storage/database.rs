//! SQLite task store
//!
//! Each task is one row keyed by id. The full record is kept as JSON; scope,
//! status and timestamps are duplicated into indexed columns for listing and
//! recovery.

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::{Scope, TaskId, TaskRecord, TaskStatus};

use super::TaskStore;

/// SQLite-based task store
pub struct SqliteTaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTaskStore {
    /// Create or open the database at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::Storage(format!("Failed to open database: {}", e)))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        store.migrate()?;
        Ok(store)
    }

    /// Create an in-memory database
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Storage(format!("Failed to open in-memory database: {}", e)))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        store.migrate()?;
        Ok(store)
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA temp_store=MEMORY;
        "#,
        )
        .map_err(|e| Error::Storage(format!("Failed to set pragmas: {}", e)))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                scope TEXT NOT NULL,
                status TEXT NOT NULL,
                task_type TEXT NOT NULL,
                priority TEXT NOT NULL,
                attempt_count INTEGER NOT NULL,
                max_attempts INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT,
                record_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_scope ON tasks(scope, created_at);
            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status, created_at);
        "#,
        )
        .map_err(|e| Error::Storage(format!("Failed to create tables: {}", e)))?;

        Ok(())
    }
}

impl TaskStore for SqliteTaskStore {
    fn save(&self, record: &TaskRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let conn = self.conn.lock();

        conn.execute(
            r#"
            INSERT INTO tasks (
                id, scope, status, task_type, priority, attempt_count, max_attempts,
                created_at, updated_at, completed_at, record_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                attempt_count = excluded.attempt_count,
                updated_at = excluded.updated_at,
                completed_at = excluded.completed_at,
                record_json = excluded.record_json
            "#,
            params![
                record.id.to_string(),
                record.scope.as_str(),
                record.status.as_str(),
                record.task_type.as_str(),
                record.priority.as_str(),
                record.attempt_count as i64,
                record.max_attempts as i64,
                timestamp(&record.created_at),
                timestamp(&record.updated_at),
                record.completed_at.as_ref().map(timestamp),
                json,
            ],
        )
        .map_err(|e| Error::Storage(format!("Failed to save task {}: {}", record.id, e)))?;

        Ok(())
    }

    fn load(&self, id: TaskId) -> Result<Option<TaskRecord>> {
        let conn = self.conn.lock();

        let json: Option<String> = conn
            .query_row(
                "SELECT record_json FROM tasks WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Storage(format!("Failed to load task {}: {}", id, e)))?;

        json.map(|j| serde_json::from_str(&j).map_err(Error::from))
            .transpose()
    }

    fn list_by_scope(&self, scope: &Scope, status: Option<TaskStatus>) -> Result<Vec<TaskRecord>> {
        let conn = self.conn.lock();

        let mut stmt = conn
            .prepare(
                r#"
                SELECT record_json FROM tasks
                WHERE scope = ?1 AND (?2 IS NULL OR status = ?2)
                ORDER BY created_at, id
                "#,
            )
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

        let records = stmt
            .query_map(
                params![scope.as_str(), status.map(|s| s.as_str())],
                row_to_task_record,
            )
            .map_err(|e| Error::Storage(format!("Failed to list tasks: {}", e)))?
            .filter_map(|r| r.ok())
            .flatten()
            .collect();

        Ok(records)
    }

    fn list_by_status(&self, statuses: &[TaskStatus]) -> Result<Vec<TaskRecord>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock();
        let placeholders = (1..=statuses.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT record_json FROM tasks WHERE status IN ({}) ORDER BY created_at, id",
            placeholders
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

        let params: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        let records = stmt
            .query_map(rusqlite::params_from_iter(params), row_to_task_record)
            .map_err(|e| Error::Storage(format!("Failed to list tasks: {}", e)))?
            .filter_map(|r| r.ok())
            .flatten()
            .collect();

        Ok(records)
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

/// Fixed-width RFC 3339 so text ordering matches time ordering
fn timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn row_to_task_record(row: &rusqlite::Row) -> rusqlite::Result<Option<TaskRecord>> {
    let json: String = row.get(0)?;
    match serde_json::from_str(&json) {
        Ok(record) => Ok(Some(record)),
        Err(e) => {
            tracing::warn!("Skipping unreadable task row: {}", e);
            Ok(None)
        }
    }
}
