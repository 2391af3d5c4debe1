//! Request and response shapes of the task service contract

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::task::{Scope, Subject, TaskOptions, TaskPriority, TaskStatus, TaskType};

/// Fields a caller supplies to submit a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub task_type: TaskType,
    pub subject: Subject,
    pub scope: Scope,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub config: TaskOptions,
    /// Defaults to `retry.default_max_attempts`
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Defaults to the subject tier timeout
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl SubmitRequest {
    pub fn new(task_type: TaskType, subject: Subject, scope: impl Into<Scope>) -> Self {
        Self {
            task_type,
            subject,
            scope: scope.into(),
            priority: None,
            config: TaskOptions::new(),
            max_attempts: None,
            timeout_secs: None,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }
}

/// Listing filter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListQuery {
    pub scope: Scope,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_page_limit")]
    pub limit: usize,
}

fn default_page_limit() -> usize {
    50
}

impl ListQuery {
    pub fn scope(scope: impl Into<Scope>) -> Self {
        Self {
            scope: scope.into(),
            status: None,
            offset: 0,
            limit: default_page_limit(),
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }
}

/// One page of listing results
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Matches before paging
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

impl<T> Page<T> {
    pub fn has_more(&self) -> bool {
        self.offset + self.items.len() < self.total
    }
}

/// Derived per-scope aggregate
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScopeSummary {
    pub scope: String,
    pub total: usize,
    /// Count per status, keyed by status name; every status is present
    pub counts: BTreeMap<String, usize>,
    /// Mean submission-to-completion time of completed tasks
    pub avg_completion_ms: Option<f64>,
}

impl ScopeSummary {
    pub fn count(&self, status: TaskStatus) -> usize {
        self.counts.get(status.as_str()).copied().unwrap_or(0)
    }
}

/// Outcome of a cancellation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// Task was not yet claimed and is now cancelled
    Cancelled,
    /// Task is processing; the strategy will observe the flag at its next checkpoint
    CancellationRequested,
}

/// What startup recovery did
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    pub requeued: usize,
    /// Could not be admitted yet; left `retrying` for the retry timer
    pub deferred: usize,
    pub failed: usize,
}
