//! Notifications published by the status manager

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::{ErrorCategory, ErrorRecord, Progress, Scope, TaskId, TaskStatus};

/// What caused an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Status changed
    Transition,
    /// Progress moved within `processing`
    Progress,
}

/// Status change (or progress) of one task, fanned out per scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub task_id: TaskId,
    pub scope: Scope,
    pub kind: EventKind,
    pub old_status: TaskStatus,
    pub new_status: TaskStatus,
    pub progress: Progress,
    pub attempt_count: u32,
    /// Most recent error, when the transition was caused by a failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    pub fn is_terminal(&self) -> bool {
        self.new_status.is_terminal()
    }
}

/// System-level monitoring signal, separate from per-task events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemAlert {
    pub task_id: TaskId,
    pub scope: Scope,
    pub category: ErrorCategory,
    /// Name of the classifier rule that asked for escalation
    pub rule: String,
    pub message: String,
    pub attempt_count: u32,
    pub timestamp: DateTime<Utc>,
}
