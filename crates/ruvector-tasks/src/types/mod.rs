//! Core types for task records, events and service requests

pub mod event;
pub mod request;
pub mod task;

pub use event::{EventKind, StatusEvent, SystemAlert};
pub use request::{
    CancelOutcome, ListQuery, Page, RecoveryReport, ScopeSummary, SubmitRequest,
};
pub use task::{
    ErrorCategory, ErrorRecord, Progress, Scope, Subject, TaskId, TaskOptions, TaskPriority,
    TaskRecord, TaskStatus, TaskType,
};
