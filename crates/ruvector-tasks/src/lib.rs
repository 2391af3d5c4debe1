//! ruvector-tasks: asynchronous task-processing core for document ingestion
//!
//! Uploaded files become tasks that are admitted into a bounded priority
//! queue, executed by a fixed pool of workers through a pluggable strategy
//! per task type, retried according to a rule-based error classifier and
//! tracked through a status state machine with scope-keyed live updates.

pub mod config;
pub mod error;
pub mod processing;
pub mod providers;
pub mod service;
pub mod status;
pub mod storage;
pub mod strategy;
pub mod types;

pub use config::TaskConfig;
pub use error::{Error, ErrorKind, ProcessingError, Result};
pub use service::{ServiceStats, TaskService};
pub use status::Subscription;
pub use storage::{open_store, TaskStore};
pub use strategy::{ProcessingStrategy, ProgressReporter, StrategyOutput, StrategyRegistry};
pub use types::{
    CancelOutcome, ErrorCategory, EventKind, ListQuery, Page, Progress, RecoveryReport, Scope,
    ScopeSummary, StatusEvent, Subject, SubmitRequest, SystemAlert, TaskId, TaskPriority,
    TaskRecord, TaskStatus, TaskType,
};
