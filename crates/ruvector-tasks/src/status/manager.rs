//! Status manager: the single writer of task records
//!
//! Every live (non-terminal) task has one mutex-guarded entry. All status
//! changes for a task happen under its lock, are persisted first and then
//! published, so subscribers see a task's events in transition order and a
//! query right after an event reflects that event. Terminal records are
//! dropped from memory once persisted and served from the store afterwards.
//!
//! Lock order: never hold a `records` map guard while taking a task lock.

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::error::{Error, ProcessingError, Result};
use crate::processing::{RetryClassifier, TaskQueue};
use crate::storage::TaskStore;
use crate::strategy::{ProgressSink, StrategyOutput};
use crate::types::{
    CancelOutcome, ErrorCategory, ErrorRecord, EventKind, ListQuery, Page, Progress,
    RecoveryReport, Scope, ScopeSummary, StatusEvent, SystemAlert, TaskId, TaskRecord,
    TaskStatus,
};

use super::machine::check_transition;
use super::notifier::{Notifier, Subscription};

struct LiveTask {
    record: TaskRecord,
    cancel: Arc<AtomicBool>,
}

type LiveEntry = Arc<Mutex<LiveTask>>;

/// A task handed to a worker
#[derive(Debug, Clone)]
pub struct Claim {
    /// Snapshot taken at claim time
    pub record: TaskRecord,
    /// Set when cancellation is requested while processing
    pub cancel: Arc<AtomicBool>,
}

/// Result of trying to put a retrying task back on the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readmit {
    Queued,
    /// Queue full; try again later
    Busy,
    /// Cancelled, finished or shutting down
    Gone,
}

/// Owns the task state machine
pub struct StatusManager {
    records: DashMap<TaskId, LiveEntry>,
    store: Arc<dyn TaskStore>,
    queue: Arc<TaskQueue>,
    classifier: RetryClassifier,
    notifier: Notifier,
    readmit_interval: Duration,
    weak_self: Weak<StatusManager>,
}

impl StatusManager {
    pub fn new(
        store: Arc<dyn TaskStore>,
        queue: Arc<TaskQueue>,
        classifier: RetryClassifier,
        notifier: Notifier,
        readmit_interval: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            records: DashMap::new(),
            store,
            queue,
            classifier,
            notifier,
            readmit_interval,
            weak_self: weak_self.clone(),
        })
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn subscribe(&self, scope: &Scope) -> Subscription {
        self.notifier.subscribe(scope)
    }

    /// Number of non-terminal tasks held in memory
    pub fn live_count(&self) -> usize {
        self.records.len()
    }

    fn live(&self, id: TaskId) -> Option<LiveEntry> {
        self.records.get(&id).map(|entry| entry.value().clone())
    }

    fn live_entries(&self) -> Vec<LiveEntry> {
        self.records.iter().map(|entry| entry.value().clone()).collect()
    }

    // ==================== Admission ====================

    /// Admit a new pending record; on capacity rejection nothing is kept
    pub fn admit(&self, record: TaskRecord) -> Result<TaskId> {
        let id = record.id;
        let priority = record.priority;
        let entry: LiveEntry = Arc::new(Mutex::new(LiveTask {
            record,
            cancel: Arc::new(AtomicBool::new(false)),
        }));

        // Hold the task lock so a worker cannot claim before we mark it queued
        let mut task = entry.lock();
        self.records.insert(id, entry.clone());

        if let Err(e) = self.queue.admit(id, priority) {
            self.records.remove(&id);
            return Err(e);
        }

        self.transition(&mut task, TaskStatus::Queued, None)?;
        Ok(id)
    }

    // ==================== Worker reports ====================

    /// Move a queued task to processing; `None` if it is no longer queued
    pub fn claim(&self, id: TaskId) -> Option<Claim> {
        let entry = self.live(id)?;
        let mut task = entry.lock();
        if task.record.status != TaskStatus::Queued {
            tracing::debug!("Task {} is {}, not claiming", id, task.record.status);
            return None;
        }

        task.record.attempt_count += 1;
        task.record.progress = Progress::default();
        task.record.result = None;
        self.transition(&mut task, TaskStatus::Processing, None).ok()?;

        Some(Claim {
            record: task.record.clone(),
            cancel: task.cancel.clone(),
        })
    }

    /// Record progress of a processing task. Decreases are ignored.
    pub fn update_progress(&self, id: TaskId, progress: Progress) {
        let Some(entry) = self.live(id) else {
            return;
        };
        let mut task = entry.lock();
        if task.record.status != TaskStatus::Processing {
            return;
        }
        if progress.percentage < task.record.progress.percentage {
            tracing::debug!(
                "Ignoring progress decrease for task {}: {} -> {}",
                id,
                task.record.progress.percentage,
                progress.percentage
            );
            return;
        }

        tracing::debug!(
            "Task {} progress {}% ({})",
            id,
            progress.percentage,
            progress.current_operation
        );
        task.record.progress = progress;
        task.record.updated_at = Utc::now();

        let event = event_for(&task.record, TaskStatus::Processing, EventKind::Progress, None);
        self.notifier.publish(event);
    }

    /// The strategy succeeded
    pub fn complete(&self, id: TaskId, output: StrategyOutput) -> Result<()> {
        let entry = self.live(id).ok_or(Error::TaskNotFound(id))?;
        let mut task = entry.lock();

        task.record.result = Some(output.summary);
        task.record.progress = Progress::new(100, "completed");
        self.transition(&mut task, TaskStatus::Completed, None)?;

        tracing::info!(
            "Task {} completed after {} attempt(s)",
            id,
            task.record.attempt_count
        );
        Ok(())
    }

    /// The strategy (or the worker on its behalf) failed
    pub fn fail(&self, id: TaskId, error: ProcessingError) -> Result<()> {
        let entry = self.live(id).ok_or(Error::TaskNotFound(id))?;
        let mut task = entry.lock();
        if task.record.status != TaskStatus::Processing {
            return Err(Error::InvalidTransition {
                task_id: id,
                from: task.record.status,
                to: TaskStatus::Failed,
            });
        }

        let decision = self.classifier.classify(&error, &task.record);
        let error_record = ErrorRecord {
            attempt_number: task.record.attempt_count,
            classification: decision.category,
            message: error.message.clone(),
            timestamp: Utc::now(),
        };
        task.record.error_history.push(error_record.clone());

        if decision.should_escalate {
            self.notifier.alert(SystemAlert {
                task_id: id,
                scope: task.record.scope.clone(),
                category: decision.category,
                rule: decision.rule.clone(),
                message: error.to_string(),
                attempt_count: task.record.attempt_count,
                timestamp: Utc::now(),
            });
        }

        if task.record.cancel_requested || error.is_cancelled() {
            self.transition(&mut task, TaskStatus::Cancelled, Some(error_record))?;
            tracing::info!("Task {} cancelled at checkpoint", id);
        } else if decision.retryable {
            self.transition(&mut task, TaskStatus::Retrying, Some(error_record))?;
            tracing::warn!(
                "Task {} attempt {}/{} failed ({}, rule '{}'): {}; retrying in {:?}",
                id,
                task.record.attempt_count,
                task.record.max_attempts,
                decision.category,
                decision.rule,
                error,
                decision.delay
            );
            drop(task);
            self.schedule_readmit(id, decision.delay);
        } else {
            self.transition(&mut task, TaskStatus::Failed, Some(error_record))?;
            tracing::error!(
                "Task {} failed after {} attempt(s) ({}, rule '{}'): {}",
                id,
                task.record.attempt_count,
                decision.category,
                decision.rule,
                error
            );
        }
        Ok(())
    }

    // ==================== Retry re-admission ====================

    fn schedule_readmit(&self, id: TaskId, delay: Duration) {
        let weak = self.weak_self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            loop {
                let Some(manager) = weak.upgrade() else {
                    return;
                };
                if manager.readmit(id) != Readmit::Busy {
                    return;
                }
                let interval = manager.readmit_interval;
                drop(manager);
                tokio::time::sleep(interval).await;
            }
        });
    }

    fn readmit(&self, id: TaskId) -> Readmit {
        let Some(entry) = self.live(id) else {
            return Readmit::Gone;
        };
        let mut task = entry.lock();
        if task.record.status != TaskStatus::Retrying || self.queue.is_closed() {
            return Readmit::Gone;
        }

        match self.queue.admit(id, task.record.priority) {
            Ok(()) => match self.transition(&mut task, TaskStatus::Queued, None) {
                Ok(_) => Readmit::Queued,
                Err(e) => {
                    tracing::error!("Failed to re-queue task {}: {}", id, e);
                    Readmit::Gone
                }
            },
            Err(e) if e.is_capacity_exceeded() => {
                tracing::debug!("Queue full, deferring re-admission of task {}", id);
                Readmit::Busy
            }
            Err(e) => {
                tracing::debug!("Not re-admitting task {}: {}", id, e);
                Readmit::Gone
            }
        }
    }

    // ==================== Cancellation ====================

    /// Cancel a task. Unclaimed tasks are cancelled immediately; processing
    /// tasks get a flag the strategy observes at its next checkpoint.
    pub fn cancel(&self, id: TaskId) -> Result<CancelOutcome> {
        let Some(entry) = self.live(id) else {
            return match self.store.load(id)? {
                Some(record) => Err(Error::InvalidTransition {
                    task_id: id,
                    from: record.status,
                    to: TaskStatus::Cancelled,
                }),
                None => Err(Error::TaskNotFound(id)),
            };
        };

        let mut task = entry.lock();
        match task.record.status {
            TaskStatus::Pending | TaskStatus::Queued | TaskStatus::Retrying => {
                self.queue.remove(id);
                self.transition(&mut task, TaskStatus::Cancelled, None)?;
                tracing::info!("Task {} cancelled", id);
                Ok(CancelOutcome::Cancelled)
            }
            TaskStatus::Processing => {
                task.cancel.store(true, Ordering::Release);
                if !task.record.cancel_requested {
                    task.record.cancel_requested = true;
                    task.record.updated_at = Utc::now();
                    self.persist(&task.record);
                    tracing::info!("Cancellation requested for processing task {}", id);
                }
                Ok(CancelOutcome::CancellationRequested)
            }
            from => Err(Error::InvalidTransition {
                task_id: id,
                from,
                to: TaskStatus::Cancelled,
            }),
        }
    }

    /// Cancel every active task of a scope; returns how many were affected
    pub fn cancel_scope(&self, scope: &Scope) -> usize {
        let ids: Vec<TaskId> = self
            .live_entries()
            .into_iter()
            .filter_map(|entry| {
                let task = entry.lock();
                (task.record.scope == *scope).then_some(task.record.id)
            })
            .collect();

        ids.into_iter()
            .filter(|id| self.cancel(*id).is_ok())
            .count()
    }

    // ==================== Queries ====================

    /// Current snapshot of a task
    pub fn get(&self, id: TaskId) -> Result<TaskRecord> {
        if let Some(entry) = self.live(id) {
            let record = entry.lock().record.clone();
            return Ok(record);
        }
        self.store.load(id)?.ok_or(Error::TaskNotFound(id))
    }

    /// Known records of a scope, optionally of one status, oldest first.
    /// Live state takes precedence over what the store returned.
    fn scope_records(&self, scope: &Scope, status: Option<TaskStatus>) -> Result<Vec<TaskRecord>> {
        let mut merged: HashMap<TaskId, TaskRecord> = self
            .store
            .list_by_scope(scope, status)?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();

        for entry in self.live_entries() {
            let task = entry.lock();
            if task.record.scope != *scope {
                continue;
            }
            if status.map_or(true, |s| s == task.record.status) {
                merged.insert(task.record.id, task.record.clone());
            } else {
                merged.remove(&task.record.id);
            }
        }

        let mut records: Vec<TaskRecord> = merged.into_values().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    pub fn list(&self, query: &ListQuery) -> Result<Page<TaskRecord>> {
        let records = self.scope_records(&query.scope, query.status)?;

        let total = records.len();
        let items = records
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect();

        Ok(Page {
            items,
            total,
            offset: query.offset,
            limit: query.limit,
        })
    }

    pub fn summary(&self, scope: &Scope) -> Result<ScopeSummary> {
        let records = self.scope_records(scope, None)?;

        let mut counts: std::collections::BTreeMap<String, usize> = TaskStatus::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
        for record in &records {
            *counts.entry(record.status.as_str().to_string()).or_default() += 1;
        }

        let durations: Vec<i64> = records
            .iter()
            .filter(|r| r.status == TaskStatus::Completed)
            .filter_map(|r| r.completion_duration_ms())
            .collect();
        let avg_completion_ms = if durations.is_empty() {
            None
        } else {
            Some(durations.iter().sum::<i64>() as f64 / durations.len() as f64)
        };

        Ok(ScopeSummary {
            scope: scope.to_string(),
            total: records.len(),
            counts,
            avg_completion_ms,
        })
    }

    // ==================== Recovery ====================

    /// Resume active records found in the store at startup
    ///
    /// Pending, queued and retrying records are re-admitted without using an
    /// attempt. Records that were processing lost their attempt: it is
    /// recorded as an interrupted transient error and the task is retried if
    /// attempts remain (and `requeue_interrupted` is set), otherwise failed.
    /// Records the queue has no room for stay `retrying` and are re-admitted
    /// on the retry timer.
    pub fn recover(&self, requeue_interrupted: bool) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for mut record in self.store.list_by_status(&TaskStatus::ACTIVE)? {
            let id = record.id;
            if self.records.contains_key(&id) {
                continue;
            }

            let interrupted = record.status == TaskStatus::Processing;
            if !interrupted {
                // Queue contents did not survive; wait for re-admission
                record.status = TaskStatus::Retrying;
            }

            let entry: LiveEntry = Arc::new(Mutex::new(LiveTask {
                cancel: Arc::new(AtomicBool::new(record.cancel_requested)),
                record,
            }));
            self.records.insert(id, entry.clone());

            if interrupted {
                let mut task = entry.lock();
                let error_record = ErrorRecord {
                    attempt_number: task.record.attempt_count,
                    classification: ErrorCategory::Transient,
                    message: "interrupted by restart".to_string(),
                    timestamp: Utc::now(),
                };
                task.record.error_history.push(error_record.clone());

                let next = if task.record.cancel_requested {
                    TaskStatus::Cancelled
                } else if requeue_interrupted && task.record.attempts_remaining() > 0 {
                    TaskStatus::Retrying
                } else {
                    TaskStatus::Failed
                };
                self.transition(&mut task, next, Some(error_record))?;
                if next != TaskStatus::Retrying {
                    report.failed += usize::from(next == TaskStatus::Failed);
                    continue;
                }
            }

            match self.readmit(id) {
                Readmit::Queued => report.requeued += 1,
                Readmit::Busy => {
                    report.deferred += 1;
                    self.schedule_readmit(id, self.readmit_interval);
                }
                Readmit::Gone => {}
            }
        }

        if report.requeued + report.deferred + report.failed > 0 {
            tracing::info!(
                "Recovered tasks: {} requeued, {} deferred, {} failed",
                report.requeued,
                report.deferred,
                report.failed
            );
        }
        Ok(report)
    }

    // ==================== Internals ====================

    /// Apply a transition: validate, persist, publish. Caller holds the task lock.
    fn transition(
        &self,
        task: &mut LiveTask,
        to: TaskStatus,
        error: Option<ErrorRecord>,
    ) -> Result<StatusEvent> {
        let record = &mut task.record;
        let from = record.status;
        check_transition(record.id, from, to)?;

        let now = Utc::now();
        record.status = to;
        record.updated_at = now;
        if to.is_terminal() {
            record.completed_at = Some(now);
        }

        let persisted = self.persist(record);
        let event = event_for(record, from, EventKind::Transition, error);
        self.notifier.publish(event.clone());

        if to.is_terminal() && persisted {
            self.records.remove(&record.id);
        }
        Ok(event)
    }

    /// Write a record through; failures are logged and the in-memory state wins
    fn persist(&self, record: &TaskRecord) -> bool {
        match self.store.save(record) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    "Failed to persist task {} ({}) to {}: {}",
                    record.id,
                    record.status,
                    self.store.name(),
                    e
                );
                false
            }
        }
    }
}

impl ProgressSink for StatusManager {
    fn report_progress(&self, task_id: TaskId, progress: Progress) {
        self.update_progress(task_id, progress);
    }
}

fn event_for(
    record: &TaskRecord,
    old_status: TaskStatus,
    kind: EventKind,
    error: Option<ErrorRecord>,
) -> StatusEvent {
    StatusEvent {
        task_id: record.id,
        scope: record.scope.clone(),
        kind,
        old_status,
        new_status: record.status,
        progress: record.progress.clone(),
        attempt_count: record.attempt_count,
        error,
        timestamp: record.updated_at,
    }
}
