//! Task service facade
//!
//! Composes the queue, worker pool, status manager, retry classifier and
//! strategy registry. Constructed once at startup with its collaborators
//! injected, then shared by reference with whatever exposes it.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::TaskConfig;
use crate::error::{Error, Result};
use crate::processing::{QueueStats, RetryClassifier, TaskQueue, WorkerPool};
use crate::status::{Notifier, StatusManager, Subscription};
use crate::storage::TaskStore;
use crate::strategy::StrategyRegistry;
use crate::types::{
    CancelOutcome, ListQuery, Page, RecoveryReport, Scope, ScopeSummary, SubmitRequest,
    SystemAlert, TaskId, TaskRecord, TaskType,
};

/// Service-level counters
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub queue: QueueStats,
    pub workers: usize,
    /// Non-terminal tasks held in memory
    pub live_tasks: usize,
    /// Scopes with at least one subscriber channel
    pub subscribed_scopes: usize,
    pub task_types: Vec<TaskType>,
}

/// Asynchronous task-processing service
pub struct TaskService {
    config: TaskConfig,
    registry: Arc<StrategyRegistry>,
    manager: Arc<StatusManager>,
    pool: Mutex<Option<WorkerPool>>,
    worker_count: usize,
}

impl TaskService {
    /// Build the service and start its workers. Must run inside a Tokio runtime.
    pub fn new(
        config: TaskConfig,
        registry: StrategyRegistry,
        store: Arc<dyn TaskStore>,
    ) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(registry);
        let queue = Arc::new(TaskQueue::new(config.queue.capacity));
        let manager = StatusManager::new(
            store.clone(),
            queue,
            RetryClassifier::from_config(&config.retry),
            Notifier::new(
                config.notifications.channel_capacity,
                config.notifications.alert_capacity,
            ),
            config.retry.readmit_interval(),
        );
        let pool = WorkerPool::start(manager.clone(), registry.clone(), config.workers.clone());
        let worker_count = pool.worker_count();

        tracing::info!(
            "Task service started: {} workers, queue capacity {}, store '{}', task types {:?}",
            worker_count,
            config.queue.capacity,
            store.name(),
            registry.task_types()
        );

        Ok(Self {
            config,
            registry,
            manager,
            pool: Mutex::new(Some(pool)),
            worker_count,
        })
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    /// Validate and enqueue a task
    ///
    /// Fails with `Validation` for malformed requests and `CapacityExceeded`
    /// when the queue is full; neither produces a task record.
    pub fn submit(&self, request: SubmitRequest) -> Result<TaskId> {
        self.validate(&request)?;

        let max_attempts = request
            .max_attempts
            .unwrap_or(self.config.retry.default_max_attempts);
        let mut record = TaskRecord::new(
            request.task_type,
            request.scope,
            request.subject,
            request.priority.unwrap_or_default(),
            request.config,
            max_attempts,
        );
        record.timeout_secs = request.timeout_secs;

        let summary = format!(
            "{} ({}, {}) for {} in scope '{}'",
            record.id,
            record.task_type,
            record.priority,
            record.subject.display_name(),
            record.scope
        );

        match self.manager.admit(record) {
            Ok(id) => {
                tracing::info!("Submitted task {}", summary);
                Ok(id)
            }
            Err(e) => {
                if e.is_capacity_exceeded() {
                    tracing::warn!("Rejected task {}: {}", summary, e);
                }
                Err(e)
            }
        }
    }

    fn validate(&self, request: &SubmitRequest) -> Result<()> {
        if !self.registry.contains(request.task_type) {
            return Err(Error::validation(format!(
                "no strategy registered for task type '{}'",
                request.task_type
            )));
        }
        if request.scope.is_empty() {
            return Err(Error::validation("scope must not be empty"));
        }
        if request.subject.file_id.trim().is_empty() || request.subject.locator.trim().is_empty() {
            return Err(Error::validation("subject requires a file id and a locator"));
        }
        if request.max_attempts == Some(0) {
            return Err(Error::validation("max_attempts must be at least 1"));
        }
        if request.timeout_secs == Some(0) {
            return Err(Error::validation("timeout_secs must be positive"));
        }
        Ok(())
    }

    /// Full snapshot of a task
    pub fn get(&self, id: TaskId) -> Result<TaskRecord> {
        self.manager.get(id)
    }

    /// Page through a scope's tasks, oldest first
    pub fn list(&self, query: &ListQuery) -> Result<Page<TaskRecord>> {
        self.manager.list(query)
    }

    /// Live status events for a scope
    pub fn subscribe(&self, scope: impl Into<Scope>) -> Subscription {
        self.manager.subscribe(&scope.into())
    }

    /// Counts per status and average completion time for a scope
    pub fn summary(&self, scope: impl Into<Scope>) -> Result<ScopeSummary> {
        self.manager.summary(&scope.into())
    }

    pub fn cancel(&self, id: TaskId) -> Result<CancelOutcome> {
        self.manager.cancel(id)
    }

    /// Cancel every active task in a scope
    pub fn cancel_scope(&self, scope: impl Into<Scope>) -> usize {
        let scope = scope.into();
        let cancelled = self.manager.cancel_scope(&scope);
        tracing::info!("Cancelled {} task(s) in scope '{}'", cancelled, scope);
        cancelled
    }

    /// System alerts (escalated failures)
    pub fn alerts(&self) -> broadcast::Receiver<SystemAlert> {
        self.manager.notifier().subscribe_alerts()
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            queue: self.manager.queue().stats(),
            workers: self.worker_count,
            live_tasks: self.manager.live_count(),
            subscribed_scopes: self.manager.notifier().active_scopes(),
            task_types: self.registry.task_types(),
        }
    }

    /// Resume tasks left active by a previous run
    pub fn recover(&self) -> Result<RecoveryReport> {
        self.manager
            .recover(self.config.recovery.requeue_interrupted)
    }

    /// Stop accepting work and wait for running tasks to finish
    pub async fn shutdown(&self) {
        let pool = self.pool.lock().take();
        if let Some(pool) = pool {
            tracing::info!("Shutting down task service");
            pool.shutdown().await;
        }
    }
}
