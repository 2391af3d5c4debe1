//! End-to-end behavior of the task service with scripted strategies

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use ruvector_tasks::storage::{MemoryTaskStore, SqliteTaskStore};
use ruvector_tasks::{
    CancelOutcome, Error, ErrorCategory, EventKind, ListQuery, ProcessingError,
    ProcessingStrategy, ProgressReporter, StatusEvent, StrategyOutput, StrategyRegistry, Subject,
    SubmitRequest, Subscription, TaskConfig, TaskId, TaskPriority, TaskService, TaskStatus,
    TaskStore, TaskType,
};

const WAIT: Duration = Duration::from_secs(10);

// ==================== Scripted strategies ====================

/// Reports 30/70/100 and records the order subjects were processed in
#[derive(Default)]
struct StepStrategy {
    order: Mutex<Vec<String>>,
}

#[async_trait]
impl ProcessingStrategy for StepStrategy {
    fn name(&self) -> &str {
        "steps"
    }

    async fn execute(
        &self,
        subject: &Subject,
        _config: &ruvector_tasks::types::TaskOptions,
        progress: &ProgressReporter,
    ) -> Result<StrategyOutput, ProcessingError> {
        self.order.lock().push(subject.file_id.clone());
        for (pct, op) in [(30, "extract"), (70, "embed"), (100, "store")] {
            tokio::time::sleep(Duration::from_millis(5)).await;
            progress.report(pct, op)?;
        }
        Ok(StrategyOutput::new(serde_json::json!({ "file": subject.file_id })))
    }
}

/// Always fails with the same error
struct FailingStrategy {
    error: ProcessingError,
    calls: AtomicUsize,
}

impl FailingStrategy {
    fn new(error: ProcessingError) -> Self {
        Self {
            error,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ProcessingStrategy for FailingStrategy {
    fn name(&self) -> &str {
        "failing"
    }

    async fn execute(
        &self,
        _subject: &Subject,
        _config: &ruvector_tasks::types::TaskOptions,
        _progress: &ProgressReporter,
    ) -> Result<StrategyOutput, ProcessingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

/// Holds each invocation until a permit is released, checking for cancellation
struct GatedStrategy {
    gate: Semaphore,
    started: AtomicUsize,
}

impl GatedStrategy {
    fn new() -> Self {
        Self {
            gate: Semaphore::new(0),
            started: AtomicUsize::new(0),
        }
    }

    fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }
}

#[async_trait]
impl ProcessingStrategy for GatedStrategy {
    fn name(&self) -> &str {
        "gated"
    }

    async fn execute(
        &self,
        _subject: &Subject,
        _config: &ruvector_tasks::types::TaskOptions,
        progress: &ProgressReporter,
    ) -> Result<StrategyOutput, ProcessingError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        loop {
            progress.checkpoint()?;
            if let Ok(permit) = self.gate.try_acquire() {
                permit.forget();
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        progress.report(100, "released")?;
        Ok(StrategyOutput::default())
    }
}

struct PanickingStrategy;

#[async_trait]
impl ProcessingStrategy for PanickingStrategy {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn execute(
        &self,
        _subject: &Subject,
        _config: &ruvector_tasks::types::TaskOptions,
        _progress: &ProgressReporter,
    ) -> Result<StrategyOutput, ProcessingError> {
        panic!("strategy blew up");
    }
}

/// Fails every third call and tracks which task ids are executing at once
#[derive(Default)]
struct ContendedStrategy {
    calls: AtomicUsize,
    running: Mutex<std::collections::HashSet<TaskId>>,
    duplicates: Mutex<Vec<TaskId>>,
    peak: AtomicUsize,
}

#[async_trait]
impl ProcessingStrategy for ContendedStrategy {
    fn name(&self) -> &str {
        "contended"
    }

    async fn execute(
        &self,
        _subject: &Subject,
        _config: &ruvector_tasks::types::TaskOptions,
        progress: &ProgressReporter,
    ) -> Result<StrategyOutput, ProcessingError> {
        let id = progress.task_id();
        {
            let mut running = self.running.lock();
            if !running.insert(id) {
                self.duplicates.lock().push(id);
            }
            self.peak.fetch_max(running.len(), Ordering::SeqCst);
        }

        tokio::time::sleep(Duration::from_millis(5)).await;
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.running.lock().remove(&id);

        if call % 3 == 0 {
            return Err(ProcessingError::network("connection reset"));
        }
        progress.report(100, "done")?;
        Ok(StrategyOutput::default())
    }
}

struct SleepyStrategy;

#[async_trait]
impl ProcessingStrategy for SleepyStrategy {
    fn name(&self) -> &str {
        "sleepy"
    }

    async fn execute(
        &self,
        _subject: &Subject,
        _config: &ruvector_tasks::types::TaskOptions,
        _progress: &ProgressReporter,
    ) -> Result<StrategyOutput, ProcessingError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(StrategyOutput::default())
    }
}

// ==================== Helpers ====================

fn config(workers: usize, capacity: usize) -> TaskConfig {
    let mut config = TaskConfig::default();
    config.workers.count = Some(workers);
    config.queue.capacity = capacity;
    config.retry.base_delay_ms = 100;
    config.retry.max_delay_ms = 1000;
    config.retry.readmit_interval_ms = 10;
    config
}

fn service_with(
    config: TaskConfig,
    task_type: TaskType,
    strategy: Arc<dyn ProcessingStrategy>,
) -> TaskService {
    let registry = StrategyRegistry::new().with(task_type, strategy);
    TaskService::new(config, registry, Arc::new(MemoryTaskStore::new())).unwrap()
}

fn request(name: &str, scope: &str) -> SubmitRequest {
    SubmitRequest::new(
        TaskType::Embedding,
        Subject::new(name, format!("/uploads/{}.txt", name), 1024, "text/plain"),
        scope,
    )
}

async fn next_event(events: &mut Subscription) -> StatusEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("subscription closed")
}

/// Collect events until `id` reaches a terminal status
async fn events_until_terminal(events: &mut Subscription, id: TaskId) -> Vec<StatusEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(events).await;
        let done = event.task_id == id && event.new_status.is_terminal();
        seen.push(event);
        if done {
            return seen;
        }
    }
}

async fn wait_for_status(service: &TaskService, id: TaskId, status: TaskStatus) {
    tokio::time::timeout(WAIT, async {
        while service.get(id).unwrap().status != status {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("status never reached");
}

// ==================== Scenarios ====================

#[tokio::test]
async fn test_tasks_complete_in_submission_order_with_progress() {
    let strategy = Arc::new(StepStrategy::default());
    let service = service_with(config(1, 16), TaskType::Embedding, strategy.clone());
    let mut events = service.subscribe("topic-a");

    let ids: Vec<TaskId> = ["a", "b", "c"]
        .iter()
        .map(|name| service.submit(request(name, "topic-a")).unwrap())
        .collect();

    let mut seen = Vec::new();
    for id in &ids {
        seen.extend(events_until_terminal(&mut events, *id).await);
    }

    for id in &ids {
        let progress: Vec<u8> = seen
            .iter()
            .filter(|e| e.task_id == *id && e.kind == EventKind::Progress)
            .map(|e| e.progress.percentage)
            .collect();
        assert_eq!(progress, vec![30, 70, 100]);
        assert!(progress.windows(2).all(|w| w[0] < w[1]));
    }

    let second = ids[1];
    let transitions: Vec<TaskStatus> = seen
        .iter()
        .filter(|e| e.task_id == second && e.kind == EventKind::Transition)
        .map(|e| e.new_status)
        .collect();
    assert_eq!(
        transitions,
        vec![TaskStatus::Queued, TaskStatus::Processing, TaskStatus::Completed]
    );

    assert_eq!(*strategy.order.lock(), vec!["a", "b", "c"]);

    let done = service.get(second).unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.progress.percentage, 100);
    assert_eq!(done.attempt_count, 1);
    assert_eq!(done.result.unwrap()["file"], "b");

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_workers_never_share_a_task_under_retries() {
    let strategy = Arc::new(ContendedStrategy::default());
    let service = service_with(config(4, 64), TaskType::Embedding, strategy.clone());

    let ids: Vec<TaskId> = (0..40)
        .map(|i| {
            service
                .submit(request(&format!("doc-{}", i), "topic-a").with_max_attempts(3))
                .unwrap()
        })
        .collect();

    tokio::time::timeout(WAIT, async {
        while !ids
            .iter()
            .all(|id| service.get(*id).unwrap().status.is_terminal())
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("tasks never finished");

    assert!(strategy.duplicates.lock().is_empty());
    assert!(strategy.peak.load(Ordering::SeqCst) > 1);

    let mut attempts = 0;
    for id in &ids {
        let task = service.get(*id).unwrap();
        assert!(task.attempt_count >= 1 && task.attempt_count <= task.max_attempts);
        assert!(matches!(task.status, TaskStatus::Completed | TaskStatus::Failed));
        let failed_attempts = match task.status {
            TaskStatus::Completed => task.attempt_count - 1,
            _ => task.attempt_count,
        };
        assert_eq!(task.error_history.len(), failed_attempts as usize);
        attempts += task.attempt_count as usize;
    }
    // Every execution was one attempt of one task
    assert_eq!(attempts, strategy.calls.load(Ordering::SeqCst));
    assert!(strategy.calls.load(Ordering::SeqCst) > ids.len());

    service.shutdown().await;
}

#[tokio::test]
async fn test_transient_failure_retries_until_attempts_exhausted() {
    let strategy = Arc::new(FailingStrategy::new(ProcessingError::network(
        "connection timeout",
    )));
    let service = service_with(config(1, 16), TaskType::Embedding, strategy.clone());
    let mut events = service.subscribe("topic-a");

    let id = service
        .submit(request("flaky", "topic-a").with_max_attempts(3))
        .unwrap();
    let seen = events_until_terminal(&mut events, id).await;

    let retrying = seen
        .iter()
        .filter(|e| e.new_status == TaskStatus::Retrying)
        .count();
    assert_eq!(retrying, 2);
    assert_eq!(strategy.calls.load(Ordering::SeqCst), 3);

    let task = service.get(id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.attempt_count, 3);
    assert_eq!(task.error_history.len(), 3);
    let last = task.last_error().unwrap();
    assert_eq!(last.classification, ErrorCategory::Transient);
    assert_eq!(last.attempt_number, 3);
    assert!(last.message.contains("connection timeout"));

    // The failing transition carries the error that caused it
    let failed = seen.last().unwrap();
    assert_eq!(failed.new_status, TaskStatus::Failed);
    assert_eq!(failed.error.as_ref().unwrap().attempt_number, 3);

    service.shutdown().await;
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let strategy = Arc::new(FailingStrategy::new(ProcessingError::unsupported(
        "unsupported file format",
    )));
    let service = service_with(config(1, 16), TaskType::Embedding, strategy.clone());
    let mut events = service.subscribe("topic-a");

    let id = service.submit(request("scan.bin", "topic-a")).unwrap();
    let seen = events_until_terminal(&mut events, id).await;
    assert!(seen.iter().all(|e| e.new_status != TaskStatus::Retrying));

    let task = service.get(id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_history.len(), 1);
    assert_eq!(task.error_history[0].classification, ErrorCategory::Permanent);
    assert_eq!(strategy.calls.load(Ordering::SeqCst), 1);

    service.shutdown().await;
}

#[tokio::test]
async fn test_capacity_rejection_creates_no_record() {
    let strategy = Arc::new(GatedStrategy::new());
    let service = service_with(config(1, 2), TaskType::Embedding, strategy.clone());

    let first = service.submit(request("a", "topic-a")).unwrap();
    let second = service.submit(request("b", "topic-a")).unwrap();
    let before = service.stats().queue;

    let err = service.submit(request("c", "topic-a")).unwrap_err();
    assert!(matches!(err, Error::CapacityExceeded { capacity: 2 }));

    let after = service.stats().queue;
    assert_eq!(before.depth + before.in_flight, after.depth + after.in_flight);
    assert_eq!(service.list(&ListQuery::scope("topic-a")).unwrap().total, 2);

    strategy.release(2);
    wait_for_status(&service, first, TaskStatus::Completed).await;
    wait_for_status(&service, second, TaskStatus::Completed).await;
    tokio::time::timeout(WAIT, async {
        while service.stats().queue.in_flight > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("worker never released its slot");

    // Room again once work drains
    assert!(service.submit(request("c", "topic-a")).is_ok());
    strategy.release(1);

    service.shutdown().await;
}

#[tokio::test]
async fn test_cancel_queued_task_never_processes() {
    let strategy = Arc::new(GatedStrategy::new());
    let service = service_with(config(1, 16), TaskType::Embedding, strategy.clone());
    let mut events = service.subscribe("topic-a");

    let blocker = service.submit(request("blocker", "topic-a")).unwrap();
    wait_for_status(&service, blocker, TaskStatus::Processing).await;

    let waiting = service.submit(request("waiting", "topic-a")).unwrap();
    assert_eq!(service.cancel(waiting).unwrap(), CancelOutcome::Cancelled);

    strategy.release(1);
    wait_for_status(&service, blocker, TaskStatus::Completed).await;

    let seen = events_until_terminal(&mut events, blocker).await;
    assert!(seen
        .iter()
        .filter(|e| e.task_id == waiting)
        .all(|e| e.new_status != TaskStatus::Processing));
    assert_eq!(strategy.started.load(Ordering::SeqCst), 1);

    let cancelled = service.get(waiting).unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert_eq!(cancelled.attempt_count, 0);
    assert!(matches!(
        service.cancel(waiting),
        Err(Error::InvalidTransition { .. })
    ));

    service.shutdown().await;
}

// ==================== Contract ====================

#[tokio::test]
async fn test_cancel_processing_task_at_checkpoint() {
    let strategy = Arc::new(GatedStrategy::new());
    let service = service_with(config(1, 16), TaskType::Embedding, strategy.clone());

    let id = service.submit(request("long", "topic-a")).unwrap();
    wait_for_status(&service, id, TaskStatus::Processing).await;

    assert_eq!(
        service.cancel(id).unwrap(),
        CancelOutcome::CancellationRequested
    );
    wait_for_status(&service, id, TaskStatus::Cancelled).await;

    let task = service.get(id).unwrap();
    assert!(task.cancel_requested);
    assert!(task.completed_at.is_some());

    service.shutdown().await;
}

#[tokio::test]
async fn test_submit_validation() {
    let service = service_with(
        config(1, 16),
        TaskType::Embedding,
        Arc::new(StepStrategy::default()),
    );

    let unregistered = SubmitRequest::new(
        TaskType::Ocr,
        Subject::new("img", "/uploads/img.png", 10, "image/png"),
        "topic-a",
    );
    assert!(matches!(
        service.submit(unregistered),
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        service.submit(request("a", "  ")),
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        service.submit(request("a", "topic-a").with_max_attempts(0)),
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        service.submit(request("a", "topic-a").with_timeout_secs(0)),
        Err(Error::Validation(_))
    ));

    let no_locator = SubmitRequest::new(
        TaskType::Embedding,
        Subject::new("a", "", 10, "text/plain"),
        "topic-a",
    );
    assert!(matches!(
        service.submit(no_locator),
        Err(Error::Validation(_))
    ));

    assert_eq!(service.list(&ListQuery::scope("topic-a")).unwrap().total, 0);
    service.shutdown().await;
}

#[tokio::test]
async fn test_panicking_strategy_does_not_kill_worker() {
    let registry = StrategyRegistry::new()
        .with(TaskType::Analysis, Arc::new(PanickingStrategy))
        .with(TaskType::Embedding, Arc::new(StepStrategy::default()));
    let service =
        TaskService::new(config(1, 16), registry, Arc::new(MemoryTaskStore::new())).unwrap();

    let broken = service
        .submit(
            SubmitRequest::new(
                TaskType::Analysis,
                Subject::new("x", "/uploads/x.txt", 10, "text/plain"),
                "topic-a",
            )
            .with_max_attempts(1),
        )
        .unwrap();
    wait_for_status(&service, broken, TaskStatus::Failed).await;
    let task = service.get(broken).unwrap();
    assert!(task.error_history[0].message.contains("panicked"));

    // The single worker is still alive
    let healthy = service.submit(request("after", "topic-a")).unwrap();
    wait_for_status(&service, healthy, TaskStatus::Completed).await;

    service.shutdown().await;
}

#[tokio::test]
async fn test_execution_timeout_is_classified() {
    let service = service_with(config(1, 16), TaskType::Embedding, Arc::new(SleepyStrategy));

    let id = service
        .submit(
            request("huge", "topic-a")
                .with_timeout_secs(1)
                .with_max_attempts(1),
        )
        .unwrap();
    wait_for_status(&service, id, TaskStatus::Failed).await;

    let task = service.get(id).unwrap();
    assert_eq!(task.error_history.len(), 1);
    assert_eq!(task.error_history[0].classification, ErrorCategory::Timeout);

    service.shutdown().await;
}

#[tokio::test]
async fn test_priority_orders_waiting_tasks() {
    let gate = Arc::new(GatedStrategy::new());
    let steps = Arc::new(StepStrategy::default());
    let registry = StrategyRegistry::new()
        .with(TaskType::Parsing, gate.clone())
        .with(TaskType::Embedding, steps.clone());
    let service =
        TaskService::new(config(1, 16), registry, Arc::new(MemoryTaskStore::new())).unwrap();

    let blocker = service
        .submit(SubmitRequest::new(
            TaskType::Parsing,
            Subject::new("blocker", "/uploads/blocker.txt", 10, "text/plain"),
            "topic-a",
        ))
        .unwrap();
    wait_for_status(&service, blocker, TaskStatus::Processing).await;

    let low = service
        .submit(request("low", "topic-a").with_priority(TaskPriority::Low))
        .unwrap();
    service.submit(request("normal", "topic-a")).unwrap();
    service
        .submit(request("urgent", "topic-a").with_priority(TaskPriority::Urgent))
        .unwrap();

    gate.release(1);
    wait_for_status(&service, low, TaskStatus::Completed).await;

    assert_eq!(
        *steps.order.lock(),
        vec!["urgent".to_string(), "normal".to_string(), "low".to_string()]
    );
    service.shutdown().await;
}

#[tokio::test]
async fn test_subscriptions_are_scoped_and_queries_consistent() {
    let service = service_with(
        config(2, 16),
        TaskType::Embedding,
        Arc::new(StepStrategy::default()),
    );
    let mut a_events = service.subscribe("topic-a");
    let mut b_events = service.subscribe("topic-b");

    let a = service.submit(request("a", "topic-a")).unwrap();
    let b = service.submit(request("b", "topic-b")).unwrap();

    for event in events_until_terminal(&mut a_events, a).await {
        assert_eq!(event.task_id, a);
        // A query after an event never shows an older state
        if event.kind == EventKind::Transition && event.new_status.is_terminal() {
            assert_eq!(service.get(a).unwrap().status, event.new_status);
        }
    }
    for event in events_until_terminal(&mut b_events, b).await {
        assert_eq!(event.task_id, b);
    }

    let summary = service.summary("topic-a").unwrap();
    assert_eq!(summary.total, 1);
    assert_eq!(summary.count(TaskStatus::Completed), 1);

    let page = service
        .list(&ListQuery::scope("topic-b").with_status(TaskStatus::Completed))
        .unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].id, b);

    service.shutdown().await;
}

#[tokio::test]
async fn test_cancel_scope() {
    let strategy = Arc::new(GatedStrategy::new());
    let service = service_with(config(1, 16), TaskType::Embedding, strategy.clone());

    let running = service.submit(request("a", "topic-a")).unwrap();
    wait_for_status(&service, running, TaskStatus::Processing).await;
    let queued = service.submit(request("b", "topic-a")).unwrap();
    let other = service.submit(request("c", "topic-b")).unwrap();

    assert_eq!(service.cancel_scope("topic-a"), 2);
    wait_for_status(&service, running, TaskStatus::Cancelled).await;
    assert_eq!(service.get(queued).unwrap().status, TaskStatus::Cancelled);

    strategy.release(1);
    wait_for_status(&service, other, TaskStatus::Completed).await;
    service.shutdown().await;
}

#[tokio::test]
async fn test_recovery_from_sqlite_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.db");

    let interrupted = {
        let store = SqliteTaskStore::new(&path).unwrap();
        let mut record = ruvector_tasks::TaskRecord::new(
            TaskType::Embedding,
            "topic-a".into(),
            Subject::new("a", "/uploads/a.txt", 10, "text/plain"),
            TaskPriority::Normal,
            Default::default(),
            3,
        );
        record.status = TaskStatus::Processing;
        record.attempt_count = 1;
        store.save(&record).unwrap();
        record.id
    };

    let store: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::new(&path).unwrap());
    let registry = StrategyRegistry::new().with(TaskType::Embedding, Arc::new(StepStrategy::default()));
    let service = TaskService::new(config(1, 16), registry, store).unwrap();

    let report = service.recover().unwrap();
    assert_eq!(report.requeued, 1);

    wait_for_status(&service, interrupted, TaskStatus::Completed).await;
    let task = service.get(interrupted).unwrap();
    assert_eq!(task.attempt_count, 2);
    assert_eq!(task.error_history.len(), 1);
    assert_eq!(task.error_history[0].classification, ErrorCategory::Transient);

    service.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_rejects_new_work() {
    let service = service_with(
        config(1, 16),
        TaskType::Embedding,
        Arc::new(StepStrategy::default()),
    );
    service.shutdown().await;

    assert!(service.submit(request("late", "topic-a")).is_err());
    assert!(service.list(&ListQuery::scope("topic-a")).unwrap().items.is_empty());
}
