//! Worker pool pulling from the shared task queue

use futures::future::join_all;
use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::WorkerConfig;
use crate::error::{ErrorKind, ProcessingError};
use crate::status::StatusManager;
use crate::strategy::{ProgressReporter, StrategyOutput, StrategyRegistry};
use crate::types::TaskId;

use super::queue::{QueueEntry, TaskQueue};

/// Everything a worker needs; shared by all workers
struct WorkerContext {
    queue: Arc<TaskQueue>,
    manager: Arc<StatusManager>,
    registry: Arc<StrategyRegistry>,
    config: WorkerConfig,
}

/// `W` symmetric workers; each loops take, claim, execute, report
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    queue: Arc<TaskQueue>,
}

impl WorkerPool {
    /// Spawn the workers on the current Tokio runtime
    pub fn start(
        manager: Arc<StatusManager>,
        registry: Arc<StrategyRegistry>,
        config: WorkerConfig,
    ) -> Self {
        let count = config.worker_count();
        let queue = manager.queue().clone();

        tracing::info!(
            "Worker pool configured: {} workers, {}s default timeout (tiered: {})",
            count,
            config.task_timeout_secs,
            config.tiered.enabled
        );

        let ctx = Arc::new(WorkerContext {
            queue: queue.clone(),
            manager,
            registry,
            config,
        });

        let handles = (0..count)
            .map(|worker_id| {
                let ctx = ctx.clone();
                tokio::spawn(async move { worker_loop(worker_id, ctx).await })
            })
            .collect();

        Self { handles, queue }
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Close the queue and wait for every worker to finish its current task
    pub async fn shutdown(self) {
        self.queue.close();
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                tracing::error!("Worker terminated abnormally: {}", e);
            }
        }
        tracing::info!("Worker pool stopped");
    }
}

async fn worker_loop(worker_id: usize, ctx: Arc<WorkerContext>) {
    tracing::debug!("Worker {} started", worker_id);

    while let Some(entry) = ctx.queue.take().await {
        run_entry(worker_id, &ctx, entry).await;
        ctx.queue.release();
    }

    tracing::debug!("Worker {} stopped", worker_id);
}

async fn run_entry(worker_id: usize, ctx: &WorkerContext, entry: QueueEntry) {
    let id = entry.task_id;
    let Some(claim) = ctx.manager.claim(id) else {
        // Cancelled between admission and claim
        return;
    };
    let record = claim.record;

    let Some(strategy) = ctx.registry.resolve(record.task_type) else {
        let error = ProcessingError::new(
            ErrorKind::NoStrategy,
            format!("no strategy registered for task type '{}'", record.task_type),
        );
        report(ctx, id, Err(error));
        return;
    };

    let limit = ctx
        .config
        .timeout_for(record.timeout_secs, record.subject.size_bytes);

    tracing::info!(
        "[worker {}] Processing task {} ({}, {}) attempt {}/{}: {} ({} bytes, waited {:?}, limit {:?})",
        worker_id,
        id,
        record.task_type,
        record.priority,
        record.attempt_count,
        record.max_attempts,
        record.subject.display_name(),
        record.subject.size_bytes,
        entry.enqueued_at.elapsed(),
        limit
    );

    let strategy_name = strategy.name().to_string();
    let reporter = ProgressReporter::new(id, ctx.manager.clone(), claim.cancel);
    let subject = record.subject.clone();
    let options = record.config.clone();

    // Own task so a panic or an abort cannot take the worker down
    let handle = tokio::spawn(async move { strategy.execute(&subject, &options, &reporter).await });
    let abort = handle.abort_handle();

    let start = Instant::now();
    let outcome = match timeout(limit, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) if join_error.is_panic() => {
            let message = panic_message(join_error.into_panic());
            tracing::error!(
                "[worker {}] Strategy '{}' panicked on task {}: {}",
                worker_id,
                strategy_name,
                id,
                message
            );
            Err(ProcessingError::internal(format!(
                "strategy '{}' panicked: {}",
                strategy_name, message
            )))
        }
        Ok(Err(join_error)) => Err(ProcessingError::internal(format!(
            "strategy '{}' did not finish: {}",
            strategy_name, join_error
        ))),
        Err(_) => {
            abort.abort();
            tracing::error!(
                "[worker {}] TIMEOUT: task {} exceeded {}s ({} bytes)",
                worker_id,
                id,
                limit.as_secs(),
                record.subject.size_bytes
            );
            Err(ProcessingError::timeout(format!(
                "execution exceeded the {}s limit",
                limit.as_secs()
            )))
        }
    };

    let elapsed = start.elapsed();
    if elapsed > Duration::from_secs(ctx.config.slow_task_warn_secs) {
        tracing::warn!(
            "[worker {}] Slow task {} ({}): {:?}",
            worker_id,
            id,
            record.subject.display_name(),
            elapsed
        );
    }

    report(ctx, id, outcome);
}

fn report(ctx: &WorkerContext, id: TaskId, outcome: Result<StrategyOutput, ProcessingError>) {
    let result = match outcome {
        Ok(output) => ctx.manager.complete(id, output),
        Err(error) => ctx.manager.fail(id, error),
    };
    if let Err(e) = result {
        tracing::error!("Could not record outcome of task {}: {}", id, e);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(42u8)), "unknown panic payload");
    }
}
