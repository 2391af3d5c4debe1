//! Processing strategies and their registry
//!
//! A strategy performs the actual work for one task type. Strategies are
//! stateless across invocations, report progress at coarse milestones and
//! check for cancellation between milestones through the [`ProgressReporter`].

pub mod analysis;
pub mod chunker;
pub mod embedding;
pub mod parsing;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::ProcessingError;
use crate::types::{Progress, Subject, TaskId, TaskOptions, TaskType};

pub use analysis::AnalysisStrategy;
pub use chunker::{TextChunk, TextChunker};
pub use embedding::EmbeddingStrategy;
pub use parsing::ParsingStrategy;

/// What a successful invocation hands back
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyOutput {
    /// Display summary stored on the task record
    pub summary: serde_json::Value,
}

impl StrategyOutput {
    pub fn new(summary: serde_json::Value) -> Self {
        Self { summary }
    }
}

/// Handler for one task type
#[async_trait]
pub trait ProcessingStrategy: Send + Sync {
    /// Strategy name for logging
    fn name(&self) -> &str;

    /// Process a subject. Progress and cancellation go through `progress`.
    async fn execute(
        &self,
        subject: &Subject,
        config: &TaskOptions,
        progress: &ProgressReporter,
    ) -> Result<StrategyOutput, ProcessingError>;
}

/// Receives progress reports on behalf of the status manager
pub trait ProgressSink: Send + Sync {
    fn report_progress(&self, task_id: TaskId, progress: Progress);
}

struct DiscardProgress;

impl ProgressSink for DiscardProgress {
    fn report_progress(&self, _task_id: TaskId, _progress: Progress) {}
}

/// Handle a strategy uses to report milestones and observe cancellation
#[derive(Clone)]
pub struct ProgressReporter {
    task_id: TaskId,
    sink: Arc<dyn ProgressSink>,
    cancel: Arc<AtomicBool>,
}

impl ProgressReporter {
    pub fn new(task_id: TaskId, sink: Arc<dyn ProgressSink>, cancel: Arc<AtomicBool>) -> Self {
        Self {
            task_id,
            sink,
            cancel,
        }
    }

    /// A reporter that goes nowhere, for running a strategy outside the pool
    pub fn detached() -> Self {
        Self::new(
            TaskId::new(),
            Arc::new(DiscardProgress),
            Arc::new(AtomicBool::new(false)),
        )
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Report a milestone. Doubles as a checkpoint: fails with a cancelled
    /// error once cancellation has been requested.
    pub fn report(
        &self,
        percentage: u8,
        operation: impl Into<String>,
    ) -> Result<(), ProcessingError> {
        self.checkpoint()?;
        self.sink
            .report_progress(self.task_id, Progress::new(percentage, operation));
        Ok(())
    }

    /// Fail with a cancelled error if cancellation has been requested
    pub fn checkpoint(&self) -> Result<(), ProcessingError> {
        if self.is_cancelled() {
            return Err(ProcessingError::cancelled());
        }
        Ok(())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

/// Closed mapping from task type to strategy, built at startup
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: HashMap<TaskType, Arc<dyn ProcessingStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the strategy for a task type
    pub fn register(&mut self, task_type: TaskType, strategy: Arc<dyn ProcessingStrategy>) {
        tracing::debug!("Registered strategy '{}' for {}", strategy.name(), task_type);
        self.strategies.insert(task_type, strategy);
    }

    pub fn with(mut self, task_type: TaskType, strategy: Arc<dyn ProcessingStrategy>) -> Self {
        self.register(task_type, strategy);
        self
    }

    pub fn resolve(&self, task_type: TaskType) -> Option<Arc<dyn ProcessingStrategy>> {
        self.strategies.get(&task_type).cloned()
    }

    pub fn contains(&self, task_type: TaskType) -> bool {
        self.strategies.contains_key(&task_type)
    }

    /// Registered task types, in declaration order
    pub fn task_types(&self) -> Vec<TaskType> {
        TaskType::ALL
            .into_iter()
            .filter(|t| self.strategies.contains_key(t))
            .collect()
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("task_types", &self.task_types())
            .finish()
    }
}

/// Read an integer option from task config
pub(crate) fn option_usize(config: &TaskOptions, key: &str) -> Option<usize> {
    config
        .get(key)
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
}


#[cfg(test)]
mod tests {
    use super::testing::reporter;
    use super::*;

    struct Noop;

    #[async_trait]
    impl ProcessingStrategy for Noop {
        fn name(&self) -> &str {
            "noop"
        }

        async fn execute(
            &self,
            _subject: &Subject,
            _config: &TaskOptions,
            progress: &ProgressReporter,
        ) -> Result<StrategyOutput, ProcessingError> {
            progress.report(100, "done")?;
            Ok(StrategyOutput::default())
        }
    }

    #[test]
    fn test_registry_resolve() {
        let registry = StrategyRegistry::new().with(TaskType::Parsing, Arc::new(Noop));
        assert!(registry.resolve(TaskType::Parsing).is_some());
        assert!(registry.resolve(TaskType::Ocr).is_none());
        assert_eq!(registry.task_types(), vec![TaskType::Parsing]);
    }

    #[test]
    fn test_reporter_checkpoint_after_cancel() {
        let (reporter, sink, cancel) = reporter();
        reporter.report(10, "validate").unwrap();

        cancel.store(true, Ordering::Release);
        let err = reporter.report(50, "extract").unwrap_err();
        assert!(err.is_cancelled());
        assert!(reporter.checkpoint().is_err());
        assert_eq!(sink.reports.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_detached_reporter() {
        let subject = Subject::new("f", "/tmp/f", 0, "text/plain");
        let out = Noop
            .execute(&subject, &TaskOptions::new(), &ProgressReporter::detached())
            .await
            .unwrap();
        assert_eq!(out, StrategyOutput::default());
    }
}
