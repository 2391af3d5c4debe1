//! Task worker binary
//!
//! Submits one task per file, prints live status events for the scope until
//! every submitted task is finished, then prints the scope summary.
//!
//! Run with: cargo run -p ruvector-tasks --bin ruvector-tasks-worker -- --scope docs ./notes/*.md

use anyhow::Context;
use clap::Parser;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ruvector_tasks::providers::{
    EmbeddingProvider, FsContentExtractor, MemoryContentSink, OllamaEmbedder,
};
use ruvector_tasks::strategy::{AnalysisStrategy, EmbeddingStrategy, ParsingStrategy};
use ruvector_tasks::{
    open_store, EventKind, StatusEvent, StrategyRegistry, Subject, SubmitRequest, TaskConfig,
    TaskId, TaskPriority, TaskService, TaskType,
};

#[derive(Parser)]
#[command(name = "ruvector-tasks-worker")]
#[command(about = "Process files through the task queue")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Scope the tasks are grouped under
    #[arg(short, long, default_value = "default")]
    scope: String,

    /// Task type (embedding, parsing, analysis)
    #[arg(short, long, default_value = "embedding")]
    task_type: TaskType,

    /// Priority (low, normal, high, urgent)
    #[arg(short, long, default_value = "normal")]
    priority: TaskPriority,

    /// Files to process
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ruvector_tasks=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => TaskConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => TaskConfig::default(),
    };

    tracing::info!("Configuration loaded");
    tracing::info!("  - Queue capacity: {}", config.queue.capacity);
    tracing::info!("  - Workers: {}", config.workers.worker_count());
    tracing::info!("  - Storage: {:?}", config.storage.backend);
    tracing::info!("  - Embedding model: {}", config.embedding.model);

    let extractor = Arc::new(FsContentExtractor::default());
    let sink = Arc::new(MemoryContentSink::new());
    let embedder = Arc::new(OllamaEmbedder::new(&config.embedding)?);

    if cli.task_type == TaskType::Embedding && !embedder.health_check().await {
        tracing::warn!("Ollama not available at {}", config.embedding.base_url);
        tracing::warn!("  Start it with: ollama serve");
        tracing::warn!("  Pull the model: ollama pull {}", config.embedding.model);
    }

    let registry = StrategyRegistry::new()
        .with(
            TaskType::Embedding,
            Arc::new(EmbeddingStrategy::new(
                extractor.clone(),
                embedder,
                sink.clone(),
                config.chunking.clone(),
            )),
        )
        .with(
            TaskType::Parsing,
            Arc::new(ParsingStrategy::new(extractor.clone(), sink.clone())),
        )
        .with(TaskType::Analysis, Arc::new(AnalysisStrategy::new(extractor)));

    let store = open_store(&config.storage)?;
    let service = TaskService::new(config, registry, store)?;

    let recovered = service.recover()?;
    if recovered.requeued + recovered.deferred > 0 {
        tracing::info!(
            "Resumed {} task(s) from a previous run ({} waiting for queue space)",
            recovered.requeued + recovered.deferred,
            recovered.deferred
        );
    }

    // Subscribe before submitting so no transition is missed
    let mut events = service.subscribe(cli.scope.as_str());
    let mut pending = HashSet::new();

    for path in &cli.files {
        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) => {
                tracing::error!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };
        let locator = path.to_string_lossy().to_string();
        let subject = Subject::new(
            locator.clone(),
            locator,
            metadata.len(),
            FsContentExtractor::content_type_for(path),
        );
        let request = SubmitRequest::new(cli.task_type, subject, cli.scope.as_str())
            .with_priority(cli.priority);

        match service.submit(request) {
            Ok(id) => {
                pending.insert(id);
            }
            Err(e) => tracing::error!("Could not submit {}: {}", path.display(), e),
        }
    }

    println!("\nSubmitted {} task(s) to scope '{}'\n", pending.len(), cli.scope);

    // Terminal events skipped by a lagging subscriber are recovered by
    // querying the service directly
    let mut sweep = tokio::time::interval(Duration::from_secs(1));
    let mut lagged = events.lagged();

    while !pending.is_empty() {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                if events.lagged() > lagged {
                    lagged = events.lagged();
                    drop_finished(&service, &mut pending);
                }
                if !pending.contains(&event.task_id) {
                    continue;
                }

                print_event(&event);
                if event.new_status.is_terminal() {
                    pending.remove(&event.task_id);
                }
            }
            _ = sweep.tick() => drop_finished(&service, &mut pending),
        }
    }

    let summary = service.summary(cli.scope.as_str())?;
    println!("\nScope '{}': {} task(s)", summary.scope, summary.total);
    for (status, count) in summary.counts.iter().filter(|(_, c)| **c > 0) {
        println!("  {:<11} {}", status, count);
    }
    if let Some(avg) = summary.avg_completion_ms {
        println!("  average completion: {:.0}ms", avg);
    }
    println!("  chunks stored: {}", sink.chunk_count());

    service.shutdown().await;
    Ok(())
}

fn print_event(event: &StatusEvent) {
    match event.kind {
        EventKind::Progress => println!(
            "  {} {:>3}% {}",
            event.task_id, event.progress.percentage, event.progress.current_operation
        ),
        EventKind::Transition => {
            let detail = event
                .error
                .as_ref()
                .map(|e| format!(" ({}: {})", e.classification, e.message))
                .unwrap_or_default();
            println!(
                "  {} {} -> {}{}",
                event.task_id, event.old_status, event.new_status, detail
            );
        }
    }
}

/// Forget pending tasks that already reached a terminal state
fn drop_finished(service: &TaskService, pending: &mut HashSet<TaskId>) {
    pending.retain(|id| match service.get(*id) {
        Ok(record) if record.status.is_terminal() => {
            println!("  {} finished as {}", id, record.status);
            false
        }
        Ok(_) => true,
        Err(e) => {
            tracing::warn!("Could not query task {}: {}", id, e);
            false
        }
    });
}
