//! Configuration for the task-processing core

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::processing::{RetryRule, SubjectTier};

/// Main task service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Queue configuration
    pub queue: QueueConfig,
    /// Worker pool configuration
    pub workers: WorkerConfig,
    /// Retry classifier configuration
    pub retry: RetryConfig,
    /// Subscription channel configuration
    pub notifications: NotificationConfig,
    /// Persistence backend
    pub storage: StorageConfig,
    /// Startup recovery policy
    pub recovery: RecoveryConfig,
    /// Embedding provider (Ollama) configuration
    pub embedding: EmbeddingConfig,
    /// Text chunking configuration
    pub chunking: ChunkingConfig,
}

impl TaskConfig {
    /// Load configuration from a TOML file; missing sections use defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: TaskConfig = toml::from_str(&raw)?;
        config.validate()?;
        tracing::info!("Loaded task configuration from {}", path.as_ref().display());
        Ok(config)
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.queue.capacity == 0 {
            return Err(Error::config("queue.capacity must be at least 1"));
        }
        if self.workers.count == Some(0) {
            return Err(Error::config("workers.count must be at least 1"));
        }
        if self.workers.task_timeout_secs == 0 {
            return Err(Error::config("workers.task_timeout_secs must be positive"));
        }
        if self.retry.default_max_attempts == 0 {
            return Err(Error::config("retry.default_max_attempts must be at least 1"));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(Error::config(
                "retry.max_delay_ms must not be smaller than retry.base_delay_ms",
            ));
        }
        if self.notifications.channel_capacity == 0 || self.notifications.alert_capacity == 0 {
            return Err(Error::config("notification channel capacities must be positive"));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(Error::config(
                "chunking.chunk_overlap must be smaller than chunking.chunk_size",
            ));
        }
        Ok(())
    }
}

/// Queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Hard bound on queued + processing tasks
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 1000 }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of workers (default: CPU count, max 4)
    pub count: Option<usize>,
    /// Timeout for a single strategy invocation when no tier applies (default: 300 = 5 minutes)
    pub task_timeout_secs: u64,
    /// Invocations slower than this are logged as slow
    pub slow_task_warn_secs: u64,
    /// Size-based timeout tiers
    pub tiered: TieredTimeoutConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: None,
            task_timeout_secs: 300,
            slow_task_warn_secs: 60,
            tiered: TieredTimeoutConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Configured worker count, or auto-detected
    pub fn worker_count(&self) -> usize {
        self.count.unwrap_or_else(|| num_cpus::get().min(4)).max(1)
    }

    /// Execution limit for a task: explicit, tiered, or the fallback
    pub fn timeout_for(&self, explicit_secs: Option<u64>, size_bytes: u64) -> Duration {
        if let Some(secs) = explicit_secs {
            return Duration::from_secs(secs);
        }
        if self.tiered.enabled {
            let tier = self.tiered.tier_for_size(size_bytes);
            return self.tiered.timeout_for_tier(tier);
        }
        Duration::from_secs(self.task_timeout_secs)
    }
}

/// Tiered timeout configuration for size-based routing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TieredTimeoutConfig {
    /// Enable tiered timeouts (default: true)
    #[serde(default = "default_tiered_enabled")]
    pub enabled: bool,

    /// Subjects smaller than this are "fast" tier (default: 10MB)
    #[serde(default = "default_fast_threshold")]
    pub fast_threshold: u64,
    /// Subjects smaller than this are "medium" tier (default: 100MB)
    #[serde(default = "default_medium_threshold")]
    pub medium_threshold: u64,

    /// Timeout for fast tier (default: 120s)
    #[serde(default = "default_fast_timeout")]
    pub fast_timeout_secs: u64,
    /// Timeout for medium tier (default: 300s)
    #[serde(default = "default_medium_timeout")]
    pub medium_timeout_secs: u64,
    /// Timeout for heavy tier (default: 900s)
    #[serde(default = "default_heavy_timeout")]
    pub heavy_timeout_secs: u64,
}

fn default_tiered_enabled() -> bool { true }
fn default_fast_threshold() -> u64 { 10 * 1024 * 1024 }      // 10MB
fn default_medium_threshold() -> u64 { 100 * 1024 * 1024 }   // 100MB
fn default_fast_timeout() -> u64 { 120 }
fn default_medium_timeout() -> u64 { 300 }
fn default_heavy_timeout() -> u64 { 900 }

impl Default for TieredTimeoutConfig {
    fn default() -> Self {
        Self {
            enabled: default_tiered_enabled(),
            fast_threshold: default_fast_threshold(),
            medium_threshold: default_medium_threshold(),
            fast_timeout_secs: default_fast_timeout(),
            medium_timeout_secs: default_medium_timeout(),
            heavy_timeout_secs: default_heavy_timeout(),
        }
    }
}

impl TieredTimeoutConfig {
    /// Get timeout for a given tier
    pub fn timeout_for_tier(&self, tier: SubjectTier) -> Duration {
        let secs = match tier {
            SubjectTier::Fast => self.fast_timeout_secs,
            SubjectTier::Medium => self.medium_timeout_secs,
            SubjectTier::Heavy => self.heavy_timeout_secs,
        };
        Duration::from_secs(secs)
    }

    /// Classify a subject into a tier based on size
    pub fn tier_for_size(&self, size_bytes: u64) -> SubjectTier {
        if size_bytes < self.fast_threshold {
            SubjectTier::Fast
        } else if size_bytes < self.medium_threshold {
            SubjectTier::Medium
        } else {
            SubjectTier::Heavy
        }
    }
}

/// Retry classifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Backoff base delay
    pub base_delay_ms: u64,
    /// Backoff cap
    pub max_delay_ms: u64,
    /// Attempts granted when a submission does not say
    pub default_max_attempts: u32,
    /// Wait before retrying a re-admission the queue rejected for capacity
    pub readmit_interval_ms: u64,
    /// Replaces the built-in rule list when set
    pub rules: Option<Vec<RetryRule>>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 300_000, // 5 minutes
            default_max_attempts: 3,
            readmit_interval_ms: 1000,
            rules: None,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn readmit_interval(&self) -> Duration {
        Duration::from_millis(self.readmit_interval_ms)
    }
}

/// Subscription channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Buffered events per scope before slow subscribers start lagging
    pub channel_capacity: usize,
    /// Buffered system alerts
    pub alert_capacity: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            alert_capacity: 64,
        }
    }
}

/// Persistence backend selection
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// In-process maps, lost on restart
    #[default]
    Memory,
    /// SQLite file
    Sqlite,
}

/// Persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// SQLite database path
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let database_path = dirs::data_local_dir()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")))
            .join("ruvector-tasks")
            .join("tasks.db");

        Self {
            backend: StorageBackend::default(),
            database_path,
        }
    }
}

/// Startup recovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Re-enqueue tasks that were processing when the process stopped;
    /// when false they are failed instead
    pub requeue_interrupted: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            requeue_interrupted: true,
        }
    }
}

/// Embedding provider (Ollama) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Ollama base URL
    pub base_url: String,
    /// Embedding model name
    pub model: String,
    /// Embedding dimensions (768 for nomic-embed-text)
    pub dimensions: usize,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            dimensions: 768,
            timeout_secs: 60,
        }
    }
}

/// Text chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Target chunk size in characters
    pub chunk_size: usize,
    /// Overlap between chunks in characters
    pub chunk_overlap: usize,
    /// Minimum chunk size (skip smaller chunks)
    pub min_chunk_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024,
            chunk_overlap: 200,
            min_chunk_size: 50,
        }
    }
}
