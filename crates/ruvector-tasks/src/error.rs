//! Error types for the task-processing core

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::types::{TaskId, TaskStatus};

/// Result type alias for task service operations
pub type Result<T> = std::result::Result<T, Error>;

/// Task service errors
///
/// These are surfaced synchronously to callers. Failures that happen while a
/// strategy runs are [`ProcessingError`]s and never leave the worker pool;
/// they end up in the task's error history instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed submission (unknown type, missing subject, ...)
    #[error("Invalid submission: {0}")]
    Validation(String),

    /// Queue is at capacity, the caller should report "system busy"
    #[error("Queue capacity exceeded (capacity: {capacity})")]
    CapacityExceeded { capacity: usize },

    /// Task not found
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    /// Rejected state machine transition
    #[error("Invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// Persistence collaborator error
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML config parse error
    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether this is the backpressure signal rather than a real fault
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

/// Structured kind of an execution-time failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection refused/reset, DNS, upstream 5xx
    Network,
    /// Operation exceeded its time limit
    Timeout,
    /// Upstream throttling (HTTP 429, quota per minute)
    RateLimited,
    /// Memory, disk or quota exhaustion
    ResourceExhausted,
    /// Subject content could not be decoded
    InvalidFormat,
    /// Content type not handled by the strategy
    Unsupported,
    /// Subject is damaged or truncated
    Corrupt,
    /// Subject locator does not resolve
    NotFound,
    /// Task config rejected by the strategy
    InvalidConfig,
    /// Cooperative cancellation observed at a checkpoint
    Cancelled,
    /// No strategy registered for the task type
    NoStrategy,
    /// Bug or panic inside the strategy
    Internal,
    /// Anything else, classified by message
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::InvalidFormat => "invalid_format",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Corrupt => "corrupt",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidConfig => "invalid_config",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::NoStrategy => "no_strategy",
            ErrorKind::Internal => "internal",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Failure reported by a processing strategy (or detected by the worker)
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ProcessingError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ProcessingError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceExhausted, message)
    }

    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidFormat, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "cancelled at checkpoint")
    }

    /// An error whose kind is left to message-based classification
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

impl From<std::io::Error> for ProcessingError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        let kind = match err.kind() {
            Io::NotFound => ErrorKind::NotFound,
            Io::PermissionDenied => ErrorKind::NotFound,
            Io::TimedOut => ErrorKind::Timeout,
            Io::ConnectionRefused | Io::ConnectionReset | Io::ConnectionAborted => {
                ErrorKind::Network
            }
            Io::InvalidData | Io::UnexpectedEof => ErrorKind::Corrupt,
            Io::OutOfMemory => ErrorKind::ResourceExhausted,
            _ => ErrorKind::Unknown,
        };
        Self::new(kind, err.to_string())
    }
}
