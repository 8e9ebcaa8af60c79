//! Worker-level error types
//!
//! [`WorkerError`] is both what the injected [`ErrorHandler`](crate::worker::ErrorHandler)
//! receives at runtime and what the synchronous worker surface returns.

use std::time::Duration;

use thiserror::Error;

use crate::queue::QueueError;

/// Errors surfaced by a [`Worker`](crate::worker::Worker)
///
/// None of these are fatal to the process; the error handler decides
/// whether to escalate.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Polling the queue service failed; the loop keeps going
    #[error("poll failed: {0}")]
    Poll(#[source] QueueError),

    /// Acknowledging a task failed; the task is executed anyway
    #[error("ack failed for task {task_id}: {source}")]
    Ack {
        task_id: String,
        #[source]
        source: QueueError,
    },

    /// The queue service answered the ack with `false`; the task is executed anyway
    #[error("ack not confirmed for task {task_id}")]
    AckRejected { task_id: String },

    /// The task was not resolved within its response timeout and was evicted locally
    #[error("task {task_id} was not updated in time (response timeout {timeout:?})")]
    DeadlineExceeded { task_id: String, timeout: Duration },

    /// Sending the automatic FAILED update after a callback error failed
    #[error("failed to report failure of task {task_id}: {source}")]
    FailureReport {
        task_id: String,
        #[source]
        source: QueueError,
    },

    /// `start()` was called on a worker that is already polling
    #[error("worker is already started")]
    AlreadyRunning,

    /// `start()` was called outside of a Tokio runtime
    #[error("worker must be started from within a Tokio runtime")]
    NoRuntime,

    /// Graceful shutdown gave up with tasks still in flight
    #[error("graceful shutdown timed out with {remaining} task(s) still in flight")]
    ShutdownTimeout { remaining: usize },

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl WorkerError {
    /// Task the error relates to, if any
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::Ack { task_id, .. }
            | Self::AckRejected { task_id }
            | Self::DeadlineExceeded { task_id, .. }
            | Self::FailureReport { task_id, .. } => Some(task_id),
            _ => None,
        }
    }

    /// Whether this is a deadline-exceeded eviction
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Self::DeadlineExceeded { .. })
    }
}

/// Configuration-related errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }
}
