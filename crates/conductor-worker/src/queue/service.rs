//! QueueService trait definition

use async_trait::async_trait;

use super::types::{Task, TaskResult};

/// Error type for queue service operations
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Transport-level failure (connect, timeout, TLS, ...)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The queue service answered with a non-success status
    #[error("queue service error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Response body could not be decoded
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Caller-supplied output data is not a JSON object
    #[error("invalid output data: {0}")]
    InvalidOutput(String),

    /// Base URL cannot be used to build endpoint URLs
    #[error("invalid base URL {url}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    /// Queue service unreachable or refused the call
    #[error("queue service unavailable: {0}")]
    Unavailable(String),
}

/// Remote system owning task state
///
/// The worker only ever talks to the orchestration server through this
/// trait. Implementations must be thread-safe; calls from the poll loop and
/// from every in-flight task interleave freely.
#[async_trait]
pub trait QueueService: Send + Sync + 'static {
    /// Claim up to `count` tasks of `task_type` for `worker_id`
    ///
    /// Returning fewer tasks than requested (including none) is normal.
    async fn poll(
        &self,
        task_type: &str,
        worker_id: &str,
        count: usize,
    ) -> Result<Vec<Task>, QueueError>;

    /// Acknowledge receipt of a claimed task
    ///
    /// `Ok(false)` means the server did not confirm the ack.
    async fn ack(&self, task_id: &str, worker_id: &str) -> Result<bool, QueueError>;

    /// Report a status transition for a task
    async fn update(&self, result: &TaskResult) -> Result<(), QueueError>;
}
