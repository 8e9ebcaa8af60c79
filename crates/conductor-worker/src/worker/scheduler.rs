//! Poll loop
//!
//! One cycle: compute free slots, poll for that many tasks, dispatch each
//! one, then wait out the rest of the polling interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::executor::TaskExecutor;
use super::handler::{report, ErrorHandler};
use super::tracker::{ClaimRejected, TaskSlotTracker};
use crate::error::WorkerError;
use crate::queue::QueueService;

pub(crate) struct PollScheduler {
    queue: Arc<dyn QueueService>,
    executor: Arc<TaskExecutor>,
    tracker: Arc<TaskSlotTracker>,
    error_handler: Arc<dyn ErrorHandler>,
    task_type: String,
    worker_id: String,
    polling_interval: Duration,
}

impl PollScheduler {
    pub(crate) fn new(
        queue: Arc<dyn QueueService>,
        executor: Arc<TaskExecutor>,
        tracker: Arc<TaskSlotTracker>,
        error_handler: Arc<dyn ErrorHandler>,
        task_type: String,
        worker_id: String,
        polling_interval: Duration,
    ) -> Self {
        Self {
            queue,
            executor,
            tracker,
            error_handler,
            task_type,
            worker_id,
            polling_interval,
        }
    }

    /// Poll until `cancel` fires
    ///
    /// A poll already in flight when `cancel` fires completes and its tasks
    /// are dispatched; only the wait between cycles is interrupted.
    pub(crate) async fn run(self, cancel: CancellationToken) {
        info!(
            polling_interval_ms = self.polling_interval.as_millis() as u64,
            capacity = self.tracker.capacity(),
            "Poll loop started"
        );

        while !cancel.is_cancelled() {
            let started = Instant::now();
            self.poll_once().await;

            let wait = next_wait(self.polling_interval, started.elapsed());
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        info!("Poll loop exited");
    }

    /// Run one poll cycle, returning the number of tasks dispatched
    pub(crate) async fn poll_once(&self) -> usize {
        let free = self.tracker.free_slots();
        if free == 0 {
            trace!("No free slots, skipping poll");
            return 0;
        }

        let tasks = match self
            .queue
            .poll(&self.task_type, &self.worker_id, free)
            .await
        {
            Ok(tasks) => tasks,
            Err(e) => {
                report(self.error_handler.as_ref(), WorkerError::Poll(e));
                return 0;
            }
        };

        if tasks.is_empty() {
            trace!(requested = free, "No tasks available");
            return 0;
        }
        debug!(requested = free, received = tasks.len(), "Polled tasks");

        let mut dispatched = 0;
        for (index, task) in tasks.into_iter().enumerate() {
            let task_id = task.task_id.clone();
            if index >= free {
                warn!(
                    task_id = %task_id,
                    requested = free,
                    "Queue returned more tasks than requested, not admitting"
                );
                continue;
            }

            match self.executor.dispatch(task) {
                Ok(()) => dispatched += 1,
                Err(ClaimRejected::Duplicate) => {
                    warn!(task_id = %task_id, "Task is already in flight, not admitting");
                }
                Err(ClaimRejected::Full) => {
                    warn!(task_id = %task_id, "No free slot for polled task, not admitting");
                }
            }
        }
        dispatched
    }
}

/// Time left in the current cycle, zero when the cycle overran
pub(crate) fn next_wait(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}
