//! Per-task lifecycle: claim, ack, deadline, callback, resolution

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{debug, info_span, warn, Instrument};

use super::handler::{panic_message, report, ErrorHandler, TaskCallback, TraceContextInjector};
use super::tracker::{ClaimRejected, ClaimToken, TaskSlotTracker};
use super::updater::TaskUpdater;
use crate::error::WorkerError;
use crate::queue::{QueueService, Task};

/// Runs claimed tasks, one spawned Tokio task each
pub(crate) struct TaskExecutor {
    queue: Arc<dyn QueueService>,
    tracker: Arc<TaskSlotTracker>,
    callback: TaskCallback,
    error_handler: Arc<dyn ErrorHandler>,
    trace_injector: Option<Arc<dyn TraceContextInjector>>,
    worker_id: String,
    auto_ack: bool,
}

impl TaskExecutor {
    pub(crate) fn new(
        queue: Arc<dyn QueueService>,
        tracker: Arc<TaskSlotTracker>,
        callback: TaskCallback,
        error_handler: Arc<dyn ErrorHandler>,
        trace_injector: Option<Arc<dyn TraceContextInjector>>,
        worker_id: String,
        auto_ack: bool,
    ) -> Self {
        Self {
            queue,
            tracker,
            callback,
            error_handler,
            trace_injector,
            worker_id,
            auto_ack,
        }
    }

    /// Register the task and spawn its execution
    ///
    /// The registry insert happens before this returns, so the next
    /// free-slot computation already accounts for the task.
    pub(crate) fn dispatch(self: &Arc<Self>, task: Task) -> Result<(), ClaimRejected> {
        let token = self.tracker.claim(&task)?;

        let span = info_span!(
            "task",
            task_id = %task.task_id,
            task_type = %task.task_type,
            workflow_instance_id = %task.workflow_instance_id,
            retry_count = task.retry_count,
            poll_count = task.poll_count,
        );

        let executor = Arc::clone(self);
        tokio::spawn(async move { executor.run(task, token).await }.instrument(span));
        Ok(())
    }

    async fn run(self: Arc<Self>, mut task: Task, token: ClaimToken) {
        let task_id = task.task_id.clone();
        debug!("Task claimed");

        if self.auto_ack {
            self.ack(&task_id).await;
        }

        if let Some(timeout) = task.response_timeout() {
            self.arm_deadline(&task_id, token, timeout);
        }

        let base_output = self
            .trace_injector
            .as_ref()
            .map(|injector| injector.inject(&task))
            .unwrap_or_default();
        let updater = TaskUpdater::new(
            Arc::clone(&self.queue),
            &task,
            base_output.clone(),
            Arc::clone(&self.tracker),
            token,
        );

        // The callback sees the correlation context alongside the task fields
        task.extra.extend(base_output);

        let callback = Arc::clone(&self.callback);
        let callback_updater = updater.clone();
        let outcome = AssertUnwindSafe(async move { callback(task, callback_updater).await })
            .catch_unwind()
            .await;

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{e:#}")),
            Err(panic) => Some(format!("task callback panicked: {}", panic_message(&*panic))),
        };

        if let Some(reason) = failure {
            debug!(reason = %reason, "Task callback failed, reporting FAILED");
            if let Err(source) = updater.fail(reason, ()).await {
                let error = WorkerError::FailureReport {
                    task_id: task_id.clone(),
                    source,
                };
                report(self.error_handler.as_ref(), error);
            }
        }

        if self.tracker.release(&task_id, token) {
            debug!("Task resolved");
        } else {
            debug!("Task resolved after it was evicted");
        }
    }

    async fn ack(&self, task_id: &str) {
        match self.queue.ack(task_id, &self.worker_id).await {
            Ok(true) => {}
            Ok(false) => {
                warn!("Ack not confirmed by queue service, executing anyway");
                let error = WorkerError::AckRejected {
                    task_id: task_id.to_string(),
                };
                report(self.error_handler.as_ref(), error);
            }
            Err(source) => {
                warn!(error = %source, "Ack failed, executing anyway");
                let error = WorkerError::Ack {
                    task_id: task_id.to_string(),
                    source,
                };
                report(self.error_handler.as_ref(), error);
            }
        }
    }

    fn arm_deadline(&self, task_id: &str, token: ClaimToken, timeout: Duration) {
        let tracker = Arc::clone(&self.tracker);
        let error_handler = Arc::clone(&self.error_handler);
        let id = task_id.to_string();

        let timer = tokio::spawn(
            async move {
                tokio::time::sleep(timeout).await;
                if tracker.evict(&id, token) {
                    warn!(timeout = ?timeout, "Task exceeded its response timeout, evicted");
                    let error = WorkerError::DeadlineExceeded {
                        task_id: id,
                        timeout,
                    };
                    report(error_handler.as_ref(), error);
                }
            }
            .in_current_span(),
        );

        self.tracker.arm_deadline(task_id, token, timer.abort_handle());
    }
}
