//! Worker: construction surface and lifecycle
//!
//! Owns the in-flight registry and the poll loop for one task type.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use super::config::WorkerConfig;
use super::executor::TaskExecutor;
use super::handler::{
    report, task_callback, CallbackResult, ErrorHandler, TaskCallback, TraceContextInjector,
};
use super::scheduler::PollScheduler;
use super::tracker::{InFlightTask, TaskSlotTracker};
use super::updater::TaskUpdater;
use crate::error::{ConfigError, WorkerError};
use crate::queue::{HttpQueueService, QueueService, Task};

const DRAIN_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Worker status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// Not polling, nothing in flight
    Idle,
    /// Poll loop active
    Running,
    /// Not polling, but tasks (or the last poll) are still finishing
    Draining,
}

struct PollLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct LoopState {
    active: Option<PollLoop>,
    /// Loop handle kept after `stop()` so a restart or shutdown can wait on it
    stopped: Option<JoinHandle<()>>,
}

/// Polling worker for one task type
///
/// # Example
///
/// ```no_run
/// use conductor_worker::{LogErrorHandler, Worker, WorkerConfig};
/// use serde_json::json;
///
/// # async fn run() -> Result<(), conductor_worker::WorkerError> {
/// let config = WorkerConfig::from_env()?.with_max_concurrent_tasks(4);
///
/// let worker = Worker::new(
///     "send_email",
///     config,
///     |task, updater| async move {
///         let to = task.input_data.get("to").cloned();
///         updater.complete(json!({ "sent_to": to })).await?;
///         Ok(())
///     },
///     LogErrorHandler,
/// )?;
///
/// worker.start()?;
/// // ...
/// worker.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct Worker {
    task_type: String,
    config: WorkerConfig,
    queue: Arc<dyn QueueService>,
    tracker: Arc<TaskSlotTracker>,
    callback: TaskCallback,
    error_handler: Arc<dyn ErrorHandler>,
    trace_injector: Option<Arc<dyn TraceContextInjector>>,
    state: Mutex<LoopState>,
}

impl Worker {
    /// Create a worker talking to the HTTP queue service at `config.base_url`
    pub fn new<F, Fut, H>(
        task_type: impl Into<String>,
        config: WorkerConfig,
        callback: F,
        error_handler: H,
    ) -> Result<Self, WorkerError>
    where
        F: Fn(Task, TaskUpdater) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
        H: ErrorHandler,
    {
        config.validate()?;
        let queue = HttpQueueService::with_timeout(&config.base_url, config.request_timeout)
            .map_err(|e| ConfigError::invalid("base_url", e.to_string()))?;
        Self::with_queue(task_type, config, Arc::new(queue), callback, error_handler)
    }

    /// Create a worker on top of any [`QueueService`]
    pub fn with_queue<F, Fut, H>(
        task_type: impl Into<String>,
        config: WorkerConfig,
        queue: Arc<dyn QueueService>,
        callback: F,
        error_handler: H,
    ) -> Result<Self, WorkerError>
    where
        F: Fn(Task, TaskUpdater) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
        H: ErrorHandler,
    {
        let task_type = task_type.into();
        if task_type.trim().is_empty() {
            return Err(ConfigError::invalid("task_type", "must not be empty").into());
        }
        config.validate()?;

        Ok(Self {
            tracker: Arc::new(TaskSlotTracker::new(config.max_concurrent_tasks)),
            task_type,
            config,
            queue,
            callback: task_callback(callback),
            error_handler: Arc::new(error_handler),
            trace_injector: None,
            state: Mutex::new(LoopState::default()),
        })
    }

    /// Attach a correlation-context sink
    ///
    /// Its output is merged into the task handed to the callback and becomes
    /// the base `outputData` of every update.
    pub fn with_trace_injector(mut self, injector: Arc<dyn TraceContextInjector>) -> Self {
        self.trace_injector = Some(injector);
        self
    }

    /// Start polling
    ///
    /// Must be called from within a Tokio runtime. Starting an active
    /// worker is reported to the error handler and returned as
    /// [`WorkerError::AlreadyRunning`]; the running loop is unaffected.
    pub fn start(&self) -> Result<(), WorkerError> {
        let runtime = Handle::try_current().map_err(|_| WorkerError::NoRuntime)?;

        let mut state = self.state.lock();
        if state.active.is_some() {
            drop(state);
            warn!(task_type = %self.task_type, "Worker already started");
            report(self.error_handler.as_ref(), WorkerError::AlreadyRunning);
            return Err(WorkerError::AlreadyRunning);
        }

        let executor = Arc::new(TaskExecutor::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.tracker),
            Arc::clone(&self.callback),
            Arc::clone(&self.error_handler),
            self.trace_injector.clone(),
            self.config.worker_id.clone(),
            self.config.auto_ack,
        ));
        let scheduler = PollScheduler::new(
            Arc::clone(&self.queue),
            executor,
            Arc::clone(&self.tracker),
            Arc::clone(&self.error_handler),
            self.task_type.clone(),
            self.config.worker_id.clone(),
            self.config.polling_interval,
        );

        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let previous = state.stopped.take();
        let span = info_span!(
            "poll_loop",
            task_type = %self.task_type,
            worker_id = %self.config.worker_id,
        );

        let handle = runtime.spawn(
            async move {
                // Never overlap with a poll the previous loop still has in flight
                if let Some(previous) = previous {
                    let _ = previous.await;
                }
                scheduler.run(loop_cancel).await;
            }
            .instrument(span),
        );

        state.active = Some(PollLoop { cancel, handle });

        info!(
            task_type = %self.task_type,
            worker_id = %self.config.worker_id,
            max_concurrent_tasks = self.config.max_concurrent_tasks,
            auto_ack = self.config.auto_ack,
            "Worker started"
        );
        Ok(())
    }

    /// Stop polling
    ///
    /// Tasks already dispatched run to completion. No-op when idle.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if let Some(active) = state.active.take() {
            active.cancel.cancel();
            state.stopped = Some(active.handle);
            info!(
                task_type = %self.task_type,
                in_flight = self.tracker.len(),
                "Worker stopped polling"
            );
        }
    }

    /// Stop polling and wait for in-flight tasks
    ///
    /// Gives up after `shutdown_timeout` with [`WorkerError::ShutdownTimeout`];
    /// tasks still running at that point are left alone.
    pub async fn shutdown(&self) -> Result<(), WorkerError> {
        self.stop();

        let deadline = Instant::now() + self.config.shutdown_timeout;

        let poll_loop = self.state.lock().stopped.take();
        if let Some(handle) = poll_loop {
            if tokio::time::timeout_at(deadline, handle).await.is_err() {
                warn!(task_type = %self.task_type, "Poll loop did not exit before shutdown timeout");
            }
        }

        loop {
            let remaining = self.tracker.len();
            if remaining == 0 {
                break;
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    task_type = %self.task_type,
                    remaining_tasks = remaining,
                    "Shutdown timeout reached"
                );
                return Err(WorkerError::ShutdownTimeout { remaining });
            }

            tokio::time::sleep(DRAIN_CHECK_INTERVAL.min(deadline - now)).await;
        }

        info!(task_type = %self.task_type, "Worker shut down");
        Ok(())
    }

    pub fn status(&self) -> WorkerStatus {
        let state = self.state.lock();
        if state.active.is_some() {
            return WorkerStatus::Running;
        }
        let loop_finishing = state
            .stopped
            .as_ref()
            .is_some_and(|handle| !handle.is_finished());
        if loop_finishing || !self.tracker.is_empty() {
            WorkerStatus::Draining
        } else {
            WorkerStatus::Idle
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().active.is_some()
    }

    /// Number of claimed, unresolved tasks
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    pub fn in_flight_tasks(&self) -> Vec<InFlightTask> {
        self.tracker.snapshot()
    }

    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(active) = self.state.get_mut().active.take() {
            active.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("task_type", &self.task_type)
            .field("config", &self.config)
            .field("in_flight", &self.tracker.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryQueueService;
    use crate::worker::handler::NoopErrorHandler;

    fn idle_worker() -> Worker {
        Worker::with_queue(
            "test",
            WorkerConfig::new().with_worker_id("w-1"),
            Arc::new(InMemoryQueueService::new()),
            |_, _| async { Ok(()) },
            NoopErrorHandler,
        )
        .unwrap()
    }

    #[test]
    fn test_empty_task_type_rejected() {
        let err = Worker::with_queue(
            " ",
            WorkerConfig::new(),
            Arc::new(InMemoryQueueService::new()),
            |_, _| async { Ok(()) },
            NoopErrorHandler,
        )
        .unwrap_err();
        assert!(matches!(err, WorkerError::Config(_)));
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let err = Worker::new(
            "test",
            WorkerConfig::new().with_base_url("not a url"),
            |_, _| async { Ok(()) },
            NoopErrorHandler,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            WorkerError::Config(ConfigError::InvalidValue { ref key, .. }) if key == "base_url"
        ));
    }

    #[test]
    fn test_start_outside_runtime() {
        let worker = idle_worker();
        assert!(matches!(worker.start(), Err(WorkerError::NoRuntime)));
        assert_eq!(worker.status(), WorkerStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_transitions() {
        let worker = idle_worker();
        assert_eq!(worker.status(), WorkerStatus::Idle);

        worker.start().unwrap();
        assert!(worker.is_running());
        assert_eq!(worker.status(), WorkerStatus::Running);

        worker.stop();
        assert!(!worker.is_running());
        worker.shutdown().await.unwrap();
        assert_eq!(worker.status(), WorkerStatus::Idle);
    }

    #[tokio::test]
    async fn test_http_worker_construction() {
        let worker = Worker::new(
            "send_email",
            WorkerConfig::new().with_worker_id("w-9"),
            |_, _| async { Ok(()) },
            NoopErrorHandler,
        )
        .unwrap();
        assert_eq!(worker.task_type(), "send_email");
        assert_eq!(worker.worker_id(), "w-9");
        assert_eq!(worker.in_flight(), 0);
    }
}
