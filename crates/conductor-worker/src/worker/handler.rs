//! User-supplied hooks: task callback, error handler, trace injector

use std::any::Any;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::error;

use super::updater::TaskUpdater;
use crate::error::WorkerError;
use crate::queue::Task;

/// Outcome of a task callback
///
/// `Err` makes the worker report the task as FAILED with the error's
/// message as the reason.
pub type CallbackResult = anyhow::Result<()>;

/// Type-erased task callback
pub type TaskCallback = Arc<
    dyn Fn(Task, TaskUpdater) -> Pin<Box<dyn Future<Output = CallbackResult> + Send>>
        + Send
        + Sync,
>;

/// Box a callback closure into a [`TaskCallback`]
pub fn task_callback<F, Fut>(callback: F) -> TaskCallback
where
    F: Fn(Task, TaskUpdater) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CallbackResult> + Send + 'static,
{
    Arc::new(move |task, updater| Box::pin(callback(task, updater)))
}

/// Receives every non-fatal error a worker runs into
///
/// Required at construction. Implemented for any `Fn(WorkerError)` closure.
pub trait ErrorHandler: Send + Sync + 'static {
    fn handle(&self, error: WorkerError);
}

impl<F> ErrorHandler for F
where
    F: Fn(WorkerError) + Send + Sync + 'static,
{
    fn handle(&self, error: WorkerError) {
        self(error)
    }
}

/// Hand `error` to the handler without letting a panic in it escape
///
/// Every worker-side call into the error handler goes through here. A panic
/// raised by the handler is logged and swallowed.
pub(crate) fn report(handler: &dyn ErrorHandler, error: WorkerError) {
    let description = error.to_string();
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler.handle(error))) {
        error!(
            error = %description,
            panic = %panic_message(&*panic),
            "Error handler panicked"
        );
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Logs errors through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct LogErrorHandler;

impl ErrorHandler for LogErrorHandler {
    fn handle(&self, error: WorkerError) {
        match error.task_id() {
            Some(task_id) => error!(task_id = %task_id, error = %error, "Worker error"),
            None => error!(error = %error, "Worker error"),
        }
    }
}

/// Drops every error
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopErrorHandler;

impl ErrorHandler for NoopErrorHandler {
    fn handle(&self, _error: WorkerError) {}
}

/// Produces per-task correlation output
///
/// The returned keys are merged into the `extra` fields of the task handed
/// to the callback, so user code can pass the context downstream. They also
/// become the base of every update's `outputData` for that task; caller keys
/// override them.
pub trait TraceContextInjector: Send + Sync + 'static {
    fn inject(&self, task: &Task) -> Map<String, Value>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_closure_is_error_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: Arc<dyn ErrorHandler> =
            Arc::new(move |e: WorkerError| sink.lock().push(e.to_string()));

        handler.handle(WorkerError::AlreadyRunning);
        assert_eq!(seen.lock().as_slice(), ["worker is already started"]);
    }

    #[test]
    fn test_builtin_handlers_accept_errors() {
        LogErrorHandler.handle(WorkerError::AckRejected {
            task_id: "t-1".to_string(),
        });
        NoopErrorHandler.handle(WorkerError::AlreadyRunning);
    }

    struct EscalatingHandler(Mutex<usize>);

    impl ErrorHandler for EscalatingHandler {
        fn handle(&self, error: WorkerError) {
            *self.0.lock() += 1;
            panic!("escalate: {error}");
        }
    }

    #[test]
    fn test_report_contains_handler_panic() {
        let handler = EscalatingHandler(Mutex::new(0));

        report(&handler, WorkerError::AlreadyRunning);
        report(&handler, WorkerError::AlreadyRunning);
        assert_eq!(*handler.0.lock(), 2);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(&*payload), "static message");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(&*payload), "owned message");

        let payload: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(&*payload), "unknown panic payload");
    }
}
