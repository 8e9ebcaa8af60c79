//! # Conductor Worker
//!
//! Worker-side client for a Conductor-style workflow orchestration queue.
//!
//! A [`Worker`] repeatedly claims tasks of one registered type, acknowledges
//! them, runs user logic, and reports the outcome back to the queue service.
//!
//! ## Features
//!
//! - **Slot-sized polling**: each poll asks for exactly as many tasks as there are free slots
//! - **Per-task deadlines**: tasks that outlive their response timeout are evicted locally
//! - **Automatic failure reporting**: callback errors and panics become FAILED updates
//! - **Pluggable queue service**: HTTP client for the Conductor REST API, in-memory double for tests
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Worker                               │
//! │  (poll loop, in-flight registry, per-task execution)        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      QueueService                            │
//! │  (poll / ack / update; HTTP or in-memory)                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use conductor_worker::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     init_logging(LoggingConfig::from_env()).ok();
//!
//!     let worker = Worker::new(
//!         "resize_image",
//!         WorkerConfig::from_env()?,
//!         |task, updater| async move {
//!             let url = task.input_data.get("url").cloned();
//!             updater.in_progress(json!({ "stage": "downloading" }), None).await?;
//!             updater.complete(json!({ "source": url })).await?;
//!             Ok(())
//!         },
//!         LogErrorHandler,
//!     )?;
//!
//!     worker.start()?;
//!     tokio::signal::ctrl_c().await?;
//!     worker.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod queue;
pub mod telemetry;
pub mod worker;

pub use error::{ConfigError, WorkerError};
pub use queue::{
    HttpQueueService, InMemoryQueueService, QueueError, QueueService, Task, TaskResult, TaskStatus,
};
pub use worker::{
    ErrorHandler, LogErrorHandler, NoopErrorHandler, TaskUpdate, TaskUpdater, TraceContextInjector,
    Worker, WorkerConfig, WorkerStatus,
};

/// Prelude for common imports
pub mod prelude {
    pub use crate::error::{ConfigError, WorkerError};
    pub use crate::queue::{
        HttpQueueService, InMemoryQueueService, QueueError, QueueService, Task, TaskResult,
        TaskStatus,
    };
    pub use crate::telemetry::{init_logging, LoggingConfig};
    pub use crate::worker::{
        CallbackResult, ErrorHandler, LogErrorHandler, NoopErrorHandler, TaskUpdate, TaskUpdater,
        TraceContextInjector, Worker, WorkerConfig, WorkerStatus,
    };
}
