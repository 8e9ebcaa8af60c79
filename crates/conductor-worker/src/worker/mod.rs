//! Polling worker
//!
//! This module provides:
//! - [`Worker`] - Polls one task type and runs a callback per task
//! - [`WorkerConfig`] - Interval, concurrency ceiling, ack policy
//! - [`TaskUpdater`] - Status reporting handed to the callback
//! - [`TaskSlotTracker`] - In-flight registry behind the concurrency ceiling
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Worker                              │
//! │  ┌────────────────┐   free slots   ┌───────────────────────┐ │
//! │  │ PollScheduler  │◄───────────────│   TaskSlotTracker     │ │
//! │  │ (interval)     │                │ taskId -> claim,timer │ │
//! │  └───────┬────────┘                └───────────▲───────────┘ │
//! │          │ poll(type, id, free)                │ claim/release│
//! │          ▼                                     │ /evict       │
//! │  ┌─────────────────────────────────────────────┴──────────┐  │
//! │  │ TaskExecutor (one Tokio task per claimed task)          │  │
//! │  │ ack -> arm deadline -> callback(task, updater) -> done  │  │
//! │  └──────────────────────────┬──────────────────────────────┘  │
//! │                             │ TaskUpdater::update             │
//! └─────────────────────────────┼─────────────────────────────────┘
//!                               ▼
//!                        QueueService
//! ```

mod config;
mod executor;
mod handler;
mod pool;
mod scheduler;
mod tracker;
mod updater;

pub use config::{WorkerConfig, DEFAULT_BASE_URL};
pub use handler::{
    task_callback, CallbackResult, ErrorHandler, LogErrorHandler, NoopErrorHandler, TaskCallback,
    TraceContextInjector,
};
pub use pool::{Worker, WorkerStatus};
pub use tracker::{ClaimRejected, ClaimToken, InFlightTask, TaskSlotTracker};
pub use updater::{TaskUpdate, TaskUpdater, MAX_CALLBACK_AFTER_SECONDS};
