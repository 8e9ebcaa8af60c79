//! Queue service layer
//!
//! This module provides:
//! - [`QueueService`] trait, the worker's only view of the orchestration server
//! - [`HttpQueueService`] for the Conductor task REST API
//! - [`InMemoryQueueService`] for testing

mod http;
mod memory;
mod service;
mod types;

pub use http::{HttpQueueService, DEFAULT_REQUEST_TIMEOUT};
pub use memory::{AckRequest, AckResponse, InMemoryQueueService, PollRequest};
pub use service::{QueueError, QueueService};
pub use types::{Task, TaskResult, TaskStatus, MAX_RESPONSE_TIMEOUT_SECONDS};
