//! In-memory implementation of QueueService for testing

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::service::{QueueError, QueueService};
use super::types::{Task, TaskResult};

/// A recorded poll call
#[derive(Debug, Clone)]
pub struct PollRequest {
    pub task_type: String,
    pub worker_id: String,
    pub count: usize,
    pub at: Instant,
}

/// A recorded ack call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckRequest {
    pub task_id: String,
    pub worker_id: String,
}

/// How the in-memory service answers acks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckResponse {
    Confirm,
    Reject,
    Fail(String),
}

struct QueueState {
    pending: HashMap<String, VecDeque<Task>>,
    polls: Vec<PollRequest>,
    acks: Vec<AckRequest>,
    updates: Vec<TaskResult>,
    poll_failures: VecDeque<String>,
    update_failures: VecDeque<String>,
    ack_response: AckResponse,
}

/// In-memory implementation of [`QueueService`]
///
/// Primarily for testing. Tasks are enqueued per task type and handed out
/// FIFO; every poll, ack and update is recorded for inspection. Failures can
/// be injected for the next poll/update calls.
///
/// # Example
///
/// ```
/// use conductor_worker::queue::{InMemoryQueueService, Task};
///
/// let queue = InMemoryQueueService::new();
/// queue.enqueue(Task::new("t-1", "send_email", "wf-1"));
/// assert_eq!(queue.pending_count("send_email"), 1);
/// ```
pub struct InMemoryQueueService {
    state: Mutex<QueueState>,
    update_notify: Notify,
}

impl InMemoryQueueService {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: HashMap::new(),
                polls: Vec::new(),
                acks: Vec::new(),
                updates: Vec::new(),
                poll_failures: VecDeque::new(),
                update_failures: VecDeque::new(),
                ack_response: AckResponse::Confirm,
            }),
            update_notify: Notify::new(),
        }
    }

    /// Make a task available to pollers of its task type
    pub fn enqueue(&self, task: Task) {
        self.state
            .lock()
            .pending
            .entry(task.task_type.clone())
            .or_default()
            .push_back(task);
    }

    /// Number of tasks still waiting to be polled
    pub fn pending_count(&self, task_type: &str) -> usize {
        self.state
            .lock()
            .pending
            .get(task_type)
            .map_or(0, VecDeque::len)
    }

    /// Fail the next poll call with the given message
    pub fn fail_next_poll(&self, message: impl Into<String>) {
        self.state.lock().poll_failures.push_back(message.into());
    }

    /// Fail the next update call with the given message
    pub fn fail_next_update(&self, message: impl Into<String>) {
        self.state.lock().update_failures.push_back(message.into());
    }

    /// Set how subsequent acks are answered
    pub fn set_ack_response(&self, response: AckResponse) {
        self.state.lock().ack_response = response;
    }

    pub fn polls(&self) -> Vec<PollRequest> {
        self.state.lock().polls.clone()
    }

    pub fn acks(&self) -> Vec<AckRequest> {
        self.state.lock().acks.clone()
    }

    pub fn updates(&self) -> Vec<TaskResult> {
        self.state.lock().updates.clone()
    }

    /// Updates recorded for one task, in arrival order
    pub fn updates_for(&self, task_id: &str) -> Vec<TaskResult> {
        self.state
            .lock()
            .updates
            .iter()
            .filter(|u| u.task_id == task_id)
            .cloned()
            .collect()
    }

    /// Wait until at least `count` updates were recorded or `timeout` elapses
    ///
    /// Returns whatever was recorded by then.
    pub async fn wait_for_updates(&self, count: usize, timeout: Duration) -> Vec<TaskResult> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.update_notify.notified();
            {
                let state = self.state.lock();
                if state.updates.len() >= count {
                    return state.updates.clone();
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.updates();
            }
        }
    }
}

impl Default for InMemoryQueueService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueService for InMemoryQueueService {
    async fn poll(
        &self,
        task_type: &str,
        worker_id: &str,
        count: usize,
    ) -> Result<Vec<Task>, QueueError> {
        let mut state = self.state.lock();
        state.polls.push(PollRequest {
            task_type: task_type.to_string(),
            worker_id: worker_id.to_string(),
            count,
            at: Instant::now(),
        });

        if let Some(message) = state.poll_failures.pop_front() {
            return Err(QueueError::Unavailable(message));
        }

        let Some(queue) = state.pending.get_mut(task_type) else {
            return Ok(vec![]);
        };
        let take = count.min(queue.len());
        Ok(queue.drain(..take).collect())
    }

    async fn ack(&self, task_id: &str, worker_id: &str) -> Result<bool, QueueError> {
        let mut state = self.state.lock();
        state.acks.push(AckRequest {
            task_id: task_id.to_string(),
            worker_id: worker_id.to_string(),
        });

        match &state.ack_response {
            AckResponse::Confirm => Ok(true),
            AckResponse::Reject => Ok(false),
            AckResponse::Fail(message) => Err(QueueError::Unavailable(message.clone())),
        }
    }

    async fn update(&self, result: &TaskResult) -> Result<(), QueueError> {
        let outcome = {
            let mut state = self.state.lock();
            match state.update_failures.pop_front() {
                Some(message) => Err(QueueError::Unavailable(message)),
                None => {
                    state.updates.push(result.clone());
                    Ok(())
                }
            }
        };
        self.update_notify.notify_waiters();
        outcome
    }
}
