//! Status reporting for a single task

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::tracker::{ClaimToken, TaskSlotTracker};
use crate::queue::{QueueError, QueueService, Task, TaskResult, TaskStatus};

/// Default `callbackAfterSeconds` for IN_PROGRESS updates (2^53 - 1)
///
/// The largest integer every JSON consumer represents exactly; in practice
/// the server never re-offers the task on its own.
pub const MAX_CALLBACK_AFTER_SECONDS: u64 = (1 << 53) - 1;

/// One status transition, before it is bound to a task
#[derive(Debug, Clone, PartialEq)]
pub struct TaskUpdate {
    pub status: TaskStatus,
    pub output_data: Value,
    pub reason_for_incompletion: Option<String>,
    pub callback_after_seconds: Option<u64>,
    pub extra: Map<String, Value>,
}

impl TaskUpdate {
    pub fn new(status: TaskStatus) -> Self {
        Self {
            status,
            output_data: Value::Null,
            reason_for_incompletion: None,
            callback_after_seconds: None,
            extra: Map::new(),
        }
    }

    pub fn completed() -> Self {
        Self::new(TaskStatus::Completed)
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::new(TaskStatus::Failed).with_reason(reason)
    }

    pub fn in_progress() -> Self {
        Self::new(TaskStatus::InProgress)
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output_data = output;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason_for_incompletion = Some(reason.into());
        self
    }

    pub fn with_callback_after(mut self, after: Duration) -> Self {
        self.callback_after_seconds = Some(after.as_secs().min(MAX_CALLBACK_AFTER_SECONDS));
        self
    }

    /// Extra top-level fields to send alongside the result
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Sends status updates for one claimed task
///
/// Handed to the task callback. Every call goes straight to the queue
/// service; failures are returned, never retried. Cheap to clone.
#[derive(Clone)]
pub struct TaskUpdater {
    queue: Arc<dyn QueueService>,
    task_id: String,
    workflow_instance_id: String,
    base_output: Arc<Map<String, Value>>,
    tracker: Arc<TaskSlotTracker>,
    token: ClaimToken,
}

impl TaskUpdater {
    pub(crate) fn new(
        queue: Arc<dyn QueueService>,
        task: &Task,
        base_output: Map<String, Value>,
        tracker: Arc<TaskSlotTracker>,
        token: ClaimToken,
    ) -> Self {
        Self {
            queue,
            task_id: task.task_id.clone(),
            workflow_instance_id: task.workflow_instance_id.clone(),
            base_output: Arc::new(base_output),
            tracker,
            token,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn workflow_instance_id(&self) -> &str {
        &self.workflow_instance_id
    }

    /// Send an arbitrary status transition
    pub async fn update(&self, update: TaskUpdate) -> Result<(), QueueError> {
        let result = self.build(update)?;

        if !self.tracker.is_current(&self.task_id, self.token) {
            warn!(
                task_id = %self.task_id,
                status = %result.status,
                "Sending update for a task that is no longer tracked"
            );
        }

        self.queue.update(&result).await?;
        debug!(task_id = %self.task_id, status = %result.status, "Task update sent");
        Ok(())
    }

    /// Report COMPLETED with the given output
    pub async fn complete<T: Serialize>(&self, output: T) -> Result<(), QueueError> {
        let output = to_output_value(output)?;
        self.update(TaskUpdate::completed().with_output(output)).await
    }

    /// Report FAILED with a reason and output
    pub async fn fail<T: Serialize>(
        &self,
        reason: impl Into<String>,
        output: T,
    ) -> Result<(), QueueError> {
        let output = to_output_value(output)?;
        self.update(TaskUpdate::failed(reason).with_output(output)).await
    }

    /// Report IN_PROGRESS
    ///
    /// Without `callback_after` the server is told to wait
    /// [`MAX_CALLBACK_AFTER_SECONDS`] before re-offering the task.
    pub async fn in_progress<T: Serialize>(
        &self,
        output: T,
        callback_after: Option<Duration>,
    ) -> Result<(), QueueError> {
        let output = to_output_value(output)?;
        let mut update = TaskUpdate::in_progress().with_output(output);
        update.callback_after_seconds = Some(
            callback_after
                .map(|d| d.as_secs().min(MAX_CALLBACK_AFTER_SECONDS))
                .unwrap_or(MAX_CALLBACK_AFTER_SECONDS),
        );
        self.update(update).await
    }

    fn build(&self, update: TaskUpdate) -> Result<TaskResult, QueueError> {
        let mut output_data = (*self.base_output).clone();
        match update.output_data {
            Value::Null => {}
            Value::Object(map) => output_data.extend(map),
            other => {
                return Err(QueueError::InvalidOutput(format!(
                    "output data must be a JSON object, got {}",
                    json_kind(&other)
                )))
            }
        }

        Ok(TaskResult {
            workflow_instance_id: self.workflow_instance_id.clone(),
            task_id: self.task_id.clone(),
            status: update.status,
            output_data,
            reason_for_incompletion: update.reason_for_incompletion,
            callback_after_seconds: update.callback_after_seconds,
            extra: update.extra,
        })
    }
}

impl std::fmt::Debug for TaskUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskUpdater")
            .field("task_id", &self.task_id)
            .field("workflow_instance_id", &self.workflow_instance_id)
            .finish_non_exhaustive()
    }
}

fn to_output_value<T: Serialize>(output: T) -> Result<Value, QueueError> {
    serde_json::to_value(output).map_err(|e| QueueError::InvalidOutput(e.to_string()))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryQueueService;
    use serde_json::json;

    fn updater_for(
        queue: &Arc<InMemoryQueueService>,
        base_output: Map<String, Value>,
    ) -> (TaskUpdater, Arc<TaskSlotTracker>) {
        let task = Task::new("t-1", "test", "wf-1");
        let tracker = Arc::new(TaskSlotTracker::new(1));
        let token = tracker.claim(&task).unwrap();
        let queue: Arc<dyn QueueService> = queue.clone();
        (
            TaskUpdater::new(queue, &task, base_output, Arc::clone(&tracker), token),
            tracker,
        )
    }

    #[tokio::test]
    async fn test_complete_echoes_ids() {
        let queue = Arc::new(InMemoryQueueService::new());
        let (updater, _tracker) = updater_for(&queue, Map::new());

        updater.complete(json!({"x": 1})).await.unwrap();

        let updates = queue.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].task_id, "t-1");
        assert_eq!(updates[0].workflow_instance_id, "wf-1");
        assert_eq!(updates[0].status, TaskStatus::Completed);
        assert_eq!(Value::Object(updates[0].output_data.clone()), json!({"x": 1}));
        assert_eq!(updates[0].callback_after_seconds, None);
    }

    #[tokio::test]
    async fn test_caller_keys_override_base_output() {
        let queue = Arc::new(InMemoryQueueService::new());
        let mut base = Map::new();
        base.insert("traceparent".into(), json!("00-abc-01"));
        base.insert("x".into(), json!("base"));
        let (updater, _tracker) = updater_for(&queue, base);

        updater.fail("boom", json!({"x": 2})).await.unwrap();

        let update = &queue.updates()[0];
        assert_eq!(update.status, TaskStatus::Failed);
        assert_eq!(update.reason_for_incompletion.as_deref(), Some("boom"));
        assert_eq!(
            Value::Object(update.output_data.clone()),
            json!({"traceparent": "00-abc-01", "x": 2})
        );
    }

    #[tokio::test]
    async fn test_in_progress_callback_after() {
        let queue = Arc::new(InMemoryQueueService::new());
        let (updater, _tracker) = updater_for(&queue, Map::new());

        updater.in_progress((), None).await.unwrap();
        updater
            .in_progress(json!({"pct": 50}), Some(Duration::from_secs(30)))
            .await
            .unwrap();

        let updates = queue.updates();
        assert_eq!(updates[0].status, TaskStatus::InProgress);
        assert_eq!(updates[0].callback_after_seconds, Some(MAX_CALLBACK_AFTER_SECONDS));
        assert!(updates[0].output_data.is_empty());
        assert_eq!(updates[1].callback_after_seconds, Some(30));
    }

    #[tokio::test]
    async fn test_non_object_output_rejected() {
        let queue = Arc::new(InMemoryQueueService::new());
        let (updater, _tracker) = updater_for(&queue, Map::new());

        let err = updater.complete(vec![1, 2, 3]).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidOutput(m) if m.contains("an array")));
        assert!(queue.updates().is_empty());
    }

    #[tokio::test]
    async fn test_update_failure_is_returned() {
        let queue = Arc::new(InMemoryQueueService::new());
        let (updater, _tracker) = updater_for(&queue, Map::new());
        queue.fail_next_update("down");

        assert!(updater.complete(()).await.is_err());
        assert!(queue.updates().is_empty());
    }

    #[tokio::test]
    async fn test_update_after_release_is_still_sent() {
        let queue = Arc::new(InMemoryQueueService::new());
        let (updater, tracker) = updater_for(&queue, Map::new());
        assert!(tracker.evict("t-1", updater.token));

        updater
            .update(TaskUpdate::completed().with_extra("logs", json!(["late"])))
            .await
            .unwrap();
        assert_eq!(queue.updates()[0].extra["logs"], json!(["late"]));
    }
}
