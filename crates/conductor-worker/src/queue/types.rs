//! Wire types exchanged with the queue service

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Largest response timeout that arms a local deadline (2^31 - 1 seconds)
pub const MAX_RESPONSE_TIMEOUT_SECONDS: i64 = i32::MAX as i64;

/// A unit of work claimed from the queue service
///
/// Fields the worker does not interpret (`workflowType`, `seq`,
/// `referenceTaskName`, ...) are kept in `extra` and passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_id: String,

    pub task_type: String,

    pub workflow_instance_id: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub input_data: Map<String, Value>,

    /// Seconds the server waits for an update before it considers the task lost
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_timeout_seconds: Option<i64>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub poll_count: u32,

    #[serde(default, deserialize_with = "null_as_default")]
    pub retry_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_time: Option<i64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Task {
    pub fn new(
        task_id: impl Into<String>,
        task_type: impl Into<String>,
        workflow_instance_id: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            task_type: task_type.into(),
            workflow_instance_id: workflow_instance_id.into(),
            input_data: Map::new(),
            response_timeout_seconds: None,
            poll_count: 0,
            retry_count: 0,
            scheduled_time: None,
            extra: Map::new(),
        }
    }

    /// Set the input payload; non-object values are ignored
    pub fn with_input(mut self, input: Value) -> Self {
        if let Value::Object(map) = input {
            self.input_data = map;
        }
        self
    }

    pub fn with_response_timeout_seconds(mut self, seconds: i64) -> Self {
        self.response_timeout_seconds = Some(seconds);
        self
    }

    /// Local deadline to arm for this task
    ///
    /// `None` when the timeout is absent, zero, negative, or larger than
    /// [`MAX_RESPONSE_TIMEOUT_SECONDS`].
    pub fn response_timeout(&self) -> Option<Duration> {
        match self.response_timeout_seconds {
            Some(secs) if secs > 0 && secs <= MAX_RESPONSE_TIMEOUT_SECONDS => {
                Some(Duration::from_secs(secs as u64))
            }
            _ => None,
        }
    }
}

/// Task status as reported back to the queue service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Still running; may be reported any number of times
    InProgress,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
}

impl TaskStatus {
    /// `COMPLETED` and `FAILED` end a task's lifecycle episode
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Status transition payload sent on update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub workflow_instance_id: String,

    pub task_id: String,

    pub status: TaskStatus,

    #[serde(default)]
    pub output_data: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_for_incompletion: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_after_seconds: Option<u64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_deserializes_server_payload() {
        let payload = json!({
            "taskId": "t-1",
            "taskType": "send_email",
            "workflowInstanceId": "wf-1",
            "inputData": {"to": "a@example.com"},
            "responseTimeoutSeconds": 30,
            "pollCount": 2,
            "retryCount": 1,
            "scheduledTime": 1700000000000i64,
            "workflowType": "onboarding",
            "seq": 4
        });

        let task: Task = serde_json::from_value(payload).unwrap();
        assert_eq!(task.task_id, "t-1");
        assert_eq!(task.input_data["to"], "a@example.com");
        assert_eq!(task.response_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(task.poll_count, 2);
        assert_eq!(task.extra["workflowType"], "onboarding");
        assert_eq!(task.extra["seq"], 4);
    }

    #[test]
    fn test_task_tolerates_nulls() {
        let task: Task = serde_json::from_value(json!({
            "taskId": "t-2",
            "taskType": "x",
            "workflowInstanceId": "wf",
            "inputData": null,
            "pollCount": null
        }))
        .unwrap();
        assert!(task.input_data.is_empty());
        assert_eq!(task.poll_count, 0);
        assert_eq!(task.response_timeout(), None);
    }

    #[test]
    fn test_response_timeout_bounds() {
        let task = Task::new("t", "x", "wf");
        assert_eq!(task.clone().with_response_timeout_seconds(0).response_timeout(), None);
        assert_eq!(task.clone().with_response_timeout_seconds(-5).response_timeout(), None);
        assert_eq!(
            task.clone()
                .with_response_timeout_seconds(MAX_RESPONSE_TIMEOUT_SECONDS + 1)
                .response_timeout(),
            None
        );
        assert_eq!(
            task.with_response_timeout_seconds(MAX_RESPONSE_TIMEOUT_SECONDS)
                .response_timeout(),
            Some(Duration::from_secs(MAX_RESPONSE_TIMEOUT_SECONDS as u64))
        );
    }

    #[test]
    fn test_task_result_wire_format() {
        let mut extra = Map::new();
        extra.insert("logs".to_string(), json!(["started"]));

        let result = TaskResult {
            workflow_instance_id: "wf-1".to_string(),
            task_id: "t-1".to_string(),
            status: TaskStatus::InProgress,
            output_data: Map::new(),
            reason_for_incompletion: None,
            callback_after_seconds: Some(60),
            extra,
        };

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            json!({
                "workflowInstanceId": "wf-1",
                "taskId": "t-1",
                "status": "IN_PROGRESS",
                "outputData": {},
                "callbackAfterSeconds": 60,
                "logs": ["started"]
            })
        );
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
        assert_eq!(TaskStatus::Failed.to_string(), "FAILED");
    }
}
