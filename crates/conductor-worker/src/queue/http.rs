//! HTTP implementation of QueueService against the Conductor task REST API

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use tracing::{debug, instrument};

use super::service::{QueueError, QueueService};
use super::types::{Task, TaskResult};

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Queue service reached over HTTP
///
/// Endpoints (relative to the base URL, e.g. `http://localhost:8080/api`):
/// - poll: `GET /tasks/poll/batch/{taskType}?workerid=..&count=..`
/// - ack: `POST /tasks/{taskId}/ack?workerid=..`
/// - update: `POST /tasks` with the [`TaskResult`] as JSON body
#[derive(Debug, Clone)]
pub struct HttpQueueService {
    base_url: Url,
    http: reqwest::Client,
}

impl HttpQueueService {
    /// Create a client with the default request timeout
    pub fn new(base_url: &str) -> Result<Self, QueueError> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a client with a custom request timeout
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, QueueError> {
        let trimmed = base_url.trim_end_matches('/');
        let base_url = Url::parse(trimmed).map_err(|e| QueueError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(QueueError::InvalidBaseUrl {
                url: base_url.to_string(),
                reason: "URL cannot be used as a base".to_string(),
            });
        }

        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url, http })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, QueueError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| QueueError::InvalidBaseUrl {
                url: self.base_url.to_string(),
                reason: "URL cannot be used as a base".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, QueueError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(QueueError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl QueueService for HttpQueueService {
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    async fn poll(
        &self,
        task_type: &str,
        worker_id: &str,
        count: usize,
    ) -> Result<Vec<Task>, QueueError> {
        let url = self.endpoint(&["tasks", "poll", "batch", task_type])?;
        let count = count.to_string();
        let response = self
            .http
            .get(url)
            .query(&[("workerid", worker_id), ("count", count.as_str())])
            .send()
            .await?;
        let response = Self::check(response).await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(vec![]);
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(vec![]);
        }

        let tasks: Vec<Task> = serde_json::from_str(&body)?;
        debug!(count = tasks.len(), "Poll response decoded");
        Ok(tasks)
    }

    #[instrument(skip(self))]
    async fn ack(&self, task_id: &str, worker_id: &str) -> Result<bool, QueueError> {
        let url = self.endpoint(&["tasks", task_id, "ack"])?;
        let response = self
            .http
            .post(url)
            .query(&[("workerid", worker_id)])
            .send()
            .await?;
        let response = Self::check(response).await?;
        let body = response.text().await?;
        parse_ack_body(&body)
    }

    #[instrument(skip(self, result), fields(task_id = %result.task_id, status = %result.status))]
    async fn update(&self, result: &TaskResult) -> Result<(), QueueError> {
        let url = self.endpoint(&["tasks"])?;
        let response = self.http.post(url).json(result).send().await?;
        Self::check(response).await?;
        Ok(())
    }
}

/// Ack responses come back as `true`/`false`, sometimes quoted
///
/// An empty 2xx body counts as confirmed.
fn parse_ack_body(body: &str) -> Result<bool, QueueError> {
    let body = body.trim();
    if body.is_empty() {
        return Ok(true);
    }

    match serde_json::from_str::<serde_json::Value>(body)? {
        serde_json::Value::Bool(acked) => Ok(acked),
        serde_json::Value::String(s) => Ok(s.eq_ignore_ascii_case("true")),
        other => Err(QueueError::Api {
            status: 200,
            message: format!("unexpected ack response: {other}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_segments() {
        let service = HttpQueueService::new("http://localhost:8080/api/").unwrap();
        let url = service.endpoint(&["tasks", "poll", "batch", "send_email"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/api/tasks/poll/batch/send_email");
    }

    #[test]
    fn test_endpoint_escapes_segments() {
        let service = HttpQueueService::new("http://localhost:8080/api").unwrap();
        let url = service.endpoint(&["tasks", "a b/c", "ack"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/api/tasks/a%20b%2Fc/ack");
    }

    #[test]
    fn test_invalid_base_url() {
        let err = HttpQueueService::new("not a url").unwrap_err();
        assert!(matches!(err, QueueError::InvalidBaseUrl { .. }));

        let err = HttpQueueService::new("mailto:ops@example.com").unwrap_err();
        assert!(matches!(err, QueueError::InvalidBaseUrl { .. }));
    }

    #[test]
    fn test_parse_ack_body() {
        assert!(parse_ack_body("true").unwrap());
        assert!(!parse_ack_body("false").unwrap());
        assert!(parse_ack_body("\"true\"").unwrap());
        assert!(parse_ack_body("  ").unwrap());
        assert!(parse_ack_body("{\"ok\":1}").is_err());
    }
}
