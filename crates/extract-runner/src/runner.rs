use std::time::Duration;

use async_trait::async_trait;
use extract_core::config::RunnerConfig;
use extract_core::{JobId, TaskId};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, RunError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failure,
}

/// What the external runner says about one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub status: RunStatus,
    #[serde(default)]
    pub message: String,
}

impl RunReport {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Success,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Failure,
            message: message.into(),
        }
    }
}

/// The external process that actually extracts, transforms and loads.
///
/// Treated as a black box: the coordinator bounds every call with its own
/// timeout, and an `Err` counts the same as a reported failure.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Runner name for logging.
    fn name(&self) -> &str;

    async fn execute(&self, task_id: TaskId, job_id: &JobId) -> Result<RunReport>;
}

/// Runner reached over HTTP: `POST {base_url}/run/{task_id}/{job_id}`.
pub struct HttpTaskRunner {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTaskRunner {
    pub fn new(config: &RunnerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, task_id: TaskId, job_id: &JobId) -> String {
        format!("{}/run/{}/{}", self.base_url, task_id, job_id)
    }
}

#[async_trait]
impl TaskRunner for HttpTaskRunner {
    fn name(&self) -> &str {
        "http"
    }

    async fn execute(&self, task_id: TaskId, job_id: &JobId) -> Result<RunReport> {
        let url = self.endpoint(task_id, job_id);
        debug!(%url, "invoking task runner");

        let resp = self.client.post(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %text, "task runner error");
            return Err(RunError::RunnerFailure(format!(
                "runner returned HTTP {}: {}",
                status.as_u16(),
                text
            )));
        }

        let report: RunReport = resp
            .json()
            .await
            .map_err(|e| RunError::RunnerFailure(format!("unreadable runner response: {e}")))?;
        Ok(report)
    }
}
