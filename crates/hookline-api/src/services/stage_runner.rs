//! HTTP client for the stage-execution service.

use std::time::Duration;

use async_trait::async_trait;
use hookline_core::executor::{CancelFlag, StageExecutor};
use hookline_core::pipeline::PipelineJobPayload;
use hookline_core::{Error, Result};
use tracing::info;

/// Hands pipeline runs to a remote runner by POSTing the job payload.
pub struct HttpStageExecutor {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpStageExecutor {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl StageExecutor for HttpStageExecutor {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn execute(&self, payload: &PipelineJobPayload, cancel: CancelFlag) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        info!(
            run_id = %payload.pipeline_run_id,
            endpoint = %self.endpoint,
            stages = payload.stages.len(),
            "Dispatching pipeline run"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(payload)
            .send()
            .await
            .map_err(|e| Error::ExecutionFailed(format!("runner unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ExecutionFailed(format!(
                "runner returned {}: {}",
                status, body
            )));
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookline_core::{PipelineId, ProjectId, RunId};

    fn payload() -> PipelineJobPayload {
        PipelineJobPayload {
            pipeline_id: PipelineId::new(),
            pipeline_run_id: RunId::new(),
            project_id: ProjectId::new(),
            repository_url: "https://github.com/acme/app".into(),
            branch: "main".into(),
            stages: vec![],
            triggered_by: "alice".into(),
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_dispatch() {
        let executor =
            HttpStageExecutor::new("http://127.0.0.1:9/runs", Duration::from_secs(1)).unwrap();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = executor.execute(&payload(), cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_unreachable_runner_fails() {
        // Port 9 (discard) is closed on test hosts.
        let executor =
            HttpStageExecutor::new("http://127.0.0.1:9/runs", Duration::from_secs(1)).unwrap();
        let err = executor
            .execute(&payload(), CancelFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExecutionFailed(_)));
    }
}
