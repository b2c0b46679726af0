//! `execute-pipeline` job handler.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hookline_core::executor::{CancelFlag, StageExecutor};
use hookline_core::job::Job;
use hookline_core::pipeline::{PipelineJobPayload, RunStatus};
use hookline_core::{Error, RunId};
use hookline_queue::JobHandler;
use tracing::{error, info, warn};

use super::pipeline_trigger::{PipelineTrigger, TriggerResult};

const CANCEL_POLL: Duration = Duration::from_secs(2);

/// Drives one pipeline run from PENDING to a terminal state.
///
/// A stage failure marks the run FAILED and completes the job; only
/// infrastructure errors (repository, payload) fail the job and let the
/// queue retry it. A retried job resumes a run left RUNNING. Once the job
/// is out of attempts, stalls included, an unfinished run is marked FAILED.
pub struct ExecutePipeline {
    trigger: Arc<PipelineTrigger>,
    executor: Arc<dyn StageExecutor>,
    cancel_poll: Duration,
}

impl ExecutePipeline {
    pub fn new(trigger: Arc<PipelineTrigger>, executor: Arc<dyn StageExecutor>) -> Self {
        Self {
            trigger,
            executor,
            cancel_poll: CANCEL_POLL,
        }
    }

    pub fn with_cancel_poll(mut self, interval: Duration) -> Self {
        self.cancel_poll = interval;
        self
    }

    /// Move a run whose job will not run again to FAILED.
    async fn fail_run(&self, id: RunId) -> TriggerResult<()> {
        let run = self.trigger.get_run(id).await?;
        if run.status == RunStatus::Pending {
            self.trigger
                .transition(id, RunStatus::Pending, RunStatus::Running)
                .await?;
        }
        if self
            .trigger
            .transition(id, RunStatus::Running, RunStatus::Failed)
            .await?
            .is_some()
        {
            warn!(run_id = %id, "Run failed, its job ran out of attempts");
        }
        Ok(())
    }

    /// Raise `flag` once the run is seen CANCELLED.
    async fn watch_cancellation(trigger: Arc<PipelineTrigger>, id: RunId, flag: CancelFlag, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match trigger.get_run(id).await {
                Ok(run) if run.status == RunStatus::Cancelled => {
                    info!(run_id = %id, "Cancellation observed");
                    flag.cancel();
                    return;
                }
                Ok(run) if run.status.is_terminal() => return,
                Ok(_) => {}
                Err(e) => warn!(run_id = %id, error = %e, "Failed to poll run status"),
            }
        }
    }
}

#[async_trait]
impl JobHandler for ExecutePipeline {
    async fn handle(&self, job: &Job) -> anyhow::Result<()> {
        let payload: PipelineJobPayload = serde_json::from_value(job.payload.clone())?;
        let id = payload.pipeline_run_id;
        let run = self.trigger.get_run(id).await?;

        match run.status {
            RunStatus::Pending => {
                if self
                    .trigger
                    .transition(id, RunStatus::Pending, RunStatus::Running)
                    .await?
                    .is_none()
                {
                    info!(run_id = %id, "Run left PENDING before start, skipping");
                    return Ok(());
                }
            }
            RunStatus::Running => {
                info!(run_id = %id, "Resuming run left RUNNING by an earlier attempt");
            }
            status => {
                info!(run_id = %id, %status, "Run already finished, skipping");
                return Ok(());
            }
        }

        let cancel = CancelFlag::new();
        let watcher = tokio::spawn(Self::watch_cancellation(
            self.trigger.clone(),
            id,
            cancel.clone(),
            self.cancel_poll,
        ));
        let result = self.executor.execute(&payload, cancel.clone()).await;
        watcher.abort();

        match result {
            Ok(()) => {
                if self
                    .trigger
                    .transition(id, RunStatus::Running, RunStatus::Success)
                    .await?
                    .is_none()
                {
                    info!(run_id = %id, "Run cancelled while executing");
                }
            }
            Err(Error::Cancelled) => {
                info!(run_id = %id, executor = self.executor.name(), "Run stopped after cancellation");
            }
            Err(e) => {
                warn!(run_id = %id, executor = self.executor.name(), error = %e, "Pipeline run failed");
                self.trigger
                    .transition(id, RunStatus::Running, RunStatus::Failed)
                    .await?;
            }
        }
        Ok(())
    }

    async fn on_exhausted(&self, job: &Job) {
        let payload: PipelineJobPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Exhausted job has no run to close");
                return;
            }
        };
        let id = payload.pipeline_run_id;
        if let Err(e) = self.fail_run(id).await {
            error!(job_id = %job.id, run_id = %id, error = %e, "Failed to close run of exhausted job");
        }
    }
}
