//! Pipeline run creation and the run lifecycle.

use std::sync::Arc;

use chrono::Utc;
use hookline_core::events::{BroadcastEvent, Broadcaster, EventType};
use hookline_core::job::{JobKind, JobOptions, QueueName};
use hookline_core::pipeline::{
    Pipeline, PipelineJobPayload, PipelineRun, Project, RunStatus, TriggerMetadata,
};
use hookline_core::RunId;
use hookline_db::{DbError, PipelineRepo, ProjectRepo};
use hookline_queue::QueueManager;
use tracing::{error, info, warn};

/// Errors raised while creating or moving pipeline runs.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("pipeline run {0} not found")]
    RunNotFound(RunId),

    #[error(transparent)]
    Core(#[from] hookline_core::Error),

    #[error(transparent)]
    Db(#[from] DbError),
}

pub type TriggerResult<T> = std::result::Result<T, TriggerError>;

/// Creates runs, hands them to the execution queue and applies status
/// changes, broadcasting each one.
pub struct PipelineTrigger {
    projects: Arc<dyn ProjectRepo>,
    pipelines: Arc<dyn PipelineRepo>,
    queue: QueueManager,
    broadcaster: Arc<dyn Broadcaster>,
}

impl PipelineTrigger {
    pub fn new(
        projects: Arc<dyn ProjectRepo>,
        pipelines: Arc<dyn PipelineRepo>,
        queue: QueueManager,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            projects,
            pipelines,
            queue,
            broadcaster,
        }
    }

    /// Start a new run of `pipeline`.
    ///
    /// The run is stored before the execution job is enqueued. If the
    /// enqueue fails the run is kept and stays PENDING.
    pub async fn trigger(
        &self,
        project: &Project,
        pipeline: &Pipeline,
        trigger: TriggerMetadata,
    ) -> TriggerResult<PipelineRun> {
        let run = self.pipelines.create_run(pipeline.id, &trigger).await?;
        self.pipelines
            .update_cached_status(pipeline.id, RunStatus::Pending, Some(Utc::now()))
            .await?;

        info!(
            pipeline_id = %pipeline.id,
            run_id = %run.id,
            run_number = run.number,
            branch = %trigger.branch,
            triggered_by = %trigger.triggered_by,
            "Pipeline run created"
        );

        self.broadcaster.publish(BroadcastEvent::for_run(
            EventType::PipelineRunCreated,
            project,
            pipeline,
            &run,
        ));

        let payload = PipelineJobPayload {
            pipeline_id: pipeline.id,
            pipeline_run_id: run.id,
            project_id: project.id,
            repository_url: trigger.repository_url.clone(),
            branch: trigger.branch.clone(),
            stages: pipeline.stages.clone(),
            triggered_by: trigger.triggered_by.clone(),
        };
        let enqueued = match serde_json::to_value(&payload) {
            Ok(payload) => {
                self.queue
                    .enqueue(
                        QueueName::PipelineExecution,
                        JobKind::ExecutePipeline,
                        payload,
                        JobOptions::default(),
                    )
                    .await
            }
            Err(e) => Err(e.into()),
        };
        if let Err(e) = enqueued {
            error!(
                run_id = %run.id,
                error = %e,
                "Failed to enqueue pipeline execution, run left pending"
            );
        }

        Ok(run)
    }

    pub async fn get_run(&self, id: RunId) -> TriggerResult<PipelineRun> {
        self.pipelines
            .get_run(id)
            .await?
            .ok_or(TriggerError::RunNotFound(id))
    }

    /// Move a run from `from` to `to`. Returns `None` when the run had
    /// already left `from`.
    pub async fn transition(
        &self,
        id: RunId,
        from: RunStatus,
        to: RunStatus,
    ) -> TriggerResult<Option<PipelineRun>> {
        if !from.can_transition_to(to) {
            return Err(hookline_core::Error::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            }
            .into());
        }
        let Some(run) = self.pipelines.transition_run(id, from, to).await? else {
            return Ok(None);
        };

        info!(run_id = %id, from = %from, to = %to, "Pipeline run status changed");
        self.publish_update(&run).await?;
        Ok(Some(run))
    }

    /// Cancel a PENDING or RUNNING run. Cancellation is cooperative: a
    /// worker executing the run notices and stops at its next check.
    pub async fn cancel(&self, id: RunId) -> TriggerResult<PipelineRun> {
        loop {
            let run = self.get_run(id).await?;
            if !run.status.can_transition_to(RunStatus::Cancelled) {
                return Err(hookline_core::Error::InvalidTransition {
                    from: run.status.to_string(),
                    to: RunStatus::Cancelled.to_string(),
                }
                .into());
            }
            if let Some(run) = self
                .transition(id, run.status, RunStatus::Cancelled)
                .await?
            {
                return Ok(run);
            }
            // Status moved underneath us; look again.
        }
    }

    async fn publish_update(&self, run: &PipelineRun) -> TriggerResult<()> {
        self.pipelines
            .update_cached_status(run.pipeline_id, run.status, None)
            .await?;

        let Some(pipeline) = self.pipelines.get_by_id(run.pipeline_id).await? else {
            warn!(run_id = %run.id, "Pipeline of run vanished, update not broadcast");
            return Ok(());
        };
        let Some(project) = self.projects.find(pipeline.project_id).await? else {
            warn!(run_id = %run.id, "Project of run vanished, update not broadcast");
            return Ok(());
        };
        self.broadcaster.publish(BroadcastEvent::for_run(
            EventType::PipelineRunUpdated,
            &project,
            &pipeline,
            run,
        ));
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use hookline_config::WorkerConfig;
    use hookline_core::job::JobStatus;
    use hookline_core::pipeline::TriggerCondition;
    use hookline_db::MemoryRepos;
    use hookline_queue::MemoryJobStore;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Broadcaster that remembers everything it was handed.
    #[derive(Default)]
    pub(crate) struct Recorder(pub Mutex<Vec<BroadcastEvent>>);

    impl Broadcaster for Recorder {
        fn publish(&self, event: BroadcastEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    pub(crate) fn queue() -> QueueManager {
        QueueManager::new(
            Arc::new(MemoryJobStore::new()),
            BTreeMap::new(),
            WorkerConfig {
                poll_interval_ms: 10,
                lease_ms: 1000,
                stall_check_ms: 1000,
            },
        )
    }

    struct Fixture {
        repos: Arc<MemoryRepos>,
        queue: QueueManager,
        events: Arc<Recorder>,
        trigger: PipelineTrigger,
        project: Project,
        pipeline: Pipeline,
    }

    async fn fixture() -> Fixture {
        let repos = Arc::new(MemoryRepos::new());
        let queue = queue();
        let events = Arc::new(Recorder::default());
        let trigger = PipelineTrigger::new(
            repos.clone(),
            repos.clone(),
            queue.clone(),
            events.clone(),
        );
        let project = ProjectRepo::create(&*repos, "app", "https://github.com/acme/app", None)
            .await
            .unwrap();
        let pipeline = PipelineRepo::create(
            &*repos,
            project.id,
            "ci",
            TriggerCondition::Push,
            &[],
            true,
        )
        .await
        .unwrap();
        Fixture {
            repos,
            queue,
            events,
            trigger,
            project,
            pipeline,
        }
    }

    fn metadata() -> TriggerMetadata {
        TriggerMetadata {
            branch: "main".into(),
            commit_hash: "abc123".into(),
            repository_url: "https://github.com/acme/app".into(),
            triggered_by: "alice".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_trigger_creates_run_and_job() {
        let f = fixture().await;
        let run = f
            .trigger
            .trigger(&f.project, &f.pipeline, metadata())
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.number, 1);

        let pipeline = PipelineRepo::get_by_id(&*f.repos, f.pipeline.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pipeline.status, Some(RunStatus::Pending));
        assert!(pipeline.last_run_at.is_some());

        let events = f.events.0.lock().unwrap().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::PipelineRunCreated);
        assert_eq!(events[0].pipeline_run_id, run.id);

        let jobs = f
            .queue
            .list_jobs(QueueName::PipelineExecution, Some(JobStatus::Waiting), 10)
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);
        let payload: PipelineJobPayload = serde_json::from_value(jobs[0].payload.clone()).unwrap();
        assert_eq!(payload.pipeline_run_id, run.id);
        assert_eq!(payload.triggered_by, "alice");
    }

    #[tokio::test]
    async fn test_enqueue_failure_keeps_pending_run() {
        let f = fixture().await;
        f.queue.drain_and_close().await;

        let run = f
            .trigger
            .trigger(&f.project, &f.pipeline, metadata())
            .await
            .unwrap();
        let stored = f.trigger.get_run(run.id).await.unwrap();
        assert_eq!(stored.status, RunStatus::Pending);
    }

    #[tokio::test]
    async fn test_cancel_then_cannot_revive() {
        let f = fixture().await;
        let run = f
            .trigger
            .trigger(&f.project, &f.pipeline, metadata())
            .await
            .unwrap();

        let cancelled = f.trigger.cancel(run.id).await.unwrap();
        assert_eq!(cancelled.status, RunStatus::Cancelled);
        assert!(cancelled.finished_at.is_some());

        // A late worker cannot move it on.
        let moved = f
            .trigger
            .transition(run.id, RunStatus::Pending, RunStatus::Running)
            .await
            .unwrap();
        assert!(moved.is_none());

        let err = f.trigger.cancel(run.id).await.unwrap_err();
        assert!(matches!(
            err,
            TriggerError::Core(hookline_core::Error::InvalidTransition { .. })
        ));

        let last = f.events.0.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.event_type, EventType::PipelineRunUpdated);
        assert_eq!(last.status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_illegal_transition_rejected() {
        let f = fixture().await;
        let run = f
            .trigger
            .trigger(&f.project, &f.pipeline, metadata())
            .await
            .unwrap();
        let err = f
            .trigger
            .transition(run.id, RunStatus::Pending, RunStatus::Success)
            .await
            .unwrap_err();
        assert!(matches!(err, TriggerError::Core(_)));
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let f = fixture().await;
        assert!(matches!(
            f.trigger.cancel(RunId::new()).await,
            Err(TriggerError::RunNotFound(_))
        ));
    }
}
