//! In-memory repositories for tests and local development.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hookline_core::pipeline::{
    Pipeline, PipelineRun, Project, RunStatus, StageDefinition, TriggerCondition, TriggerMetadata,
};
use hookline_core::webhook::{NewDelivery, Webhook, WebhookDelivery};
use hookline_core::{DeliveryId, PipelineId, ProjectId, RunId, WebhookId};
use tokio::sync::RwLock;

use crate::repo::pipeline::check_transition;
use crate::{DbError, DbResult, PipelineRepo, ProjectRepo, WebhookRepo};

#[derive(Default)]
struct Tables {
    projects: HashMap<ProjectId, Project>,
    pipelines: HashMap<PipelineId, Pipeline>,
    runs: HashMap<RunId, PipelineRun>,
    webhooks: HashMap<WebhookId, Webhook>,
    deliveries: Vec<WebhookDelivery>,
}

/// Implements every repository trait over one set of in-memory tables.
#[derive(Default)]
pub struct MemoryRepos {
    tables: RwLock<Tables>,
}

impl MemoryRepos {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of runs stored across all pipelines.
    pub async fn run_count(&self) -> usize {
        self.tables.read().await.runs.len()
    }

    /// Number of delivery records stored across all webhooks.
    pub async fn delivery_count(&self) -> usize {
        self.tables.read().await.deliveries.len()
    }
}

#[async_trait]
impl ProjectRepo for MemoryRepos {
    async fn create(
        &self,
        name: &str,
        repository_url: &str,
        branch: Option<&str>,
    ) -> DbResult<Project> {
        let project = Project {
            id: ProjectId::new(),
            name: name.to_string(),
            repository_url: repository_url.to_string(),
            branch: branch.map(str::to_string),
        };
        self.tables
            .write()
            .await
            .projects
            .insert(project.id, project.clone());
        Ok(project)
    }

    async fn find(&self, id: ProjectId) -> DbResult<Option<Project>> {
        Ok(self.tables.read().await.projects.get(&id).cloned())
    }

    async fn list(&self) -> DbResult<Vec<Project>> {
        let mut projects: Vec<_> = self.tables.read().await.projects.values().cloned().collect();
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(projects)
    }
}

#[async_trait]
impl PipelineRepo for MemoryRepos {
    async fn create(
        &self,
        project_id: ProjectId,
        name: &str,
        trigger: TriggerCondition,
        stages: &[StageDefinition],
        active: bool,
    ) -> DbResult<Pipeline> {
        let mut tables = self.tables.write().await;
        if !tables.projects.contains_key(&project_id) {
            return Err(DbError::NotFound(format!("project {}", project_id)));
        }
        let pipeline = Pipeline {
            id: PipelineId::new(),
            project_id,
            name: name.to_string(),
            active,
            trigger,
            stages: stages.to_vec(),
            status: None,
            last_run_at: None,
        };
        tables.pipelines.insert(pipeline.id, pipeline.clone());
        Ok(pipeline)
    }

    async fn get_by_id(&self, id: PipelineId) -> DbResult<Option<Pipeline>> {
        Ok(self.tables.read().await.pipelines.get(&id).cloned())
    }

    async fn find_active_by_project(
        &self,
        project_id: ProjectId,
        triggers: &[TriggerCondition],
    ) -> DbResult<Vec<Pipeline>> {
        let mut found: Vec<_> = self
            .tables
            .read()
            .await
            .pipelines
            .values()
            .filter(|p| p.project_id == project_id && p.active && triggers.contains(&p.trigger))
            .cloned()
            .collect();
        found.sort_by_key(|p| p.id);
        Ok(found)
    }

    async fn update_cached_status(
        &self,
        id: PipelineId,
        status: RunStatus,
        last_run_at: Option<DateTime<Utc>>,
    ) -> DbResult<()> {
        let mut tables = self.tables.write().await;
        let pipeline = tables
            .pipelines
            .get_mut(&id)
            .ok_or_else(|| DbError::NotFound(format!("pipeline {}", id)))?;
        pipeline.status = Some(status);
        if last_run_at.is_some() {
            pipeline.last_run_at = last_run_at;
        }
        Ok(())
    }

    async fn create_run(
        &self,
        pipeline_id: PipelineId,
        trigger: &TriggerMetadata,
    ) -> DbResult<PipelineRun> {
        let mut tables = self.tables.write().await;
        if !tables.pipelines.contains_key(&pipeline_id) {
            return Err(DbError::NotFound(format!("pipeline {}", pipeline_id)));
        }
        let number = tables
            .runs
            .values()
            .filter(|r| r.pipeline_id == pipeline_id)
            .map(|r| r.number)
            .max()
            .unwrap_or(0)
            + 1;
        let run = PipelineRun {
            id: RunId::new(),
            pipeline_id,
            number,
            status: RunStatus::Pending,
            trigger: trigger.clone(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        tables.runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn get_run(&self, id: RunId) -> DbResult<Option<PipelineRun>> {
        Ok(self.tables.read().await.runs.get(&id).cloned())
    }

    async fn list_runs(&self, pipeline_id: PipelineId, limit: i64) -> DbResult<Vec<PipelineRun>> {
        let mut runs: Vec<_> = self
            .tables
            .read()
            .await
            .runs
            .values()
            .filter(|r| r.pipeline_id == pipeline_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.number.cmp(&a.number));
        runs.truncate(limit.max(0) as usize);
        Ok(runs)
    }

    async fn transition_run(
        &self,
        id: RunId,
        from: RunStatus,
        to: RunStatus,
    ) -> DbResult<Option<PipelineRun>> {
        check_transition(from, to)?;
        let mut tables = self.tables.write().await;
        let Some(run) = tables.runs.get_mut(&id) else {
            return Ok(None);
        };
        if run.status != from {
            return Ok(None);
        }
        let now = Utc::now();
        run.status = to;
        if to == RunStatus::Running {
            run.started_at = Some(now);
        }
        if to.is_terminal() {
            run.finished_at = Some(now);
        }
        Ok(Some(run.clone()))
    }
}

#[async_trait]
impl WebhookRepo for MemoryRepos {
    async fn create(
        &self,
        project_id: ProjectId,
        secret_ciphertext: &str,
        events: &[String],
    ) -> DbResult<Webhook> {
        let mut tables = self.tables.write().await;
        if !tables.projects.contains_key(&project_id) {
            return Err(DbError::NotFound(format!("project {}", project_id)));
        }
        let webhook = Webhook {
            id: WebhookId::new(),
            project_id,
            secret_ciphertext: secret_ciphertext.to_string(),
            events: events.to_vec(),
            active: true,
            last_triggered_at: None,
        };
        tables.webhooks.insert(webhook.id, webhook.clone());
        Ok(webhook)
    }

    async fn get_by_id(&self, id: WebhookId) -> DbResult<Option<Webhook>> {
        Ok(self.tables.read().await.webhooks.get(&id).cloned())
    }

    async fn set_active(&self, id: WebhookId, active: bool) -> DbResult<()> {
        let mut tables = self.tables.write().await;
        let webhook = tables
            .webhooks
            .get_mut(&id)
            .ok_or_else(|| DbError::NotFound(format!("webhook {}", id)))?;
        webhook.active = active;
        Ok(())
    }

    async fn touch_last_triggered(&self, id: WebhookId, at: DateTime<Utc>) -> DbResult<()> {
        if let Some(webhook) = self.tables.write().await.webhooks.get_mut(&id) {
            webhook.last_triggered_at = Some(at);
        }
        Ok(())
    }

    async fn record_delivery(&self, delivery: NewDelivery) -> DbResult<WebhookDelivery> {
        let record = WebhookDelivery {
            id: DeliveryId::new(),
            webhook_id: delivery.webhook_id,
            event_type: delivery.event_type,
            payload: delivery.payload,
            outcome: delivery.outcome,
            response: delivery.response,
            error: delivery.error,
            attempt: delivery.attempt,
            created_at: Utc::now(),
        };
        self.tables.write().await.deliveries.push(record.clone());
        Ok(record)
    }

    async fn list_deliveries(
        &self,
        webhook_id: WebhookId,
        limit: i64,
    ) -> DbResult<Vec<WebhookDelivery>> {
        // Stored in insertion order; ids are v7 so newest is last.
        let deliveries = self
            .tables
            .read()
            .await
            .deliveries
            .iter()
            .rev()
            .filter(|d| d.webhook_id == webhook_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        Ok(deliveries)
    }

    async fn prune_deliveries(&self, older_than: DateTime<Utc>) -> DbResult<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.deliveries.len();
        tables.deliveries.retain(|d| d.created_at >= older_than);
        Ok((before - tables.deliveries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookline_core::webhook::DeliveryOutcome;

    async fn seeded() -> (MemoryRepos, Project, Pipeline) {
        let repos = MemoryRepos::new();
        let project = ProjectRepo::create(&repos, "web", "https://git.example.com/web", None)
            .await
            .unwrap();
        let pipeline = PipelineRepo::create(
            &repos,
            project.id,
            "ci",
            TriggerCondition::Push,
            &[],
            true,
        )
        .await
        .unwrap();
        (repos, project, pipeline)
    }

    #[tokio::test]
    async fn test_run_numbers_increment_per_pipeline() {
        let (repos, project, pipeline) = seeded().await;
        let other = PipelineRepo::create(
            &repos,
            project.id,
            "nightly",
            TriggerCondition::Schedule,
            &[],
            true,
        )
        .await
        .unwrap();

        let meta = TriggerMetadata::default();
        let first = repos.create_run(pipeline.id, &meta).await.unwrap();
        let second = repos.create_run(pipeline.id, &meta).await.unwrap();
        let other_first = repos.create_run(other.id, &meta).await.unwrap();

        assert_eq!(first.number, 1);
        assert_eq!(second.number, 2);
        assert_eq!(other_first.number, 1);
        assert_eq!(first.status, RunStatus::Pending);

        let listed = repos.list_runs(pipeline.id, 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].number, 2);
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_set() {
        let (repos, _, pipeline) = seeded().await;
        let run = repos
            .create_run(pipeline.id, &TriggerMetadata::default())
            .await
            .unwrap();

        let running = repos
            .transition_run(run.id, RunStatus::Pending, RunStatus::Running)
            .await
            .unwrap()
            .unwrap();
        assert!(running.started_at.is_some());

        // Stale `from` loses.
        let stale = repos
            .transition_run(run.id, RunStatus::Pending, RunStatus::Cancelled)
            .await
            .unwrap();
        assert!(stale.is_none());

        let done = repos
            .transition_run(run.id, RunStatus::Running, RunStatus::Success)
            .await
            .unwrap()
            .unwrap();
        assert!(done.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_illegal_transition_rejected() {
        let (repos, _, pipeline) = seeded().await;
        let run = repos
            .create_run(pipeline.id, &TriggerMetadata::default())
            .await
            .unwrap();
        let err = repos
            .transition_run(run.id, RunStatus::Pending, RunStatus::Success)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidData(_)));
    }

    #[tokio::test]
    async fn test_find_active_by_trigger() {
        let (repos, project, pipeline) = seeded().await;
        PipelineRepo::create(
            &repos,
            project.id,
            "disabled",
            TriggerCondition::Push,
            &[],
            false,
        )
        .await
        .unwrap();
        let pr = PipelineRepo::create(
            &repos,
            project.id,
            "pr",
            TriggerCondition::PullRequest,
            &[],
            true,
        )
        .await
        .unwrap();

        let push = repos
            .find_active_by_project(
                project.id,
                &[TriggerCondition::Push, TriggerCondition::Webhook],
            )
            .await
            .unwrap();
        assert_eq!(push.len(), 1);
        assert_eq!(push[0].id, pipeline.id);

        let prs = repos
            .find_active_by_project(project.id, &[TriggerCondition::PullRequest])
            .await
            .unwrap();
        assert_eq!(prs.len(), 1);
        assert_eq!(prs[0].id, pr.id);
    }

    #[tokio::test]
    async fn test_deliveries_listed_newest_first_and_pruned() {
        let (repos, project, _) = seeded().await;
        let webhook = WebhookRepo::create(&repos, project.id, "ciphertext", &[])
            .await
            .unwrap();

        for attempt in 1..=3 {
            repos
                .record_delivery(NewDelivery {
                    webhook_id: webhook.id,
                    event_type: "push".to_string(),
                    payload: serde_json::json!({}),
                    outcome: DeliveryOutcome::Success,
                    response: None,
                    error: None,
                    attempt,
                })
                .await
                .unwrap();
        }

        let listed = repos.list_deliveries(webhook.id, 2).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].attempt, 3);

        let pruned = repos
            .prune_deliveries(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(pruned, 3);
        assert_eq!(repos.delivery_count().await, 0);
    }
}
