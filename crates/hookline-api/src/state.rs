//! Application state.

use std::sync::Arc;

use hookline_core::executor::StageExecutor;
use hookline_core::job::{JobKind, QueueName};
use hookline_core::secret::SecretCipher;
use hookline_db::{
    MemoryRepos, PgPipelineRepo, PgProjectRepo, PgWebhookRepo, PipelineRepo, ProjectRepo,
    WebhookRepo,
};
use hookline_queue::{PurgeJobHistory, QueueManager, QueueResult, RecoverStalled};
use sqlx::PgPool;

use crate::services::{ExecutePipeline, PipelineTrigger, PruneDeliveries, WebhookProcessor};
use crate::ws::WsHub;

/// Repository handles shared by routes and services.
#[derive(Clone)]
pub struct Repos {
    pub projects: Arc<dyn ProjectRepo>,
    pub pipelines: Arc<dyn PipelineRepo>,
    pub webhooks: Arc<dyn WebhookRepo>,
}

impl Repos {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            projects: Arc::new(PgProjectRepo::new(pool.clone())),
            pipelines: Arc::new(PgPipelineRepo::new(pool.clone())),
            webhooks: Arc::new(PgWebhookRepo::new(pool)),
        }
    }

    pub fn memory(repos: Arc<MemoryRepos>) -> Self {
        Self {
            projects: repos.clone(),
            pipelines: repos.clone(),
            webhooks: repos,
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Absent when running on in-memory repositories.
    pub pool: Option<PgPool>,
    pub repos: Repos,
    pub queue: QueueManager,
    pub hub: WsHub,
    pub trigger: Arc<PipelineTrigger>,
    pub webhooks: Arc<WebhookProcessor>,
}

impl AppState {
    pub fn new(
        pool: Option<PgPool>,
        repos: Repos,
        queue: QueueManager,
        cipher: Arc<dyn SecretCipher>,
    ) -> Self {
        let hub = WsHub::default();
        let trigger = Arc::new(PipelineTrigger::new(
            repos.projects.clone(),
            repos.pipelines.clone(),
            queue.clone(),
            Arc::new(hub.clone()),
        ));
        let webhooks = Arc::new(WebhookProcessor::new(
            repos.webhooks.clone(),
            repos.projects.clone(),
            repos.pipelines.clone(),
            cipher,
            trigger.clone(),
        ));

        Self {
            pool,
            repos,
            queue,
            hub,
            trigger,
            webhooks,
        }
    }

    /// Register a handler for every job kind. Concurrency comes from each
    /// queue's configuration.
    pub async fn register_processors(&self, executor: Arc<dyn StageExecutor>) -> QueueResult<()> {
        self.queue
            .register_processor(
                QueueName::PipelineExecution,
                JobKind::ExecutePipeline,
                Arc::new(ExecutePipeline::new(self.trigger.clone(), executor)),
                0,
            )
            .await?;
        self.queue
            .register_processor(
                QueueName::Maintenance,
                JobKind::PurgeJobHistory,
                Arc::new(PurgeJobHistory::new(self.queue.clone())),
                0,
            )
            .await?;
        self.queue
            .register_processor(
                QueueName::Maintenance,
                JobKind::PruneDeliveries,
                Arc::new(PruneDeliveries::new(self.repos.webhooks.clone())),
                0,
            )
            .await?;
        self.queue
            .register_processor(
                QueueName::Maintenance,
                JobKind::RecoverStalled,
                Arc::new(RecoverStalled::new(self.queue.clone())),
                0,
            )
            .await?;
        Ok(())
    }
}
