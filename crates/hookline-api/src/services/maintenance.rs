//! `prune-deliveries`: drop old webhook delivery audit records.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use hookline_core::job::Job;
use hookline_db::WebhookRepo;
use hookline_queue::{JobHandler, MaintenancePayload};
use tracing::info;

const DEFAULT_RETAIN_DAYS: u64 = 30;

pub struct PruneDeliveries {
    webhooks: Arc<dyn WebhookRepo>,
}

impl PruneDeliveries {
    pub fn new(webhooks: Arc<dyn WebhookRepo>) -> Self {
        Self { webhooks }
    }
}

#[async_trait]
impl JobHandler for PruneDeliveries {
    async fn handle(&self, job: &Job) -> anyhow::Result<()> {
        let payload = MaintenancePayload::from_job(job)?;
        let days = payload.retain_days.unwrap_or(DEFAULT_RETAIN_DAYS);
        let cutoff = i64::try_from(days)
            .ok()
            .and_then(chrono::Duration::try_days)
            .and_then(|retain| Utc::now().checked_sub_signed(retain))
            .ok_or_else(|| anyhow::anyhow!("retention of {} days is out of range", days))?;

        let removed = self.webhooks.prune_deliveries(cutoff).await?;
        info!(removed, retain_days = days, "Pruned webhook deliveries");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::pipeline_trigger::tests::queue;
    use hookline_core::job::{JobKind, JobOptions, QueueName};
    use hookline_core::webhook::{DeliveryOutcome, NewDelivery};
    use hookline_db::{MemoryRepos, ProjectRepo};

    #[tokio::test]
    async fn test_recent_deliveries_survive() {
        let repos = Arc::new(MemoryRepos::new());
        let project = ProjectRepo::create(&*repos, "app", "https://github.com/acme/app", None)
            .await
            .unwrap();
        let webhook = WebhookRepo::create(&*repos, project.id, "sealed", &[])
            .await
            .unwrap();
        repos
            .record_delivery(NewDelivery {
                webhook_id: webhook.id,
                event_type: "push".into(),
                payload: serde_json::json!({}),
                outcome: DeliveryOutcome::Success,
                response: None,
                error: None,
                attempt: 1,
            })
            .await
            .unwrap();

        let job = queue()
            .enqueue(
                QueueName::Maintenance,
                JobKind::PruneDeliveries,
                serde_json::json!({"retainDays": 1}),
                JobOptions::default(),
            )
            .await
            .unwrap();
        PruneDeliveries::new(repos.clone()).handle(&job).await.unwrap();
        assert_eq!(repos.delivery_count().await, 1);
    }

    #[tokio::test]
    async fn test_oversized_retention_fails_job() {
        let repos = Arc::new(MemoryRepos::new());
        let job = queue()
            .enqueue(
                QueueName::Maintenance,
                JobKind::PruneDeliveries,
                serde_json::json!({ "retainDays": u64::MAX }),
                JobOptions::default(),
            )
            .await
            .unwrap();
        assert!(PruneDeliveries::new(repos).handle(&job).await.is_err());
    }
}
