//! Handlers for queue housekeeping jobs.

use std::time::Duration;

use async_trait::async_trait;
use hookline_core::job::{Job, JobStatus, QueueName};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::manager::QueueManager;
use crate::processor::JobHandler;

const DEFAULT_GRACE_HOURS: u64 = 24 * 7;

/// Payload shared by every maintenance job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MaintenancePayload {
    pub grace_hours: Option<u64>,
    pub retain_days: Option<u64>,
}

impl MaintenancePayload {
    pub fn from_job(job: &Job) -> anyhow::Result<Self> {
        Ok(serde_json::from_value(job.payload.clone())?)
    }
}

/// `purge-job-history`: drop finished jobs older than the grace window
/// from every queue.
pub struct PurgeJobHistory {
    manager: QueueManager,
}

impl PurgeJobHistory {
    pub fn new(manager: QueueManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl JobHandler for PurgeJobHistory {
    async fn handle(&self, job: &Job) -> anyhow::Result<()> {
        let payload = MaintenancePayload::from_job(job)?;
        let hours = payload.grace_hours.unwrap_or(DEFAULT_GRACE_HOURS);
        let grace = hours
            .checked_mul(3600)
            .map(Duration::from_secs)
            .ok_or_else(|| anyhow::anyhow!("grace of {} hours is out of range", hours))?;

        let mut removed = 0;
        for queue in QueueName::ALL {
            for status in [JobStatus::Completed, JobStatus::Failed] {
                removed += self.manager.purge(queue, grace, status).await?.len();
            }
        }
        info!(removed, "Purged job history");
        Ok(())
    }
}

/// `recover-stalled`: sweep every queue for jobs whose lease expired,
/// including queues whose workers run in other processes.
pub struct RecoverStalled {
    manager: QueueManager,
}

impl RecoverStalled {
    pub fn new(manager: QueueManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl JobHandler for RecoverStalled {
    async fn handle(&self, _job: &Job) -> anyhow::Result<()> {
        for queue in QueueName::ALL {
            self.manager.recover_stalled(queue).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryJobStore;
    use hookline_config::WorkerConfig;
    use hookline_core::job::{JobKind, JobOptions};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_payload_defaults() {
        let manager = QueueManager::new(
            Arc::new(MemoryJobStore::new()),
            BTreeMap::new(),
            WorkerConfig {
                poll_interval_ms: 10,
                lease_ms: 1000,
                stall_check_ms: 1000,
            },
        );
        let job = manager
            .enqueue(
                QueueName::Maintenance,
                JobKind::PurgeJobHistory,
                serde_json::json!({"graceHours": 2}),
                JobOptions::default(),
            )
            .await
            .unwrap();

        let payload = MaintenancePayload::from_job(&job).unwrap();
        assert_eq!(payload.grace_hours, Some(2));
        assert_eq!(payload.retain_days, None);

        PurgeJobHistory::new(manager.clone())
            .handle(&job)
            .await
            .unwrap();
        RecoverStalled::new(manager).handle(&job).await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_grace_fails_job() {
        let manager = QueueManager::new(
            Arc::new(MemoryJobStore::new()),
            BTreeMap::new(),
            WorkerConfig {
                poll_interval_ms: 10,
                lease_ms: 1000,
                stall_check_ms: 1000,
            },
        );
        for hours in [u64::MAX, u64::MAX / 3600] {
            let job = manager
                .enqueue(
                    QueueName::Maintenance,
                    JobKind::PurgeJobHistory,
                    serde_json::json!({ "graceHours": hours }),
                    JobOptions::default(),
                )
                .await
                .unwrap();
            assert!(PurgeJobHistory::new(manager.clone()).handle(&job).await.is_err());
        }
    }
}
