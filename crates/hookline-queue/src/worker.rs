//! Worker that claims jobs of one kind and drives them to completion.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hookline_core::job::{Job, JobKind, JobStatus, QueueName, QueueOptions};
use tokio::sync::{Notify, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::processor::{JobHandler, run_job};
use crate::store::{JobStore, later};

const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

/// A worker that claims and executes jobs.
pub(crate) struct Worker {
    pub id: String,
    pub queue: QueueName,
    pub kind: JobKind,
    pub store: Arc<dyn JobStore>,
    pub handler: Arc<dyn JobHandler>,
    pub options: QueueOptions,
    pub poll_interval: Duration,
    pub lease: Duration,
    pub wake: Arc<Notify>,
    pub shutdown: watch::Receiver<bool>,
}

impl Worker {
    /// Run the worker loop until shutdown is signalled. A job already claimed
    /// is always finished before the loop exits.
    pub async fn run(mut self) {
        info!(worker_id = %self.id, queue = %self.queue, kind = %self.kind, "Starting worker");

        loop {
            // A dropped sender means the manager is gone.
            if *self.shutdown.borrow() || self.shutdown.has_changed().is_err() {
                break;
            }

            match self
                .store
                .claim(self.queue, &[self.kind], &self.id, self.lease)
                .await
            {
                Ok(Some(job)) => {
                    debug!(worker_id = %self.id, job_id = %job.id, "Claimed job");
                    self.process(job).await;
                }
                Ok(None) => self.idle(self.poll_interval).await,
                Err(e) => {
                    warn!(worker_id = %self.id, error = %e, "Failed to claim job");
                    self.idle(self.poll_interval * 5).await;
                }
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    /// Wait for an enqueue notification, the poll interval, or shutdown.
    async fn idle(&mut self, timeout: Duration) {
        tokio::select! {
            _ = self.wake.notified() => {}
            _ = sleep(timeout) => {}
            _ = self.shutdown.changed() => {}
        }
    }

    async fn process(&self, job: Job) {
        let run = run_job(self.handler.clone(), job.clone());
        tokio::pin!(run);

        let mut heartbeat = tokio::time::interval((self.lease / 2).max(MIN_HEARTBEAT));
        heartbeat.tick().await;

        let outcome = loop {
            tokio::select! {
                outcome = &mut run => break outcome,
                _ = heartbeat.tick() => {
                    match self.store.extend_lease(job.id, &self.id, self.lease).await {
                        Ok(true) => {}
                        Ok(false) => warn!(job_id = %job.id, worker_id = %self.id, "Lease lost while job running"),
                        Err(e) => warn!(job_id = %job.id, error = %e, "Failed to extend lease"),
                    }
                }
            }
        };

        match outcome {
            Ok(()) => self.complete(&job).await,
            Err(reason) => self.fail(&job, &reason).await,
        }
    }

    async fn complete(&self, job: &Job) {
        match self.store.complete(job.id, &self.id).await {
            Ok(Some(_)) => {
                self.trim(JobStatus::Completed, self.options.keep_completed)
                    .await
            }
            Ok(None) => {
                warn!(job_id = %job.id, worker_id = %self.id, "Job completed after its lease was lost")
            }
            Err(e) => error!(job_id = %job.id, error = %e, "Failed to mark job complete"),
        }
    }

    async fn fail(&self, job: &Job, reason: &str) {
        let attempts = job.attempts_made + 1;
        let retry_at = if attempts < job.max_attempts {
            match later(Utc::now(), job.backoff.delay_for(attempts)) {
                Ok(at) => Some(at),
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Retry delay out of range, failing job");
                    None
                }
            }
        } else {
            None
        };

        match self.store.fail(job.id, &self.id, reason, retry_at).await {
            Ok(Some(updated)) if updated.status == JobStatus::Delayed => {
                info!(
                    job_id = %job.id,
                    attempts_made = updated.attempts_made,
                    max_attempts = updated.max_attempts,
                    retry_at = %updated.run_at,
                    "Job failed, retry scheduled"
                );
            }
            Ok(Some(updated)) => {
                error!(
                    job_id = %job.id,
                    queue = %job.queue,
                    kind = %job.kind,
                    attempts_made = updated.attempts_made,
                    reason,
                    "Job failed permanently"
                );
                self.handler.on_exhausted(&updated).await;
                self.trim(JobStatus::Failed, self.options.keep_failed).await;
            }
            Ok(None) => {
                warn!(job_id = %job.id, worker_id = %self.id, "Job failed after its lease was lost")
            }
            Err(e) => error!(job_id = %job.id, error = %e, "Failed to record job failure"),
        }
    }

    async fn trim(&self, status: JobStatus, keep: u32) {
        match self.store.trim(self.queue, status, keep).await {
            Ok(0) => {}
            Ok(removed) => {
                debug!(queue = %self.queue, %status, removed, "Trimmed finished jobs past retention")
            }
            Err(e) => warn!(queue = %self.queue, error = %e, "Failed to trim finished jobs"),
        }
    }
}
