//! Persistence seam for job queues.
//!
//! A [`JobStore`] is the shared durable state every worker instance talks
//! to. Claiming is atomic per job: two workers never receive the same job.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hookline_core::JobId;
use hookline_core::job::{Job, JobCounts, JobKind, JobStatus, QueueName};

use crate::{QueueError, QueueResult};

/// Failure reason recorded when a stalled job runs out of attempts.
pub const STALLED_REASON: &str = "job stalled more than allowable limit";

/// `at + by`, rejecting offsets chrono cannot represent.
pub(crate) fn later(at: DateTime<Utc>, by: Duration) -> QueueResult<DateTime<Utc>> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|by| at.checked_add_signed(by))
        .ok_or(QueueError::DurationOutOfRange(by))
}

/// `at - by`, rejecting offsets chrono cannot represent.
pub(crate) fn earlier(at: DateTime<Utc>, by: Duration) -> QueueResult<DateTime<Utc>> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|by| at.checked_sub_signed(by))
        .ok_or(QueueError::DurationOutOfRange(by))
}

/// Result of inserting a job.
#[derive(Debug, Clone)]
pub enum Inserted {
    Created(Job),
    /// A job with the same dedupe key already exists; that job is returned.
    Duplicate(Job),
}

impl Inserted {
    pub fn into_job(self) -> Job {
        match self {
            Inserted::Created(job) | Inserted::Duplicate(job) => job,
        }
    }
}

/// Jobs whose lease expired during a stall sweep.
#[derive(Debug, Clone, Default)]
pub struct StallReport {
    /// Returned to waiting for another attempt.
    pub requeued: Vec<Job>,
    /// Out of attempts; now failed.
    pub failed: Vec<Job>,
}

impl StallReport {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.failed.is_empty()
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: Job) -> QueueResult<Inserted>;

    /// Atomically claim the next eligible job of `queue` whose kind is in
    /// `kinds`: highest priority first, then earliest `run_at`, then oldest.
    /// Paused queues yield nothing.
    async fn claim(
        &self,
        queue: QueueName,
        kinds: &[JobKind],
        worker: &str,
        lease: Duration,
    ) -> QueueResult<Option<Job>>;

    /// Push the lease of a job held by `worker` forward. Returns `false` when
    /// the worker no longer holds the job.
    async fn extend_lease(&self, id: JobId, worker: &str, lease: Duration) -> QueueResult<bool>;

    /// Mark a job held by `worker` completed. `None` when the lease was lost.
    async fn complete(&self, id: JobId, worker: &str) -> QueueResult<Option<Job>>;

    /// Record a handler failure on a job held by `worker`. With `retry_at`
    /// set and attempts left the job becomes delayed until then; otherwise
    /// it is failed permanently. `None` when the lease was lost.
    async fn fail(
        &self,
        id: JobId,
        worker: &str,
        reason: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> QueueResult<Option<Job>>;

    /// Return active jobs whose lease expired before `now` to waiting,
    /// charging one attempt, or fail them when no attempts remain.
    async fn recover_stalled(&self, queue: QueueName, now: DateTime<Utc>)
    -> QueueResult<StallReport>;

    async fn get(&self, queue: QueueName, id: JobId) -> QueueResult<Option<Job>>;

    /// Newest first. An empty `statuses` slice matches every status.
    async fn list(
        &self,
        queue: QueueName,
        statuses: &[JobStatus],
        limit: i64,
    ) -> QueueResult<Vec<Job>>;

    /// Raw per-status counts; `paused` is always zero at this level.
    async fn counts(&self, queue: QueueName) -> QueueResult<JobCounts>;

    /// Move a failed job back to waiting with a fresh attempt budget.
    async fn retry(&self, queue: QueueName, id: JobId) -> QueueResult<Option<Job>>;

    /// Delete a job that is not active.
    async fn remove(&self, queue: QueueName, id: JobId) -> QueueResult<Option<Job>>;

    async fn set_paused(&self, queue: QueueName, paused: bool) -> QueueResult<()>;
    async fn is_paused(&self, queue: QueueName) -> QueueResult<bool>;

    /// Delete jobs in `status` that finished before `finished_before`.
    async fn purge(
        &self,
        queue: QueueName,
        status: JobStatus,
        finished_before: DateTime<Utc>,
    ) -> QueueResult<Vec<Job>>;

    /// Keep only the `keep` most recently finished jobs in `status`.
    async fn trim(&self, queue: QueueName, status: JobStatus, keep: u32) -> QueueResult<u64>;
}

/// Next state of a job after a handler failure.
pub(crate) fn after_failure(job: &Job, retry_at: Option<DateTime<Utc>>) -> (u32, JobStatus) {
    let attempts = (job.attempts_made + 1).min(job.max_attempts);
    match retry_at {
        Some(_) if attempts < job.max_attempts => (attempts, JobStatus::Delayed),
        _ => (attempts, JobStatus::Failed),
    }
}
