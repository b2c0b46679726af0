//! In-memory job store for tests and single-process development.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hookline_core::JobId;
use hookline_core::job::{Job, JobCounts, JobKind, JobStatus, QueueName};
use tokio::sync::Mutex;

use crate::QueueResult;
use crate::store::{Inserted, JobStore, STALLED_REASON, StallReport, after_failure, later};

#[derive(Default)]
struct State {
    jobs: HashMap<JobId, Job>,
    paused: HashSet<QueueName>,
}

impl State {
    fn held_by(&mut self, id: JobId, worker: &str) -> Option<&mut Job> {
        self.jobs.get_mut(&id).filter(|job| {
            job.status == JobStatus::Active && job.locked_by.as_deref() == Some(worker)
        })
    }
}

#[derive(Default)]
pub struct MemoryJobStore {
    state: Mutex<State>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lease_deadline(lease: Duration) -> QueueResult<DateTime<Utc>> {
    later(Utc::now(), lease)
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: Job) -> QueueResult<Inserted> {
        let mut state = self.state.lock().await;
        if let Some(key) = &job.dedupe_key {
            if let Some(existing) = state
                .jobs
                .values()
                .find(|j| j.dedupe_key.as_ref() == Some(key))
            {
                return Ok(Inserted::Duplicate(existing.clone()));
            }
        }
        state.jobs.insert(job.id, job.clone());
        Ok(Inserted::Created(job))
    }

    async fn claim(
        &self,
        queue: QueueName,
        kinds: &[JobKind],
        worker: &str,
        lease: Duration,
    ) -> QueueResult<Option<Job>> {
        let mut state = self.state.lock().await;
        if state.paused.contains(&queue) {
            return Ok(None);
        }
        let now = Utc::now();
        let next = state
            .jobs
            .values()
            .filter(|j| {
                j.queue == queue
                    && kinds.contains(&j.kind)
                    && matches!(j.status, JobStatus::Waiting | JobStatus::Delayed)
                    && j.run_at <= now
            })
            .min_by_key(|j| (Reverse(j.priority), j.run_at, j.created_at, j.id))
            .map(|j| j.id);

        let Some(id) = next else {
            return Ok(None);
        };
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(None);
        };
        job.status = JobStatus::Active;
        job.locked_by = Some(worker.to_string());
        job.lease_expires_at = Some(lease_deadline(lease)?);
        job.started_at = Some(now);
        Ok(Some(job.clone()))
    }

    async fn extend_lease(&self, id: JobId, worker: &str, lease: Duration) -> QueueResult<bool> {
        let mut state = self.state.lock().await;
        match state.held_by(id, worker) {
            Some(job) => {
                job.lease_expires_at = Some(lease_deadline(lease)?);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn complete(&self, id: JobId, worker: &str) -> QueueResult<Option<Job>> {
        let mut state = self.state.lock().await;
        let Some(job) = state.held_by(id, worker) else {
            return Ok(None);
        };
        job.attempts_made = (job.attempts_made + 1).min(job.max_attempts);
        job.status = JobStatus::Completed;
        job.finished_at = Some(Utc::now());
        job.locked_by = None;
        job.lease_expires_at = None;
        Ok(Some(job.clone()))
    }

    async fn fail(
        &self,
        id: JobId,
        worker: &str,
        reason: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> QueueResult<Option<Job>> {
        let mut state = self.state.lock().await;
        let Some(job) = state.held_by(id, worker) else {
            return Ok(None);
        };
        let (attempts, status) = after_failure(job, retry_at);
        job.attempts_made = attempts;
        job.status = status;
        job.failed_reason = Some(reason.to_string());
        job.locked_by = None;
        job.lease_expires_at = None;
        match (status, retry_at) {
            (JobStatus::Delayed, Some(at)) => job.run_at = at,
            _ => job.finished_at = Some(Utc::now()),
        }
        Ok(Some(job.clone()))
    }

    async fn recover_stalled(
        &self,
        queue: QueueName,
        now: DateTime<Utc>,
    ) -> QueueResult<StallReport> {
        let mut state = self.state.lock().await;
        let mut report = StallReport::default();
        for job in state.jobs.values_mut() {
            let expired = job.queue == queue
                && job.status == JobStatus::Active
                && job.lease_expires_at.is_some_and(|at| at < now);
            if !expired {
                continue;
            }
            job.attempts_made = (job.attempts_made + 1).min(job.max_attempts);
            job.locked_by = None;
            job.lease_expires_at = None;
            if job.attempts_made >= job.max_attempts {
                job.status = JobStatus::Failed;
                job.failed_reason = Some(STALLED_REASON.to_string());
                job.finished_at = Some(now);
                report.failed.push(job.clone());
            } else {
                job.status = JobStatus::Waiting;
                job.run_at = now;
                report.requeued.push(job.clone());
            }
        }
        Ok(report)
    }

    async fn get(&self, queue: QueueName, id: JobId) -> QueueResult<Option<Job>> {
        let state = self.state.lock().await;
        Ok(state.jobs.get(&id).filter(|j| j.queue == queue).cloned())
    }

    async fn list(
        &self,
        queue: QueueName,
        statuses: &[JobStatus],
        limit: i64,
    ) -> QueueResult<Vec<Job>> {
        let state = self.state.lock().await;
        let mut jobs: Vec<_> = state
            .jobs
            .values()
            .filter(|j| j.queue == queue && (statuses.is_empty() || statuses.contains(&j.status)))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| Reverse((j.created_at, j.id)));
        jobs.truncate(limit.max(0) as usize);
        Ok(jobs)
    }

    async fn counts(&self, queue: QueueName) -> QueueResult<JobCounts> {
        let state = self.state.lock().await;
        let mut counts = JobCounts::default();
        for job in state.jobs.values().filter(|j| j.queue == queue) {
            match job.status {
                JobStatus::Waiting => counts.waiting += 1,
                JobStatus::Active => counts.active += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
                JobStatus::Delayed => counts.delayed += 1,
                JobStatus::Paused => counts.paused += 1,
            }
        }
        Ok(counts)
    }

    async fn retry(&self, queue: QueueName, id: JobId) -> QueueResult<Option<Job>> {
        let mut state = self.state.lock().await;
        let Some(job) = state
            .jobs
            .get_mut(&id)
            .filter(|j| j.queue == queue && j.status == JobStatus::Failed)
        else {
            return Ok(None);
        };
        job.status = JobStatus::Waiting;
        job.attempts_made = 0;
        job.failed_reason = None;
        job.run_at = Utc::now();
        job.started_at = None;
        job.finished_at = None;
        Ok(Some(job.clone()))
    }

    async fn remove(&self, queue: QueueName, id: JobId) -> QueueResult<Option<Job>> {
        let mut state = self.state.lock().await;
        let removable = state
            .jobs
            .get(&id)
            .is_some_and(|j| j.queue == queue && j.status != JobStatus::Active);
        if !removable {
            return Ok(None);
        }
        Ok(state.jobs.remove(&id))
    }

    async fn set_paused(&self, queue: QueueName, paused: bool) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        if paused {
            state.paused.insert(queue);
        } else {
            state.paused.remove(&queue);
        }
        Ok(())
    }

    async fn is_paused(&self, queue: QueueName) -> QueueResult<bool> {
        Ok(self.state.lock().await.paused.contains(&queue))
    }

    async fn purge(
        &self,
        queue: QueueName,
        status: JobStatus,
        finished_before: DateTime<Utc>,
    ) -> QueueResult<Vec<Job>> {
        let mut state = self.state.lock().await;
        let ids: Vec<JobId> = state
            .jobs
            .values()
            .filter(|j| {
                j.queue == queue
                    && j.status == status
                    && j.finished_at.is_some_and(|at| at < finished_before)
            })
            .map(|j| j.id)
            .collect();
        Ok(ids.iter().filter_map(|id| state.jobs.remove(id)).collect())
    }

    async fn trim(&self, queue: QueueName, status: JobStatus, keep: u32) -> QueueResult<u64> {
        let mut state = self.state.lock().await;
        let mut finished: Vec<(Option<DateTime<Utc>>, JobId)> = state
            .jobs
            .values()
            .filter(|j| j.queue == queue && j.status == status)
            .map(|j| (j.finished_at, j.id))
            .collect();
        finished.sort_by_key(|entry| Reverse(*entry));
        let mut removed = 0;
        for (_, id) in finished.into_iter().skip(keep as usize) {
            state.jobs.remove(&id);
            removed += 1;
        }
        Ok(removed)
    }
}
