//! Job store backed by PostgreSQL.
//!
//! Claiming uses `FOR UPDATE SKIP LOCKED` so any number of workers, in any
//! number of processes, can pull from the same table without contention.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hookline_core::JobId;
use hookline_core::job::{Backoff, Job, JobCounts, JobKind, JobStatus, Priority, QueueName};
use sqlx::PgPool;
use uuid::Uuid;

use crate::store::{Inserted, JobStore, STALLED_REASON, StallReport, later};
use crate::{QueueError, QueueResult};

/// A row of the `jobs` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub queue: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub status: String,
    pub attempts_made: i32,
    pub max_attempts: i32,
    pub backoff: serde_json::Value,
    pub failed_reason: Option<String>,
    pub dedupe_key: Option<String>,
    pub run_at: DateTime<Utc>,
    pub locked_by: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = QueueError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let queue = row
            .queue
            .parse::<QueueName>()
            .map_err(QueueError::InvalidRecord)?;
        let kind = row
            .kind
            .parse::<JobKind>()
            .map_err(QueueError::InvalidRecord)?;
        let status = row
            .status
            .parse::<JobStatus>()
            .map_err(QueueError::InvalidRecord)?;
        let backoff: Backoff = serde_json::from_value(row.backoff)?;

        Ok(Job {
            id: JobId::from_uuid(row.id),
            queue,
            kind,
            payload: row.payload,
            priority: Priority::from_i32(row.priority),
            status,
            attempts_made: row.attempts_made.max(0) as u32,
            max_attempts: row.max_attempts.max(0) as u32,
            backoff,
            failed_reason: row.failed_reason,
            dedupe_key: row.dedupe_key,
            run_at: row.run_at,
            locked_by: row.locked_by,
            lease_expires_at: row.lease_expires_at,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

fn to_jobs(rows: Vec<JobRow>) -> QueueResult<Vec<Job>> {
    rows.into_iter().map(TryInto::try_into).collect()
}

fn to_job(row: Option<JobRow>) -> QueueResult<Option<Job>> {
    row.map(TryInto::try_into).transpose()
}

fn lease_deadline(lease: Duration) -> QueueResult<DateTime<Utc>> {
    later(Utc::now(), lease)
}

fn status_strings(statuses: &[JobStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.to_string()).collect()
}

/// PostgreSQL implementation of JobStore.
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, job: Job) -> QueueResult<Inserted> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            INSERT INTO jobs (
                id, queue, kind, payload, priority, status, attempts_made, max_attempts,
                backoff, dedupe_key, run_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (dedupe_key) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.queue.as_str())
        .bind(job.kind.as_str())
        .bind(&job.payload)
        .bind(job.priority.as_i32())
        .bind(job.status.to_string())
        .bind(job.attempts_made as i32)
        .bind(job.max_attempts as i32)
        .bind(serde_json::to_value(job.backoff)?)
        .bind(&job.dedupe_key)
        .bind(job.run_at)
        .bind(job.created_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(Inserted::Created(row.try_into()?));
        }

        let existing = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE dedupe_key = $1")
            .bind(&job.dedupe_key)
            .fetch_one(&self.pool)
            .await?;
        Ok(Inserted::Duplicate(existing.try_into()?))
    }

    async fn claim(
        &self,
        queue: QueueName,
        kinds: &[JobKind],
        worker: &str,
        lease: Duration,
    ) -> QueueResult<Option<Job>> {
        let kinds: Vec<String> = kinds.iter().map(|k| k.as_str().to_string()).collect();
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'active', locked_by = $3, lease_expires_at = $4, started_at = NOW()
            WHERE id = (
                SELECT j.id FROM jobs j
                WHERE j.queue = $1
                  AND j.kind = ANY($2)
                  AND j.status IN ('waiting', 'delayed')
                  AND j.run_at <= NOW()
                  AND NOT EXISTS (
                      SELECT 1 FROM queue_state qs WHERE qs.queue = j.queue AND qs.paused
                  )
                ORDER BY j.priority DESC, j.run_at ASC, j.created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(queue.as_str())
        .bind(&kinds)
        .bind(worker)
        .bind(lease_deadline(lease)?)
        .fetch_optional(&self.pool)
        .await?;
        to_job(row)
    }

    async fn extend_lease(&self, id: JobId, worker: &str, lease: Duration) -> QueueResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET lease_expires_at = $3
            WHERE id = $1 AND locked_by = $2 AND status = 'active'
            "#,
        )
        .bind(id.as_uuid())
        .bind(worker)
        .bind(lease_deadline(lease)?)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn complete(&self, id: JobId, worker: &str) -> QueueResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'completed',
                attempts_made = LEAST(attempts_made + 1, max_attempts),
                finished_at = NOW(),
                locked_by = NULL,
                lease_expires_at = NULL
            WHERE id = $1 AND locked_by = $2 AND status = 'active'
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(worker)
        .fetch_optional(&self.pool)
        .await?;
        to_job(row)
    }

    async fn fail(
        &self,
        id: JobId,
        worker: &str,
        reason: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> QueueResult<Option<Job>> {
        // Right-hand side column references see the pre-update row.
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET attempts_made = LEAST(attempts_made + 1, max_attempts),
                status = CASE
                    WHEN $4::timestamptz IS NOT NULL AND attempts_made + 1 < max_attempts
                    THEN 'delayed' ELSE 'failed' END,
                run_at = CASE
                    WHEN $4::timestamptz IS NOT NULL AND attempts_made + 1 < max_attempts
                    THEN $4 ELSE run_at END,
                finished_at = CASE
                    WHEN $4::timestamptz IS NOT NULL AND attempts_made + 1 < max_attempts
                    THEN NULL ELSE NOW() END,
                failed_reason = $3,
                locked_by = NULL,
                lease_expires_at = NULL
            WHERE id = $1 AND locked_by = $2 AND status = 'active'
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(worker)
        .bind(reason)
        .bind(retry_at)
        .fetch_optional(&self.pool)
        .await?;
        to_job(row)
    }

    async fn recover_stalled(
        &self,
        queue: QueueName,
        now: DateTime<Utc>,
    ) -> QueueResult<StallReport> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET attempts_made = LEAST(attempts_made + 1, max_attempts),
                status = CASE WHEN attempts_made + 1 >= max_attempts
                    THEN 'failed' ELSE 'waiting' END,
                failed_reason = CASE WHEN attempts_made + 1 >= max_attempts
                    THEN $3 ELSE failed_reason END,
                finished_at = CASE WHEN attempts_made + 1 >= max_attempts
                    THEN $2 ELSE NULL END,
                run_at = $2,
                locked_by = NULL,
                lease_expires_at = NULL
            WHERE queue = $1 AND status = 'active' AND lease_expires_at < $2
            RETURNING *
            "#,
        )
        .bind(queue.as_str())
        .bind(now)
        .bind(STALLED_REASON)
        .fetch_all(&self.pool)
        .await?;

        let (failed, requeued) = to_jobs(rows)?
            .into_iter()
            .partition(|job| job.status == JobStatus::Failed);
        Ok(StallReport { requeued, failed })
    }

    async fn get(&self, queue: QueueName, id: JobId) -> QueueResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = $1 AND queue = $2")
            .bind(id.as_uuid())
            .bind(queue.as_str())
            .fetch_optional(&self.pool)
            .await?;
        to_job(row)
    }

    async fn list(
        &self,
        queue: QueueName,
        statuses: &[JobStatus],
        limit: i64,
    ) -> QueueResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT * FROM jobs
            WHERE queue = $1 AND (cardinality($2::text[]) = 0 OR status = ANY($2))
            ORDER BY created_at DESC, id DESC
            LIMIT $3
            "#,
        )
        .bind(queue.as_str())
        .bind(status_strings(statuses))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        to_jobs(rows)
    }

    async fn counts(&self, queue: QueueName) -> QueueResult<JobCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM jobs WHERE queue = $1 GROUP BY status")
                .bind(queue.as_str())
                .fetch_all(&self.pool)
                .await?;

        let mut counts = JobCounts::default();
        for (status, count) in rows {
            let count = count.max(0) as u64;
            match status.parse::<JobStatus>().map_err(QueueError::InvalidRecord)? {
                JobStatus::Waiting => counts.waiting = count,
                JobStatus::Active => counts.active = count,
                JobStatus::Completed => counts.completed = count,
                JobStatus::Failed => counts.failed = count,
                JobStatus::Delayed => counts.delayed = count,
                JobStatus::Paused => counts.paused = count,
            }
        }
        Ok(counts)
    }

    async fn retry(&self, queue: QueueName, id: JobId) -> QueueResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'waiting', attempts_made = 0, failed_reason = NULL,
                run_at = NOW(), started_at = NULL, finished_at = NULL
            WHERE id = $1 AND queue = $2 AND status = 'failed'
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(queue.as_str())
        .fetch_optional(&self.pool)
        .await?;
        to_job(row)
    }

    async fn remove(&self, queue: QueueName, id: JobId) -> QueueResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(
            "DELETE FROM jobs WHERE id = $1 AND queue = $2 AND status <> 'active' RETURNING *",
        )
        .bind(id.as_uuid())
        .bind(queue.as_str())
        .fetch_optional(&self.pool)
        .await?;
        to_job(row)
    }

    async fn set_paused(&self, queue: QueueName, paused: bool) -> QueueResult<()> {
        sqlx::query(
            r#"
            INSERT INTO queue_state (queue, paused, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (queue) DO UPDATE SET paused = EXCLUDED.paused, updated_at = NOW()
            "#,
        )
        .bind(queue.as_str())
        .bind(paused)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn is_paused(&self, queue: QueueName) -> QueueResult<bool> {
        let paused: Option<bool> =
            sqlx::query_scalar("SELECT paused FROM queue_state WHERE queue = $1")
                .bind(queue.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(paused.unwrap_or(false))
    }

    async fn purge(
        &self,
        queue: QueueName,
        status: JobStatus,
        finished_before: DateTime<Utc>,
    ) -> QueueResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            DELETE FROM jobs
            WHERE queue = $1 AND status = $2 AND finished_at < $3
            RETURNING *
            "#,
        )
        .bind(queue.as_str())
        .bind(status.to_string())
        .bind(finished_before)
        .fetch_all(&self.pool)
        .await?;
        to_jobs(rows)
    }

    async fn trim(&self, queue: QueueName, status: JobStatus, keep: u32) -> QueueResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE id IN (
                SELECT id FROM jobs
                WHERE queue = $1 AND status = $2
                ORDER BY finished_at DESC NULLS LAST, id DESC
                OFFSET $3
            )
            "#,
        )
        .bind(queue.as_str())
        .bind(status.to_string())
        .bind(i64::from(keep))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
