//! Handler trait and the harness that runs one job through it.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use hookline_core::job::Job;
use tracing::{error, info};

/// Work bound to one (queue, job kind) pair.
///
/// An `Err` (or a panic) is recorded as the job's failure reason and feeds
/// the queue's retry policy. Handlers never see retry bookkeeping.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: &Job) -> anyhow::Result<()>;

    /// Called once `job` has failed for good, either after its last
    /// attempt or when stall recovery runs out of attempts.
    async fn on_exhausted(&self, _job: &Job) {}
}

/// Run `job` through `handler`, returning the failure reason on error.
///
/// The handler runs on its own task so a panic is contained to this job.
pub(crate) async fn run_job(handler: Arc<dyn JobHandler>, job: Job) -> Result<(), String> {
    let started = Instant::now();
    info!(
        job_id = %job.id,
        queue = %job.queue,
        kind = %job.kind,
        attempt = job.attempts_made + 1,
        max_attempts = job.max_attempts,
        "Job started"
    );

    let (job_id, queue, kind) = (job.id, job.queue, job.kind);
    let outcome = tokio::spawn(async move { handler.handle(&job).await }).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let reason = match outcome {
        Ok(Ok(())) => {
            info!(job_id = %job_id, queue = %queue, kind = %kind, elapsed_ms, "Job completed");
            return Ok(());
        }
        Ok(Err(e)) => format!("{:#}", e),
        Err(join_error) if join_error.is_panic() => {
            format!("handler panicked: {}", panic_message(join_error.into_panic()))
        }
        Err(join_error) => format!("handler aborted: {}", join_error),
    };

    error!(
        job_id = %job_id,
        queue = %queue,
        kind = %kind,
        elapsed_ms,
        error = %reason,
        "Job failed"
    );
    Err(reason)
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hookline_core::JobId;
    use hookline_core::job::{Backoff, JobKind, JobStatus, Priority};
    use std::time::Duration;

    fn job() -> Job {
        let now = Utc::now();
        Job {
            id: JobId::new(),
            queue: JobKind::ExecutePipeline.queue(),
            kind: JobKind::ExecutePipeline,
            payload: serde_json::json!({"n": 1}),
            priority: Priority::Normal,
            status: JobStatus::Active,
            attempts_made: 0,
            max_attempts: 3,
            backoff: Backoff::fixed(Duration::ZERO),
            failed_reason: None,
            dedupe_key: None,
            run_at: now,
            locked_by: Some("w1".to_string()),
            lease_expires_at: None,
            created_at: now,
            started_at: Some(now),
            finished_at: None,
        }
    }

    struct Succeeds;
    #[async_trait]
    impl JobHandler for Succeeds {
        async fn handle(&self, _job: &Job) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct Fails;
    #[async_trait]
    impl JobHandler for Fails {
        async fn handle(&self, job: &Job) -> anyhow::Result<()> {
            anyhow::bail!("cannot handle {}", job.payload["n"])
        }
    }

    struct Panics;
    #[async_trait]
    impl JobHandler for Panics {
        async fn handle(&self, _job: &Job) -> anyhow::Result<()> {
            panic!("handler blew up")
        }
    }

    #[tokio::test]
    async fn test_success() {
        assert!(run_job(Arc::new(Succeeds), job()).await.is_ok());
    }

    #[tokio::test]
    async fn test_error_becomes_reason() {
        let reason = run_job(Arc::new(Fails), job()).await.unwrap_err();
        assert_eq!(reason, "cannot handle 1");
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let reason = run_job(Arc::new(Panics), job()).await.unwrap_err();
        assert!(reason.contains("handler blew up"), "{}", reason);
    }
}
