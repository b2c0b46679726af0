//! The queue manager: one explicitly constructed service owning every queue.
//!
//! Enqueues, processor registration and administrative operations all go
//! through [`QueueManager`]. Queue state lives in the [`JobStore`], so any
//! number of managers in any number of processes can serve the same queues.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use hookline_config::WorkerConfig;
use hookline_core::JobId;
use hookline_core::job::{
    Job, JobCounts, JobKind, JobOptions, JobStatus, QueueName, QueueOptions,
};
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::processor::JobHandler;
use crate::schedule::{Recurring, parse_cron};
use crate::store::{Inserted, JobStore, StallReport, earlier, later};
use crate::worker::Worker;
use crate::{QueueError, QueueResult};

const MIN_STALL_CHECK: Duration = Duration::from_millis(100);

struct Inner {
    store: Arc<dyn JobStore>,
    options: BTreeMap<QueueName, QueueOptions>,
    workers: WorkerConfig,
    instance: String,
    wakers: HashMap<(QueueName, JobKind), Arc<Notify>>,
    processors: Mutex<HashMap<(QueueName, JobKind), Arc<dyn JobHandler>>>,
    schedules: Mutex<HashSet<String>>,
    reapers: Mutex<HashSet<QueueName>>,
    tasks: Mutex<JoinSet<()>>,
    closing: AtomicBool,
    shutdown: watch::Sender<bool>,
}

/// Handle to the queue service. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct QueueManager {
    inner: Arc<Inner>,
}

impl QueueManager {
    /// Create a manager over `store`. Queues missing from `options` use
    /// their built-in defaults.
    pub fn new(
        store: Arc<dyn JobStore>,
        mut options: BTreeMap<QueueName, QueueOptions>,
        workers: WorkerConfig,
    ) -> Self {
        for queue in QueueName::ALL {
            options.entry(queue).or_insert_with(|| queue.default_options());
        }
        let wakers = JobKind::ALL
            .into_iter()
            .map(|kind| ((kind.queue(), kind), Arc::new(Notify::new())))
            .collect();
        let (shutdown, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                store,
                options,
                workers,
                instance: format!("worker-{}", Uuid::new_v4().simple()),
                wakers,
                processors: Mutex::new(HashMap::new()),
                schedules: Mutex::new(HashSet::new()),
                reapers: Mutex::new(HashSet::new()),
                tasks: Mutex::new(JoinSet::new()),
                closing: AtomicBool::new(false),
                shutdown,
            }),
        }
    }

    pub fn options(&self, queue: QueueName) -> QueueOptions {
        self.inner
            .options
            .get(&queue)
            .copied()
            .unwrap_or_else(|| queue.default_options())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closing.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> QueueResult<()> {
        if self.is_closed() {
            Err(QueueError::Closed)
        } else {
            Ok(())
        }
    }

    fn wake(&self, queue: QueueName, kind: JobKind) {
        if let Some(notify) = self.inner.wakers.get(&(queue, kind)) {
            notify.notify_one();
        }
    }

    /// Add a job to `queue`. Options override the queue's default priority,
    /// delay and retry policy. A job whose dedupe key is already taken is not
    /// added; the existing job is returned instead.
    pub async fn enqueue(
        &self,
        queue: QueueName,
        kind: JobKind,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> QueueResult<Job> {
        self.ensure_open()?;
        check_kind(queue, kind)?;

        let defaults = self.options(queue);
        let now = Utc::now();
        let delay = options.delay.unwrap_or_default();
        let run_at = later(now, delay)?;
        let job = Job {
            id: JobId::new(),
            queue,
            kind,
            payload,
            priority: options.priority.unwrap_or_default(),
            status: if delay.is_zero() {
                JobStatus::Waiting
            } else {
                JobStatus::Delayed
            },
            attempts_made: 0,
            max_attempts: options.max_attempts.unwrap_or(defaults.max_attempts).max(1),
            backoff: options.backoff.unwrap_or(defaults.backoff),
            failed_reason: None,
            dedupe_key: options.dedupe_key,
            run_at,
            locked_by: None,
            lease_expires_at: None,
            created_at: now,
            started_at: None,
            finished_at: None,
        };

        match self.inner.store.insert(job).await? {
            Inserted::Created(job) => {
                debug!(
                    job_id = %job.id,
                    %queue,
                    %kind,
                    priority = ?job.priority,
                    run_at = %job.run_at,
                    "Job enqueued"
                );
                self.wake(queue, kind);
                Ok(job)
            }
            Inserted::Duplicate(job) => {
                debug!(job_id = %job.id, %queue, %kind, "Job with same dedupe key exists");
                Ok(job)
            }
        }
    }

    /// Add a job that becomes eligible no earlier than `delay` from now.
    pub async fn enqueue_delayed(
        &self,
        queue: QueueName,
        kind: JobKind,
        payload: serde_json::Value,
        delay: Duration,
    ) -> QueueResult<Job> {
        self.enqueue(queue, kind, payload, JobOptions::default().with_delay(delay))
            .await
    }

    /// Add a job that becomes eligible at `at`. Times in the past are
    /// treated as immediate.
    pub async fn enqueue_at(
        &self,
        queue: QueueName,
        kind: JobKind,
        payload: serde_json::Value,
        at: DateTime<Utc>,
    ) -> QueueResult<Job> {
        let delay = (at - Utc::now()).to_std().unwrap_or_default();
        self.enqueue_delayed(queue, kind, payload, delay).await
    }

    /// Register a named recurring schedule. Every firing of `cron` enqueues
    /// an independent low-priority job.
    pub async fn enqueue_recurring(
        &self,
        queue: QueueName,
        kind: JobKind,
        payload: serde_json::Value,
        cron: &str,
        name: &str,
    ) -> QueueResult<()> {
        self.ensure_open()?;
        check_kind(queue, kind)?;
        let schedule = parse_cron(cron)?;

        if !self.inner.schedules.lock().await.insert(name.to_string()) {
            return Err(QueueError::DuplicateSchedule(name.to_string()));
        }

        let recurring = Recurring {
            name: name.to_string(),
            queue,
            kind,
            payload,
            schedule,
        };
        let shutdown = self.inner.shutdown.subscribe();
        self.inner
            .tasks
            .lock()
            .await
            .spawn(recurring.run(self.clone(), shutdown));

        info!(schedule = name, %queue, %kind, cron, "Recurring job registered");
        Ok(())
    }

    /// Bind `handler` to (`queue`, `kind`) and start `concurrency` workers
    /// for it. Zero uses the queue's configured concurrency.
    pub async fn register_processor(
        &self,
        queue: QueueName,
        kind: JobKind,
        handler: Arc<dyn JobHandler>,
        concurrency: usize,
    ) -> QueueResult<()> {
        self.ensure_open()?;
        check_kind(queue, kind)?;

        {
            let mut processors = self.inner.processors.lock().await;
            if processors.contains_key(&(queue, kind)) {
                return Err(QueueError::DuplicateProcessor { queue, kind });
            }
            processors.insert((queue, kind), handler.clone());
        }

        let options = self.options(queue);
        let concurrency = if concurrency == 0 {
            options.concurrency.max(1)
        } else {
            concurrency
        };
        let wake = self
            .inner
            .wakers
            .get(&(queue, kind))
            .cloned()
            .unwrap_or_default();

        let mut tasks = self.inner.tasks.lock().await;
        for n in 0..concurrency {
            let worker = Worker {
                id: format!("{}:{}:{}", self.inner.instance, kind, n),
                queue,
                kind,
                store: self.inner.store.clone(),
                handler: handler.clone(),
                options,
                poll_interval: self.inner.workers.poll_interval(),
                lease: self.inner.workers.lease(),
                wake: wake.clone(),
                shutdown: self.inner.shutdown.subscribe(),
            };
            tasks.spawn(worker.run());
        }

        if self.inner.reapers.lock().await.insert(queue) {
            let manager = self.clone();
            let mut shutdown = self.inner.shutdown.subscribe();
            let interval = self.inner.workers.stall_check().max(MIN_STALL_CHECK);
            tasks.spawn(async move {
                loop {
                    tokio::select! {
                        _ = sleep(interval) => {}
                        _ = shutdown.changed() => break,
                    }
                    if let Err(e) = manager.recover_stalled(queue).await {
                        warn!(%queue, error = %e, "Stalled job check failed");
                    }
                }
            });
        }

        info!(%queue, %kind, concurrency, "Processor registered");
        Ok(())
    }

    /// Job counts by status. While the queue is paused, waiting and delayed
    /// jobs are reported as paused.
    pub async fn get_stats(&self, queue: QueueName) -> QueueResult<JobCounts> {
        let mut counts = self.inner.store.counts(queue).await?;
        if self.inner.store.is_paused(queue).await? {
            counts.paused += counts.waiting + counts.delayed;
            counts.waiting = 0;
            counts.delayed = 0;
        }
        Ok(counts)
    }

    pub async fn get_job(&self, queue: QueueName, id: JobId) -> QueueResult<Option<Job>> {
        let Some(job) = self.inner.store.get(queue, id).await? else {
            return Ok(None);
        };
        let paused = self.inner.store.is_paused(queue).await?;
        Ok(Some(present(job, paused)))
    }

    /// Newest first, optionally filtered by status.
    pub async fn list_jobs(
        &self,
        queue: QueueName,
        status: Option<JobStatus>,
        limit: i64,
    ) -> QueueResult<Vec<Job>> {
        let paused = self.inner.store.is_paused(queue).await?;
        let statuses = match (status, paused) {
            (None, _) => vec![],
            (Some(JobStatus::Paused), true) => vec![JobStatus::Waiting, JobStatus::Delayed],
            (Some(JobStatus::Paused), false) => return Ok(vec![]),
            (Some(JobStatus::Waiting | JobStatus::Delayed), true) => return Ok(vec![]),
            (Some(status), _) => vec![status],
        };
        let jobs = self.inner.store.list(queue, &statuses, limit).await?;
        Ok(jobs.into_iter().map(|job| present(job, paused)).collect())
    }

    /// Put a failed job back in the queue with a fresh attempt budget.
    pub async fn retry_job(&self, queue: QueueName, id: JobId) -> QueueResult<Job> {
        let job = self
            .inner
            .store
            .get(queue, id)
            .await?
            .ok_or(QueueError::JobNotFound(id))?;
        if job.status != JobStatus::Failed {
            return Err(QueueError::InvalidStatus {
                id,
                status: job.status,
                expected: JobStatus::Failed,
            });
        }

        let job = self
            .inner
            .store
            .retry(queue, id)
            .await?
            .ok_or(QueueError::JobNotFound(id))?;
        info!(job_id = %id, %queue, kind = %job.kind, "Job manually retried");
        self.wake(queue, job.kind);
        Ok(job)
    }

    /// Delete a job that is not currently being processed.
    pub async fn remove_job(&self, queue: QueueName, id: JobId) -> QueueResult<Job> {
        let job = self
            .inner
            .store
            .get(queue, id)
            .await?
            .ok_or(QueueError::JobNotFound(id))?;
        if job.status == JobStatus::Active {
            return Err(QueueError::JobActive(id));
        }

        let removed = self
            .inner
            .store
            .remove(queue, id)
            .await?
            .ok_or(QueueError::JobActive(id))?;
        info!(job_id = %id, %queue, status = %removed.status, "Job removed");
        Ok(removed)
    }

    /// Stop handing out jobs from `queue`. Jobs already running finish.
    pub async fn pause(&self, queue: QueueName) -> QueueResult<()> {
        self.inner.store.set_paused(queue, true).await?;
        info!(%queue, "Queue paused");
        Ok(())
    }

    pub async fn resume(&self, queue: QueueName) -> QueueResult<()> {
        self.inner.store.set_paused(queue, false).await?;
        for ((q, _), notify) in &self.inner.wakers {
            if *q == queue {
                notify.notify_waiters();
            }
        }
        info!(%queue, "Queue resumed");
        Ok(())
    }

    pub async fn is_paused(&self, queue: QueueName) -> QueueResult<bool> {
        self.inner.store.is_paused(queue).await
    }

    /// Remove completed or failed jobs that finished more than `grace` ago.
    /// The removed jobs are returned for audit.
    pub async fn purge(
        &self,
        queue: QueueName,
        grace: Duration,
        status: JobStatus,
    ) -> QueueResult<Vec<Job>> {
        if !status.is_finished() {
            return Err(QueueError::NotPurgeable(status));
        }
        let cutoff = earlier(Utc::now(), grace)?;
        let removed = self.inner.store.purge(queue, status, cutoff).await?;
        info!(
            %queue,
            %status,
            grace_ms = grace.as_millis() as u64,
            removed = removed.len(),
            "Queue purged"
        );
        Ok(removed)
    }

    /// Return jobs whose worker stopped heartbeating to the queue. Jobs out
    /// of attempts are failed and handed to their handler's `on_exhausted`.
    pub async fn recover_stalled(&self, queue: QueueName) -> QueueResult<StallReport> {
        let report = self.inner.store.recover_stalled(queue, Utc::now()).await?;
        for job in &report.requeued {
            warn!(
                job_id = %job.id,
                %queue,
                kind = %job.kind,
                attempts_made = job.attempts_made,
                "Job stalled, requeued"
            );
            self.wake(queue, job.kind);
        }
        for job in &report.failed {
            error!(
                job_id = %job.id,
                %queue,
                kind = %job.kind,
                attempts_made = job.attempts_made,
                "Job stalled more than allowable limit"
            );
            let handler = self
                .inner
                .processors
                .lock()
                .await
                .get(&(queue, job.kind))
                .cloned();
            match handler {
                Some(handler) => handler.on_exhausted(job).await,
                None => warn!(job_id = %job.id, kind = %job.kind, "No processor registered here to close stalled job"),
            }
        }
        Ok(report)
    }

    /// Stop accepting work on every queue and wait for in-flight handlers,
    /// workers and schedules to finish.
    pub async fn drain_and_close(&self) {
        if self.inner.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Draining queues");
        self.inner.shutdown.send_replace(true);

        let mut tasks = std::mem::take(&mut *self.inner.tasks.lock().await);
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Queue task ended abnormally");
            }
        }
        info!("Queue manager closed");
    }
}

fn check_kind(queue: QueueName, kind: JobKind) -> QueueResult<()> {
    if kind.queue() == queue {
        Ok(())
    } else {
        Err(QueueError::UnknownJobKind { queue, kind })
    }
}

fn present(mut job: Job, paused: bool) -> Job {
    if paused && matches!(job.status, JobStatus::Waiting | JobStatus::Delayed) {
        job.status = JobStatus::Paused;
    }
    job
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryJobStore;
    use async_trait::async_trait;
    use hookline_core::job::Backoff;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    const PIPELINE: QueueName = QueueName::PipelineExecution;
    const EXECUTE: JobKind = JobKind::ExecutePipeline;

    fn fast_workers() -> WorkerConfig {
        WorkerConfig {
            poll_interval_ms: 10,
            lease_ms: 30_000,
            stall_check_ms: 60_000,
        }
    }

    fn manager_with(options: QueueOptions) -> (QueueManager, Arc<MemoryJobStore>) {
        let store = Arc::new(MemoryJobStore::new());
        let mut queues = BTreeMap::new();
        queues.insert(PIPELINE, options);
        let manager = QueueManager::new(store.clone(), queues, fast_workers());
        (manager, store)
    }

    fn quick_retry(max_attempts: u32) -> QueueOptions {
        QueueOptions {
            max_attempts,
            backoff: Backoff::fixed(Duration::ZERO),
            keep_completed: 100,
            keep_failed: 100,
            concurrency: 1,
        }
    }

    async fn wait_for_status(manager: &QueueManager, id: JobId, status: JobStatus) -> Job {
        for _ in 0..500 {
            if let Some(job) = manager.get_job(PIPELINE, id).await.unwrap() {
                if job.status == status {
                    return job;
                }
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached {}", id, status);
    }

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler for Counting {
        async fn handle(&self, _job: &Job) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl JobHandler for AlwaysFails {
        async fn handle(&self, _job: &Job) -> anyhow::Result<()> {
            anyhow::bail!("stage executor unreachable")
        }
    }

    /// Blocks until released.
    struct Gate {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl JobHandler for Gate {
        async fn handle(&self, _job: &Job) -> anyhow::Result<()> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_always_failing_job_exhausts_attempts() {
        let (manager, _) = manager_with(quick_retry(3));
        manager
            .register_processor(PIPELINE, EXECUTE, Arc::new(AlwaysFails), 1)
            .await
            .unwrap();

        let job = manager
            .enqueue(PIPELINE, EXECUTE, json!({}), JobOptions::default())
            .await
            .unwrap();
        let failed = wait_for_status(&manager, job.id, JobStatus::Failed).await;

        assert_eq!(failed.attempts_made, 3);
        assert_eq!(failed.failed_reason.as_deref(), Some("stage executor unreachable"));
        assert_eq!(manager.get_stats(PIPELINE).await.unwrap().failed, 1);

        manager.drain_and_close().await;
    }

    #[tokio::test]
    async fn test_successful_job_completes_once() {
        let (manager, _) = manager_with(quick_retry(3));
        let handler = Arc::new(Counting::default());
        manager
            .register_processor(PIPELINE, EXECUTE, handler.clone(), 2)
            .await
            .unwrap();

        let job = manager
            .enqueue(PIPELINE, EXECUTE, json!({"n": 1}), JobOptions::default())
            .await
            .unwrap();
        let done = wait_for_status(&manager, job.id, JobStatus::Completed).await;

        assert_eq!(done.attempts_made, 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        manager.drain_and_close().await;
    }

    #[tokio::test]
    async fn test_registration_rejects_wrong_queue_and_duplicates() {
        let (manager, _) = manager_with(quick_retry(1));

        let err = manager
            .register_processor(
                QueueName::Maintenance,
                EXECUTE,
                Arc::new(Counting::default()),
                1,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::UnknownJobKind { .. }));

        manager
            .register_processor(PIPELINE, EXECUTE, Arc::new(Counting::default()), 1)
            .await
            .unwrap();
        let err = manager
            .register_processor(PIPELINE, EXECUTE, Arc::new(Counting::default()), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::DuplicateProcessor { .. }));

        manager.drain_and_close().await;
    }

    #[tokio::test]
    async fn test_enqueue_rejects_kind_from_other_queue() {
        let (manager, _) = manager_with(quick_retry(1));
        let err = manager
            .enqueue(
                QueueName::Maintenance,
                EXECUTE,
                json!({}),
                JobOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::UnknownJobKind { .. }));
    }

    #[tokio::test]
    async fn test_enqueue_at_past_is_immediate() {
        let (manager, _) = manager_with(quick_retry(1));
        let past = manager
            .enqueue_at(
                PIPELINE,
                EXECUTE,
                json!({}),
                Utc::now() - chrono::Duration::minutes(1),
            )
            .await
            .unwrap();
        assert_eq!(past.status, JobStatus::Waiting);

        let later = manager
            .enqueue_delayed(PIPELINE, EXECUTE, json!({}), Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(later.status, JobStatus::Delayed);
        assert!(later.run_at > Utc::now() + chrono::Duration::minutes(59));

        let stats = manager.get_stats(PIPELINE).await.unwrap();
        assert_eq!((stats.waiting, stats.delayed), (1, 1));
    }

    #[tokio::test]
    async fn test_paused_queue_holds_jobs_until_resumed() {
        let (manager, _) = manager_with(quick_retry(1));
        manager.pause(PIPELINE).await.unwrap();
        manager
            .register_processor(PIPELINE, EXECUTE, Arc::new(Counting::default()), 1)
            .await
            .unwrap();

        let job = manager
            .enqueue(PIPELINE, EXECUTE, json!({}), JobOptions::default())
            .await
            .unwrap();
        sleep(Duration::from_millis(50)).await;

        let stats = manager.get_stats(PIPELINE).await.unwrap();
        assert_eq!(stats.paused, 1);
        assert_eq!(stats.waiting, 0);
        let listed = manager
            .list_jobs(PIPELINE, Some(JobStatus::Paused), 10)
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);

        manager.resume(PIPELINE).await.unwrap();
        wait_for_status(&manager, job.id, JobStatus::Completed).await;
        manager.drain_and_close().await;
    }

    #[tokio::test]
    async fn test_retry_and_remove_failed_job() {
        let (manager, _) = manager_with(quick_retry(1));
        manager
            .register_processor(PIPELINE, EXECUTE, Arc::new(AlwaysFails), 1)
            .await
            .unwrap();
        let job = manager
            .enqueue(PIPELINE, EXECUTE, json!({}), JobOptions::default())
            .await
            .unwrap();
        wait_for_status(&manager, job.id, JobStatus::Failed).await;

        manager.retry_job(PIPELINE, job.id).await.unwrap();
        let failed_again = wait_for_status(&manager, job.id, JobStatus::Failed).await;
        assert_eq!(failed_again.attempts_made, 1);

        let removed = manager.remove_job(PIPELINE, job.id).await.unwrap();
        assert_eq!(removed.id, job.id);
        assert!(manager.get_job(PIPELINE, job.id).await.unwrap().is_none());

        let err = manager.retry_job(PIPELINE, job.id).await.unwrap_err();
        assert!(matches!(err, QueueError::JobNotFound(_)));
        manager.drain_and_close().await;
    }

    #[tokio::test]
    async fn test_retry_rejects_unfailed_job() {
        let (manager, _) = manager_with(quick_retry(1));
        let job = manager
            .enqueue(PIPELINE, EXECUTE, json!({}), JobOptions::default())
            .await
            .unwrap();
        let err = manager.retry_job(PIPELINE, job.id).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidStatus { .. }));
    }

    #[tokio::test]
    async fn test_active_job_cannot_be_removed_and_drain_waits() {
        let (manager, _) = manager_with(quick_retry(1));
        let gate = Arc::new(Gate {
            entered: Notify::new(),
            release: Notify::new(),
        });
        manager
            .register_processor(PIPELINE, EXECUTE, gate.clone(), 1)
            .await
            .unwrap();
        let job = manager
            .enqueue(PIPELINE, EXECUTE, json!({}), JobOptions::default())
            .await
            .unwrap();
        gate.entered.notified().await;

        let err = manager.remove_job(PIPELINE, job.id).await.unwrap_err();
        assert!(matches!(err, QueueError::JobActive(_)));

        let draining = tokio::spawn({
            let manager = manager.clone();
            async move { manager.drain_and_close().await }
        });
        sleep(Duration::from_millis(50)).await;
        assert!(!draining.is_finished());

        let err = manager
            .enqueue(PIPELINE, EXECUTE, json!({}), JobOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Closed));

        gate.release.notify_one();
        draining.await.unwrap();
        let job = manager.get_job(PIPELINE, job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_purge_only_finished_jobs() {
        let (manager, _) = manager_with(quick_retry(1));
        manager
            .register_processor(PIPELINE, EXECUTE, Arc::new(Counting::default()), 1)
            .await
            .unwrap();
        let job = manager
            .enqueue(PIPELINE, EXECUTE, json!({}), JobOptions::default())
            .await
            .unwrap();
        wait_for_status(&manager, job.id, JobStatus::Completed).await;

        let err = manager
            .purge(PIPELINE, Duration::ZERO, JobStatus::Waiting)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::NotPurgeable(JobStatus::Waiting)));

        let kept = manager
            .purge(PIPELINE, Duration::from_secs(3600), JobStatus::Completed)
            .await
            .unwrap();
        assert!(kept.is_empty());

        sleep(Duration::from_millis(5)).await;
        let removed = manager
            .purge(PIPELINE, Duration::ZERO, JobStatus::Completed)
            .await
            .unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, job.id);
        manager.drain_and_close().await;
    }

    #[tokio::test]
    async fn test_completed_retention_is_trimmed() {
        let mut options = quick_retry(1);
        options.keep_completed = 2;
        let (manager, _) = manager_with(options);
        manager
            .register_processor(PIPELINE, EXECUTE, Arc::new(Counting::default()), 1)
            .await
            .unwrap();

        let mut last = None;
        for _ in 0..4 {
            let job = manager
                .enqueue(PIPELINE, EXECUTE, json!({}), JobOptions::default())
                .await
                .unwrap();
            wait_for_status(&manager, job.id, JobStatus::Completed).await;
            last = Some(job.id);
        }

        assert_eq!(manager.get_stats(PIPELINE).await.unwrap().completed, 2);
        assert!(manager.get_job(PIPELINE, last.unwrap()).await.unwrap().is_some());
        manager.drain_and_close().await;
    }

    #[tokio::test]
    async fn test_failed_retention_is_trimmed() {
        let mut options = quick_retry(1);
        options.keep_failed = 2;
        let (manager, _) = manager_with(options);
        manager
            .register_processor(PIPELINE, EXECUTE, Arc::new(AlwaysFails), 1)
            .await
            .unwrap();

        let mut ids = Vec::new();
        for _ in 0..4 {
            let job = manager
                .enqueue(PIPELINE, EXECUTE, json!({}), JobOptions::default())
                .await
                .unwrap();
            wait_for_status(&manager, job.id, JobStatus::Failed).await;
            ids.push(job.id);
        }

        assert_eq!(manager.get_stats(PIPELINE).await.unwrap().failed, 2);
        assert!(manager.get_job(PIPELINE, ids[0]).await.unwrap().is_none());
        assert!(manager.get_job(PIPELINE, ids[3]).await.unwrap().is_some());
        manager.drain_and_close().await;
    }

    #[tokio::test]
    async fn test_out_of_range_durations_are_rejected() {
        let (manager, _) = manager_with(quick_retry(1));

        let err = manager
            .purge(
                PIPELINE,
                Duration::from_millis(i64::MAX as u64),
                JobStatus::Completed,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::DurationOutOfRange(_)));

        for delay in [Duration::from_millis(i64::MAX as u64), Duration::MAX] {
            let err = manager
                .enqueue_delayed(PIPELINE, EXECUTE, json!({}), delay)
                .await
                .unwrap_err();
            assert!(matches!(err, QueueError::DurationOutOfRange(_)));
        }
        assert_eq!(manager.get_stats(PIPELINE).await.unwrap().delayed, 0);
    }

    /// Records the jobs it was told are exhausted.
    #[derive(Default)]
    struct Exhaustion {
        exhausted: std::sync::Mutex<Vec<JobId>>,
    }

    #[async_trait]
    impl JobHandler for Exhaustion {
        async fn handle(&self, _job: &Job) -> anyhow::Result<()> {
            anyhow::bail!("always fails")
        }

        async fn on_exhausted(&self, job: &Job) {
            self.exhausted.lock().unwrap().push(job.id);
        }
    }

    #[tokio::test]
    async fn test_exhausted_handler_called_after_last_attempt() {
        let (manager, _) = manager_with(quick_retry(2));
        let handler = Arc::new(Exhaustion::default());
        manager
            .register_processor(PIPELINE, EXECUTE, handler.clone(), 1)
            .await
            .unwrap();

        let job = manager
            .enqueue(PIPELINE, EXECUTE, json!({}), JobOptions::default())
            .await
            .unwrap();
        wait_for_status(&manager, job.id, JobStatus::Failed).await;
        manager.drain_and_close().await;

        assert_eq!(*handler.exhausted.lock().unwrap(), vec![job.id]);
    }

    #[tokio::test]
    async fn test_exhausted_handler_called_for_stalled_job() {
        let (manager, store) = manager_with(quick_retry(1));
        let job = manager
            .enqueue(PIPELINE, EXECUTE, json!({}), JobOptions::default())
            .await
            .unwrap();
        // Claimed by a worker that then disappears.
        store
            .claim(PIPELINE, &[EXECUTE], "dead-worker", Duration::from_millis(1))
            .await
            .unwrap()
            .unwrap();

        let handler = Arc::new(Exhaustion::default());
        manager
            .register_processor(PIPELINE, EXECUTE, handler.clone(), 1)
            .await
            .unwrap();
        sleep(Duration::from_millis(10)).await;

        let report = manager.recover_stalled(PIPELINE).await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(
            report.failed[0].failed_reason.as_deref(),
            Some(crate::store::STALLED_REASON)
        );
        assert_eq!(*handler.exhausted.lock().unwrap(), vec![job.id]);
        manager.drain_and_close().await;
    }

    #[tokio::test]
    async fn test_stalled_job_is_recovered() {
        let (manager, store) = manager_with(quick_retry(2));
        let job = manager
            .enqueue(PIPELINE, EXECUTE, json!({}), JobOptions::default())
            .await
            .unwrap();

        // A worker that claims and then disappears.
        store
            .claim(PIPELINE, &[EXECUTE], "dead-worker", Duration::from_millis(1))
            .await
            .unwrap()
            .unwrap();
        sleep(Duration::from_millis(10)).await;

        let report = manager.recover_stalled(PIPELINE).await.unwrap();
        assert_eq!(report.requeued.len(), 1);
        let job = manager.get_job(PIPELINE, job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Waiting);
        assert_eq!(job.attempts_made, 1);
        assert!(job.failed_reason.is_none());
    }

    #[tokio::test]
    async fn test_dedupe_key_enqueues_once() {
        let (manager, _) = manager_with(quick_retry(1));
        let options = JobOptions::default().with_dedupe_key("run-42");
        let first = manager
            .enqueue(PIPELINE, EXECUTE, json!({}), options.clone())
            .await
            .unwrap();
        let second = manager
            .enqueue(PIPELINE, EXECUTE, json!({}), options)
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(manager.get_stats(PIPELINE).await.unwrap().waiting, 1);
    }

    #[tokio::test]
    async fn test_recurring_rejects_bad_cron_and_duplicate_names() {
        let (manager, _) = manager_with(quick_retry(1));
        let err = manager
            .enqueue_recurring(
                QueueName::Maintenance,
                JobKind::RecoverStalled,
                json!({}),
                "not a cron",
                "stalls",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidCron { .. }));

        manager
            .enqueue_recurring(
                QueueName::Maintenance,
                JobKind::RecoverStalled,
                json!({}),
                "*/5 * * * *",
                "stalls",
            )
            .await
            .unwrap();
        let err = manager
            .enqueue_recurring(
                QueueName::Maintenance,
                JobKind::RecoverStalled,
                json!({}),
                "*/5 * * * *",
                "stalls",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::DuplicateSchedule(_)));
        manager.drain_and_close().await;
    }
}
