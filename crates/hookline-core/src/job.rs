//! Queue and job types.
//!
//! Queues and job kinds are closed enums. A job kind belongs to exactly one
//! queue; processors and enqueues are validated against that mapping before
//! anything touches the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::JobId;

/// The fixed set of named durable queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueName {
    /// Pipeline runs waiting for the stage-execution collaborator.
    PipelineExecution,
    /// Low-urgency housekeeping (history purge, audit pruning, stall recovery).
    Maintenance,
}

impl QueueName {
    pub const ALL: [QueueName; 2] = [QueueName::PipelineExecution, QueueName::Maintenance];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::PipelineExecution => "pipeline-execution",
            QueueName::Maintenance => "maintenance",
        }
    }

    /// Built-in policy used when the configuration does not override it.
    pub fn default_options(&self) -> QueueOptions {
        match self {
            QueueName::PipelineExecution => QueueOptions {
                max_attempts: 3,
                backoff: Backoff::exponential(Duration::from_secs(5)),
                keep_completed: 100,
                keep_failed: 500,
                concurrency: 4,
            },
            QueueName::Maintenance => QueueOptions {
                max_attempts: 1,
                backoff: Backoff::fixed(Duration::from_secs(60)),
                keep_completed: 20,
                keep_failed: 50,
                concurrency: 1,
            },
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueueName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pipeline-execution" => Ok(QueueName::PipelineExecution),
            "maintenance" => Ok(QueueName::Maintenance),
            _ => Err(format!("Unknown queue: {}", s)),
        }
    }
}

/// Type tag of a job. Stored as its kebab-case string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    ExecutePipeline,
    PurgeJobHistory,
    PruneDeliveries,
    RecoverStalled,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::ExecutePipeline,
        JobKind::PurgeJobHistory,
        JobKind::PruneDeliveries,
        JobKind::RecoverStalled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::ExecutePipeline => "execute-pipeline",
            JobKind::PurgeJobHistory => "purge-job-history",
            JobKind::PruneDeliveries => "prune-deliveries",
            JobKind::RecoverStalled => "recover-stalled",
        }
    }

    /// The queue this kind of job is carried on.
    pub fn queue(&self) -> QueueName {
        match self {
            JobKind::ExecutePipeline => QueueName::PipelineExecution,
            JobKind::PurgeJobHistory | JobKind::PruneDeliveries | JobKind::RecoverStalled => {
                QueueName::Maintenance
            }
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("Unknown job kind: {}", s))
    }
}

/// Job priority. Higher variants are claimed first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Priority {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn from_i32(value: i32) -> Self {
        match value {
            i32::MIN..=0 => Priority::Low,
            1 => Priority::Normal,
            2 => Priority::High,
            _ => Priority::Critical,
        }
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
    Paused,
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Waiting => write!(f, "waiting"),
            JobStatus::Active => write!(f, "active"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Delayed => write!(f, "delayed"),
            JobStatus::Paused => write!(f, "paused"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "waiting" => Ok(JobStatus::Waiting),
            "active" => Ok(JobStatus::Active),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "delayed" => Ok(JobStatus::Delayed),
            "paused" => Ok(JobStatus::Paused),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

/// Delay policy between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    pub kind: BackoffKind,
    pub base_ms: u64,
}

impl Backoff {
    pub fn exponential(base: Duration) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            base_ms: base.as_millis() as u64,
        }
    }

    pub fn fixed(delay: Duration) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            base_ms: delay.as_millis() as u64,
        }
    }

    /// Delay before the next attempt, given how many attempts have been made
    /// (including the one that just failed). Exponential: `base * 2^(n-1)`.
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        match self.kind {
            BackoffKind::Fixed => Duration::from_millis(self.base_ms),
            BackoffKind::Exponential => {
                let exponent = attempts_made.saturating_sub(1).min(20);
                Duration::from_millis(self.base_ms.saturating_mul(1u64 << exponent))
            }
        }
    }
}

/// Default policy of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueOptions {
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// How many completed jobs to keep for inspection.
    pub keep_completed: u32,
    /// How many permanently failed jobs to keep for inspection.
    pub keep_failed: u32,
    /// Concurrent handler invocations per registered processor.
    pub concurrency: usize,
}

/// Per-job overrides of the queue defaults.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub priority: Option<Priority>,
    pub delay: Option<Duration>,
    pub max_attempts: Option<u32>,
    pub backoff: Option<Backoff>,
    /// Jobs sharing a dedupe key are only enqueued once.
    pub dedupe_key: Option<String>,
}

impl JobOptions {
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn with_dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }
}

/// A unit of asynchronous work tracked by a queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue: QueueName,
    pub kind: JobKind,
    pub payload: serde_json::Value,
    pub priority: Priority,
    pub status: JobStatus,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Reason of the most recent handler failure.
    pub failed_reason: Option<String>,
    pub dedupe_key: Option<String>,
    /// Earliest time the job may be claimed.
    pub run_at: DateTime<Utc>,
    pub locked_by: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Whether another attempt is allowed after the current one.
    pub fn has_attempts_left(&self) -> bool {
        self.attempts_made < self.max_attempts
    }
}

/// Per-status job counts of one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
    pub paused: u64,
}
