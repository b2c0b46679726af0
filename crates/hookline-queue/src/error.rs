//! Queue error types.

use std::time::Duration;

use hookline_core::JobId;
use hookline_core::job::{JobKind, JobStatus, QueueName};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid job record: {0}")]
    InvalidRecord(String),

    #[error("job kind {kind} is not carried on queue {queue}")]
    UnknownJobKind { queue: QueueName, kind: JobKind },

    #[error("a processor for {kind} is already registered on queue {queue}")]
    DuplicateProcessor { queue: QueueName, kind: JobKind },

    #[error("a recurring schedule named {0} is already registered")]
    DuplicateSchedule(String),

    #[error("invalid cron expression {expression:?}: {message}")]
    InvalidCron { expression: String, message: String },

    #[error("duration {0:?} is out of range")]
    DurationOutOfRange(Duration),

    #[error("queue manager is closed")]
    Closed,

    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("job {0} is active")]
    JobActive(JobId),

    #[error("job {id} is {status}, expected {expected}")]
    InvalidStatus {
        id: JobId,
        status: JobStatus,
        expected: JobStatus,
    },

    #[error("only completed or failed jobs can be purged, got {0}")]
    NotPurgeable(JobStatus),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;
