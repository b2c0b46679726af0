//! Durable job queues for hookline.
//!
//! Jobs live in a shared store (PostgreSQL in production) and are claimed
//! with `SKIP LOCKED`, so workers in several processes can serve the same
//! queues. Failed jobs are retried with backoff; jobs whose worker vanished
//! are recovered through lease expiry.

pub mod error;
pub mod maintenance;
pub mod manager;
pub mod memory;
pub mod postgres;
pub mod processor;
pub mod schedule;
pub mod store;
mod worker;

pub use error::{QueueError, QueueResult};
pub use maintenance::{MaintenancePayload, PurgeJobHistory, RecoverStalled};
pub use manager::QueueManager;
pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;
pub use processor::JobHandler;
pub use schedule::{parse_cron, register_maintenance};
pub use store::{Inserted, JobStore, StallReport};
