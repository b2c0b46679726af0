//! Core domain types and collaborator traits for hookline.
//!
//! This crate contains:
//! - Typed resource identifiers
//! - Queue and job types (queues, job kinds, priorities, retry policy)
//! - Projects, pipelines and the pipeline-run state machine
//! - Webhooks, delivery audit records and source-control event payloads
//! - Broadcast events
//! - Collaborator traits (secret cipher, broadcast sink, stage executor)

pub mod error;
pub mod events;
pub mod executor;
pub mod id;
pub mod job;
pub mod pipeline;
pub mod secret;
pub mod webhook;

pub use error::{Error, Result};
pub use id::{DeliveryId, JobId, PipelineId, ProjectId, RunId, WebhookId};
