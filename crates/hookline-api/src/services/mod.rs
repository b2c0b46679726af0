//! Services behind the HTTP routes and queue processors.

pub mod crypto;
pub mod execution;
pub mod maintenance;
pub mod pipeline_trigger;
pub mod signature;
pub mod stage_runner;
pub mod webhook_processor;

pub use crypto::AesGcmCipher;
pub use execution::ExecutePipeline;
pub use maintenance::PruneDeliveries;
pub use pipeline_trigger::{PipelineTrigger, TriggerError};
pub use stage_runner::HttpStageExecutor;
pub use webhook_processor::{ProcessedDelivery, WebhookError, WebhookProcessor};
