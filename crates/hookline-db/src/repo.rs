//! Repository traits and implementations.

pub mod pipeline;
pub mod project;
pub mod webhook;

pub use pipeline::{PgPipelineRepo, PipelineRepo};
pub use project::{PgProjectRepo, ProjectRepo};
pub use webhook::{PgWebhookRepo, WebhookRepo};
