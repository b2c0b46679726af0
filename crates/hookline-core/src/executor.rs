//! Stage-execution collaborator.
//!
//! The executor actually runs a pipeline's stages. Cancellation is cooperative:
//! the caller flips a [`CancelFlag`] and the executor is expected to observe it
//! between units of work.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::Result;
use crate::pipeline::PipelineJobPayload;

/// Shared, cheaply clonable cancellation marker.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs the stages of a pipeline run.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Name of this executor (for logging).
    fn name(&self) -> &'static str;

    /// Execute all stages. `Ok(())` means every stage succeeded.
    async fn execute(&self, payload: &PipelineJobPayload, cancel: CancelFlag) -> Result<()>;
}
