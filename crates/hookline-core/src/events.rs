//! Real-time lifecycle events and the broadcast sink they are published to.

use serde::{Deserialize, Serialize};

use crate::pipeline::{Pipeline, PipelineRun, Project, RunStatus, TriggerMetadata};
use crate::{PipelineId, ProjectId, RunId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PipelineRunCreated,
    PipelineRunUpdated,
}

/// Structured event pushed to real-time subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub pipeline_id: PipelineId,
    pub pipeline_run_id: RunId,
    pub project_id: ProjectId,
    pub project_name: String,
    pub pipeline_name: String,
    pub status: RunStatus,
    pub trigger: TriggerMetadata,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl BroadcastEvent {
    pub fn for_run(
        event_type: EventType,
        project: &Project,
        pipeline: &Pipeline,
        run: &PipelineRun,
    ) -> Self {
        Self {
            event_type,
            pipeline_id: pipeline.id,
            pipeline_run_id: run.id,
            project_id: project.id,
            project_name: project.name.clone(),
            pipeline_name: pipeline.name.clone(),
            status: run.status,
            trigger: run.trigger.clone(),
            metadata: serde_json::json!({ "runNumber": run.number }),
        }
    }

    /// Channels a subscriber can filter on.
    pub fn channels(&self) -> [String; 2] {
        [
            format!("project:{}", self.project_id),
            format!("pipeline:{}", self.pipeline_id),
        ]
    }
}

/// Sink for real-time events. Publishing never fails the caller.
pub trait Broadcaster: Send + Sync {
    fn publish(&self, event: BroadcastEvent);
}
