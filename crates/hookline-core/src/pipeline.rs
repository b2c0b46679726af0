//! Projects, pipelines and pipeline runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{PipelineId, ProjectId, RunId};

/// A project owning pipelines and webhooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub repository_url: String,
    /// Only pushes to this branch trigger pipelines, when set.
    pub branch: Option<String>,
}

/// What kind of event starts a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerCondition {
    Manual,
    Push,
    PullRequest,
    /// Generic webhook: fires on any supported source-control event.
    Webhook,
    Schedule,
}

impl std::fmt::Display for TriggerCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerCondition::Manual => write!(f, "manual"),
            TriggerCondition::Push => write!(f, "push"),
            TriggerCondition::PullRequest => write!(f, "pull_request"),
            TriggerCondition::Webhook => write!(f, "webhook"),
            TriggerCondition::Schedule => write!(f, "schedule"),
        }
    }
}

impl std::str::FromStr for TriggerCondition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(TriggerCondition::Manual),
            "push" => Ok(TriggerCondition::Push),
            "pull_request" | "pull-request" => Ok(TriggerCondition::PullRequest),
            "webhook" => Ok(TriggerCondition::Webhook),
            "schedule" => Ok(TriggerCondition::Schedule),
            _ => Err(format!("Unknown trigger condition: {}", s)),
        }
    }
}

/// One stage of a pipeline, executed by the stage-execution collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDefinition {
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub commands: Vec<String>,
    /// Names of stages that must succeed first.
    #[serde(default)]
    pub needs: Vec<String>,
}

/// A pipeline definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: PipelineId,
    pub project_id: ProjectId,
    pub name: String,
    pub active: bool,
    pub trigger: TriggerCondition,
    pub stages: Vec<StageDefinition>,
    /// Status of the most recent run.
    pub status: Option<RunStatus>,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Lifecycle state of a pipeline run.
///
/// `PENDING -> RUNNING -> {SUCCESS, FAILED}`, and `PENDING | RUNNING -> CANCELLED`.
/// Terminal states never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Success | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Running, RunStatus::Success)
                | (RunStatus::Running, RunStatus::Failed)
                | (RunStatus::Pending, RunStatus::Cancelled)
                | (RunStatus::Running, RunStatus::Cancelled)
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "PENDING"),
            RunStatus::Running => write!(f, "RUNNING"),
            RunStatus::Success => write!(f, "SUCCESS"),
            RunStatus::Failed => write!(f, "FAILED"),
            RunStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(RunStatus::Pending),
            "RUNNING" => Ok(RunStatus::Running),
            "SUCCESS" => Ok(RunStatus::Success),
            "FAILED" => Ok(RunStatus::Failed),
            "CANCELLED" => Ok(RunStatus::Cancelled),
            _ => Err(format!("Unknown run status: {}", s)),
        }
    }
}

/// Source-control details of what triggered a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TriggerMetadata {
    pub branch: String,
    pub commit_hash: String,
    pub commit_message: Option<String>,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub repository_url: String,
    pub triggered_by: String,
    pub pr_number: Option<u64>,
    pub pr_url: Option<String>,
    pub base_branch: Option<String>,
}

/// One execution of a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: RunId,
    pub pipeline_id: PipelineId,
    /// Per-pipeline incrementing run number.
    pub number: i64,
    pub status: RunStatus,
    pub trigger: TriggerMetadata,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Payload of an `execute-pipeline` job, consumed by the stage executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineJobPayload {
    pub pipeline_id: PipelineId,
    pub pipeline_run_id: RunId,
    pub project_id: ProjectId,
    pub repository_url: String,
    pub branch: String,
    pub stages: Vec<StageDefinition>,
    pub triggered_by: String,
}
