//! Pipeline and pipeline run repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hookline_core::pipeline::{
    Pipeline, PipelineRun, RunStatus, StageDefinition, TriggerCondition, TriggerMetadata,
};
use hookline_core::{PipelineId, ProjectId, RunId};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbError, DbResult};

/// A pipeline record in the database.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PipelineRecord {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub active: bool,
    pub trigger: String,
    pub stages: serde_json::Value,
    pub status: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PipelineRecord> for Pipeline {
    type Error = DbError;

    fn try_from(record: PipelineRecord) -> Result<Self, Self::Error> {
        let trigger = record
            .trigger
            .parse::<TriggerCondition>()
            .map_err(DbError::InvalidData)?;
        let stages: Vec<StageDefinition> = serde_json::from_value(record.stages)
            .map_err(|e| DbError::InvalidData(format!("pipeline stages: {}", e)))?;
        let status = record
            .status
            .map(|s| s.parse::<RunStatus>())
            .transpose()
            .map_err(DbError::InvalidData)?;

        Ok(Pipeline {
            id: PipelineId::from_uuid(record.id),
            project_id: ProjectId::from_uuid(record.project_id),
            name: record.name,
            active: record.active,
            trigger,
            stages,
            status,
            last_run_at: record.last_run_at,
        })
    }
}

/// A pipeline run record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PipelineRunRecord {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub number: i64,
    pub status: String,
    pub trigger_info: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<PipelineRunRecord> for PipelineRun {
    type Error = DbError;

    fn try_from(record: PipelineRunRecord) -> Result<Self, Self::Error> {
        let status = record
            .status
            .parse::<RunStatus>()
            .map_err(DbError::InvalidData)?;
        let trigger: TriggerMetadata = serde_json::from_value(record.trigger_info)
            .map_err(|e| DbError::InvalidData(format!("run trigger metadata: {}", e)))?;

        Ok(PipelineRun {
            id: RunId::from_uuid(record.id),
            pipeline_id: PipelineId::from_uuid(record.pipeline_id),
            number: record.number,
            status,
            trigger,
            created_at: record.created_at,
            started_at: record.started_at,
            finished_at: record.finished_at,
        })
    }
}

#[async_trait]
pub trait PipelineRepo: Send + Sync {
    async fn create(
        &self,
        project_id: ProjectId,
        name: &str,
        trigger: TriggerCondition,
        stages: &[StageDefinition],
        active: bool,
    ) -> DbResult<Pipeline>;
    async fn get_by_id(&self, id: PipelineId) -> DbResult<Option<Pipeline>>;

    /// Active pipelines of a project whose trigger is one of `triggers`.
    async fn find_active_by_project(
        &self,
        project_id: ProjectId,
        triggers: &[TriggerCondition],
    ) -> DbResult<Vec<Pipeline>>;

    /// Update the cached status of the most recent run.
    async fn update_cached_status(
        &self,
        id: PipelineId,
        status: RunStatus,
        last_run_at: Option<DateTime<Utc>>,
    ) -> DbResult<()>;

    /// Create a PENDING run with the next run number.
    async fn create_run(
        &self,
        pipeline_id: PipelineId,
        trigger: &TriggerMetadata,
    ) -> DbResult<PipelineRun>;
    async fn get_run(&self, id: RunId) -> DbResult<Option<PipelineRun>>;
    async fn list_runs(&self, pipeline_id: PipelineId, limit: i64) -> DbResult<Vec<PipelineRun>>;

    /// Move a run from `from` to `to`. Returns `None` when the run was no
    /// longer in `from` (another writer got there first).
    async fn transition_run(
        &self,
        id: RunId,
        from: RunStatus,
        to: RunStatus,
    ) -> DbResult<Option<PipelineRun>>;
}

pub(crate) fn check_transition(from: RunStatus, to: RunStatus) -> DbResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(DbError::InvalidData(format!(
            "illegal run transition {} -> {}",
            from, to
        )))
    }
}

/// PostgreSQL implementation of PipelineRepo.
pub struct PgPipelineRepo {
    pool: PgPool,
}

impl PgPipelineRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PipelineRepo for PgPipelineRepo {
    async fn create(
        &self,
        project_id: ProjectId,
        name: &str,
        trigger: TriggerCondition,
        stages: &[StageDefinition],
        active: bool,
    ) -> DbResult<Pipeline> {
        let stages = serde_json::to_value(stages)
            .map_err(|e| DbError::InvalidData(format!("pipeline stages: {}", e)))?;
        let record = sqlx::query_as::<_, PipelineRecord>(
            r#"
            INSERT INTO pipelines (id, project_id, name, active, trigger, stages, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(project_id.as_uuid())
        .bind(name)
        .bind(active)
        .bind(trigger.to_string())
        .bind(stages)
        .fetch_one(&self.pool)
        .await?;
        record.try_into()
    }

    async fn get_by_id(&self, id: PipelineId) -> DbResult<Option<Pipeline>> {
        sqlx::query_as::<_, PipelineRecord>("SELECT * FROM pipelines WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn find_active_by_project(
        &self,
        project_id: ProjectId,
        triggers: &[TriggerCondition],
    ) -> DbResult<Vec<Pipeline>> {
        let triggers: Vec<String> = triggers.iter().map(|t| t.to_string()).collect();
        let records = sqlx::query_as::<_, PipelineRecord>(
            r#"
            SELECT * FROM pipelines
            WHERE project_id = $1 AND active AND trigger = ANY($2)
            ORDER BY created_at
            "#,
        )
        .bind(project_id.as_uuid())
        .bind(&triggers)
        .fetch_all(&self.pool)
        .await?;
        records.into_iter().map(TryInto::try_into).collect()
    }

    async fn update_cached_status(
        &self,
        id: PipelineId,
        status: RunStatus,
        last_run_at: Option<DateTime<Utc>>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE pipelines
            SET status = $2, last_run_at = COALESCE($3, last_run_at), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(status.to_string())
        .bind(last_run_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("pipeline {}", id)));
        }
        Ok(())
    }

    async fn create_run(
        &self,
        pipeline_id: PipelineId,
        trigger: &TriggerMetadata,
    ) -> DbResult<PipelineRun> {
        let trigger_info = serde_json::to_value(trigger)
            .map_err(|e| DbError::InvalidData(format!("run trigger metadata: {}", e)))?;
        let record = sqlx::query_as::<_, PipelineRunRecord>(
            r#"
            INSERT INTO pipeline_runs (id, pipeline_id, number, status, trigger_info, created_at)
            VALUES (
                $1, $2,
                COALESCE((SELECT MAX(number) FROM pipeline_runs WHERE pipeline_id = $2), 0) + 1,
                $3, $4, NOW()
            )
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(pipeline_id.as_uuid())
        .bind(RunStatus::Pending.to_string())
        .bind(trigger_info)
        .fetch_one(&self.pool)
        .await?;
        record.try_into()
    }

    async fn get_run(&self, id: RunId) -> DbResult<Option<PipelineRun>> {
        sqlx::query_as::<_, PipelineRunRecord>("SELECT * FROM pipeline_runs WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn list_runs(&self, pipeline_id: PipelineId, limit: i64) -> DbResult<Vec<PipelineRun>> {
        let records = sqlx::query_as::<_, PipelineRunRecord>(
            "SELECT * FROM pipeline_runs WHERE pipeline_id = $1 ORDER BY number DESC LIMIT $2",
        )
        .bind(pipeline_id.as_uuid())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        records.into_iter().map(TryInto::try_into).collect()
    }

    async fn transition_run(
        &self,
        id: RunId,
        from: RunStatus,
        to: RunStatus,
    ) -> DbResult<Option<PipelineRun>> {
        check_transition(from, to)?;
        sqlx::query_as::<_, PipelineRunRecord>(
            r#"
            UPDATE pipeline_runs
            SET status = $3,
                started_at = CASE WHEN $3 = 'RUNNING' THEN NOW() ELSE started_at END,
                finished_at = CASE WHEN $4 THEN NOW() ELSE finished_at END
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(from.to_string())
        .bind(to.to_string())
        .bind(to.is_terminal())
        .fetch_optional(&self.pool)
        .await?
        .map(TryInto::try_into)
        .transpose()
    }
}
