//! Project repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hookline_core::ProjectId;
use hookline_core::pipeline::Project;
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbResult;

/// Database row for projects.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProjectRow {
    pub id: Uuid,
    pub name: String,
    pub repository_url: String,
    pub branch: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ProjectRow> for Project {
    fn from(row: ProjectRow) -> Self {
        Project {
            id: ProjectId::from_uuid(row.id),
            name: row.name,
            repository_url: row.repository_url,
            branch: row.branch,
        }
    }
}

#[async_trait]
pub trait ProjectRepo: Send + Sync {
    async fn create(
        &self,
        name: &str,
        repository_url: &str,
        branch: Option<&str>,
    ) -> DbResult<Project>;

    /// Look up a project; `None` when it does not exist.
    async fn find(&self, id: ProjectId) -> DbResult<Option<Project>>;

    async fn list(&self) -> DbResult<Vec<Project>>;
}

/// PostgreSQL implementation of ProjectRepo.
pub struct PgProjectRepo {
    pool: PgPool,
}

impl PgProjectRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProjectRepo for PgProjectRepo {
    async fn create(
        &self,
        name: &str,
        repository_url: &str,
        branch: Option<&str>,
    ) -> DbResult<Project> {
        let row = sqlx::query_as::<_, ProjectRow>(
            r#"
            INSERT INTO projects (id, name, repository_url, branch, created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(name)
        .bind(repository_url)
        .bind(branch)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn find(&self, id: ProjectId) -> DbResult<Option<Project>> {
        let row = sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn list(&self) -> DbResult<Vec<Project>> {
        let rows = sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
