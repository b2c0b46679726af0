//! Webhook and delivery repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hookline_core::webhook::{DeliveryOutcome, NewDelivery, Webhook, WebhookDelivery};
use hookline_core::{DeliveryId, ProjectId, WebhookId};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbError, DbResult};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WebhookRow {
    pub id: Uuid,
    pub project_id: Uuid,
    pub secret_ciphertext: String,
    pub events: Vec<String>,
    pub active: bool,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<WebhookRow> for Webhook {
    fn from(row: WebhookRow) -> Self {
        Webhook {
            id: WebhookId::from_uuid(row.id),
            project_id: ProjectId::from_uuid(row.project_id),
            secret_ciphertext: row.secret_ciphertext,
            events: row.events,
            active: row.active,
            last_triggered_at: row.last_triggered_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeliveryRow {
    pub id: Uuid,
    pub webhook_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub outcome: String,
    pub response: Option<String>,
    pub error: Option<String>,
    pub attempt: i32,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DeliveryRow> for WebhookDelivery {
    type Error = DbError;

    fn try_from(row: DeliveryRow) -> Result<Self, Self::Error> {
        let outcome = row
            .outcome
            .parse::<DeliveryOutcome>()
            .map_err(DbError::InvalidData)?;
        Ok(WebhookDelivery {
            id: DeliveryId::from_uuid(row.id),
            webhook_id: WebhookId::from_uuid(row.webhook_id),
            event_type: row.event_type,
            payload: row.payload,
            outcome,
            response: row.response,
            error: row.error,
            attempt: row.attempt,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
pub trait WebhookRepo: Send + Sync {
    /// Register a webhook. The secret must already be encrypted.
    async fn create(
        &self,
        project_id: ProjectId,
        secret_ciphertext: &str,
        events: &[String],
    ) -> DbResult<Webhook>;
    async fn get_by_id(&self, id: WebhookId) -> DbResult<Option<Webhook>>;
    async fn set_active(&self, id: WebhookId, active: bool) -> DbResult<()>;
    async fn touch_last_triggered(&self, id: WebhookId, at: DateTime<Utc>) -> DbResult<()>;

    async fn record_delivery(&self, delivery: NewDelivery) -> DbResult<WebhookDelivery>;
    /// Most recent deliveries first.
    async fn list_deliveries(
        &self,
        webhook_id: WebhookId,
        limit: i64,
    ) -> DbResult<Vec<WebhookDelivery>>;
    /// Delete deliveries created before `older_than`, returning how many went.
    async fn prune_deliveries(&self, older_than: DateTime<Utc>) -> DbResult<u64>;
}

/// PostgreSQL implementation of WebhookRepo.
pub struct PgWebhookRepo {
    pool: PgPool,
}

impl PgWebhookRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookRepo for PgWebhookRepo {
    async fn create(
        &self,
        project_id: ProjectId,
        secret_ciphertext: &str,
        events: &[String],
    ) -> DbResult<Webhook> {
        let row = sqlx::query_as::<_, WebhookRow>(
            r#"
            INSERT INTO webhooks (id, project_id, secret_ciphertext, events, active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, TRUE, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(project_id.as_uuid())
        .bind(secret_ciphertext)
        .bind(events)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn get_by_id(&self, id: WebhookId) -> DbResult<Option<Webhook>> {
        let row = sqlx::query_as::<_, WebhookRow>("SELECT * FROM webhooks WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn set_active(&self, id: WebhookId, active: bool) -> DbResult<()> {
        let result =
            sqlx::query("UPDATE webhooks SET active = $2, updated_at = NOW() WHERE id = $1")
                .bind(id.as_uuid())
                .bind(active)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("webhook {}", id)));
        }
        Ok(())
    }

    async fn touch_last_triggered(&self, id: WebhookId, at: DateTime<Utc>) -> DbResult<()> {
        sqlx::query("UPDATE webhooks SET last_triggered_at = $2, updated_at = NOW() WHERE id = $1")
            .bind(id.as_uuid())
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_delivery(&self, delivery: NewDelivery) -> DbResult<WebhookDelivery> {
        let row = sqlx::query_as::<_, DeliveryRow>(
            r#"
            INSERT INTO webhook_deliveries
                (id, webhook_id, event_type, payload, outcome, response, error, attempt, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(delivery.webhook_id.as_uuid())
        .bind(&delivery.event_type)
        .bind(&delivery.payload)
        .bind(delivery.outcome.to_string())
        .bind(&delivery.response)
        .bind(&delivery.error)
        .bind(delivery.attempt)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn list_deliveries(
        &self,
        webhook_id: WebhookId,
        limit: i64,
    ) -> DbResult<Vec<WebhookDelivery>> {
        let rows = sqlx::query_as::<_, DeliveryRow>(
            r#"
            SELECT * FROM webhook_deliveries
            WHERE webhook_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(webhook_id.as_uuid())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn prune_deliveries(&self, older_than: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM webhook_deliveries WHERE created_at < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
