//! Health check endpoints.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use tracing::warn;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Ready once the database answers and the queues still accept work.
async fn ready(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    if let Some(pool) = &state.pool {
        sqlx::query("SELECT 1").execute(pool).await.map_err(|e| {
            warn!(error = %e, "Readiness check failed");
            ApiError::Unavailable("database unavailable".to_string())
        })?;
    }
    if state.queue.is_closed() {
        return Err(ApiError::Unavailable("queues draining".to_string()));
    }
    Ok(Json(json!({ "status": "ready" })))
}
