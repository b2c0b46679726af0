//! Queue administration endpoints.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use hookline_core::JobId;
use hookline_core::job::{Job, JobCounts, JobStatus, QueueName};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::AppState;
use crate::error::ApiError;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 1000;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{queue}/stats", get(stats))
        .route("/{queue}/jobs", get(list_jobs))
        .route("/{queue}/jobs/{job_id}", get(get_job).delete(remove_job))
        .route("/{queue}/jobs/{job_id}/retry", post(retry_job))
        .route("/{queue}/pause", post(pause))
        .route("/{queue}/resume", post(resume))
        .route("/{queue}/purge", post(purge))
}

#[derive(Debug, Serialize)]
struct QueueStats {
    queue: QueueName,
    paused: bool,
    counts: JobCounts,
}

async fn stats(
    State(state): State<AppState>,
    Path(queue): Path<QueueName>,
) -> Result<Json<QueueStats>, ApiError> {
    let counts = state.queue.get_stats(queue).await?;
    let paused = state.queue.is_paused(queue).await?;
    Ok(Json(QueueStats {
        queue,
        paused,
        counts,
    }))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<JobStatus>,
    limit: Option<i64>,
}

async fn list_jobs(
    State(state): State<AppState>,
    Path(queue): Path<QueueName>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Job>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    Ok(Json(state.queue.list_jobs(queue, query.status, limit).await?))
}

async fn get_job(
    State(state): State<AppState>,
    Path((queue, job_id)): Path<(QueueName, JobId)>,
) -> Result<Json<Job>, ApiError> {
    state
        .queue
        .get_job(queue, job_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("job {} not found", job_id)))
}

async fn retry_job(
    State(state): State<AppState>,
    Path((queue, job_id)): Path<(QueueName, JobId)>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.queue.retry_job(queue, job_id).await?))
}

async fn remove_job(
    State(state): State<AppState>,
    Path((queue, job_id)): Path<(QueueName, JobId)>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.queue.remove_job(queue, job_id).await?))
}

async fn pause(
    State(state): State<AppState>,
    Path(queue): Path<QueueName>,
) -> Result<Json<Value>, ApiError> {
    state.queue.pause(queue).await?;
    Ok(Json(json!({ "queue": queue, "paused": true })))
}

async fn resume(
    State(state): State<AppState>,
    Path(queue): Path<QueueName>,
) -> Result<Json<Value>, ApiError> {
    state.queue.resume(queue).await?;
    Ok(Json(json!({ "queue": queue, "paused": false })))
}

#[derive(Debug, Deserialize)]
struct PurgeRequest {
    grace_ms: u64,
    status: JobStatus,
}

async fn purge(
    State(state): State<AppState>,
    Path(queue): Path<QueueName>,
    Json(request): Json<PurgeRequest>,
) -> Result<Json<Value>, ApiError> {
    let removed = state
        .queue
        .purge(queue, Duration::from_millis(request.grace_ms), request.status)
        .await?;
    let ids: Vec<JobId> = removed.iter().map(|j| j.id).collect();
    Ok(Json(json!({ "removed": ids.len(), "jobs": ids })))
}
