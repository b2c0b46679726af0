//! Pipeline run inspection and cancellation.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use hookline_core::RunId;
use hookline_core::pipeline::PipelineRun;
use tracing::info;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{run_id}", get(get_run))
        .route("/{run_id}/cancel", post(cancel_run))
}

async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<RunId>,
) -> Result<Json<PipelineRun>, ApiError> {
    Ok(Json(state.trigger.get_run(run_id).await?))
}

async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<RunId>,
) -> Result<Json<PipelineRun>, ApiError> {
    let run = state.trigger.cancel(run_id).await?;
    info!(run_id = %run_id, "Run cancelled");
    Ok(Json(run))
}
