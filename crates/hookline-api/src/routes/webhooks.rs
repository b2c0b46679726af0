//! Inbound webhook endpoint for source-control providers.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use hookline_core::WebhookId;
use serde_json::{Value, json};

use crate::AppState;
use crate::error::ApiError;
use crate::services::signature::{EVENT_HEADER, SIGNATURE_HEADER};

pub fn router() -> Router<AppState> {
    Router::new().route("/{webhook_id}", post(receive))
}

/// Verify and process one delivery. The body is taken raw because the
/// signature covers the exact bytes sent.
async fn receive(
    State(state): State<AppState>,
    Path(webhook_id): Path<WebhookId>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let event_type = headers
        .get(EVENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());

    let processed = state
        .webhooks
        .process(webhook_id, event_type, signature, &body)
        .await?;

    let runs: Vec<_> = processed.runs.iter().map(|r| r.id).collect();
    Ok(Json(json!({
        "deliveryId": processed.delivery.id,
        "outcome": processed.delivery.outcome,
        "runs": runs,
    })))
}
