//! Webhook delivery audit listing.

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use hookline_core::WebhookId;
use hookline_core::webhook::WebhookDelivery;
use serde::Deserialize;

use crate::AppState;
use crate::error::ApiError;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

pub fn router() -> Router<AppState> {
    Router::new().route("/{webhook_id}/deliveries", get(list_deliveries))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<i64>,
}

async fn list_deliveries(
    State(state): State<AppState>,
    Path(webhook_id): Path<WebhookId>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<WebhookDelivery>>, ApiError> {
    if state.repos.webhooks.get_by_id(webhook_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("webhook {} not found", webhook_id)));
    }
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let deliveries = state
        .repos
        .webhooks
        .list_deliveries(webhook_id, limit)
        .await?;
    Ok(Json(deliveries))
}

#[cfg(test)]
mod tests {
    use crate::routes::tests::{send, state};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use hookline_core::webhook::{DeliveryOutcome, NewDelivery};
    use hookline_db::{ProjectRepo, WebhookRepo};

    #[tokio::test]
    async fn test_lists_newest_first() {
        let (state, repos) = state();
        let project = ProjectRepo::create(&*repos, "app", "https://github.com/acme/app", None)
            .await
            .unwrap();
        let webhook = WebhookRepo::create(&*repos, project.id, "sealed", &[])
            .await
            .unwrap();
        for event in ["ping", "push"] {
            repos
                .record_delivery(NewDelivery {
                    webhook_id: webhook.id,
                    event_type: event.to_string(),
                    payload: serde_json::json!({}),
                    outcome: DeliveryOutcome::Success,
                    response: None,
                    error: None,
                    attempt: 1,
                })
                .await
                .unwrap();
        }

        let (status, body) = send(
            &state,
            Request::get(format!("/api/v1/webhooks/{}/deliveries?limit=10", webhook.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let list = body.as_array().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0]["event_type"], "push");
    }
}
