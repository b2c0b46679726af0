//! API routes.

pub mod deliveries;
pub mod health;
pub mod queues;
pub mod runs;
pub mod webhooks;

use crate::AppState;
use crate::ws::ws_handler;
use axum::Router;
use axum::routing::get;

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_router())
        .nest("/webhooks", webhooks::router())
        .route("/ws", get(ws_handler))
        .merge(health::router())
        .with_state(state)
}

fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/queues", queues::router())
        .nest("/runs", runs::router())
        .nest("/webhooks", deliveries::router())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::services::AesGcmCipher;
    use crate::services::pipeline_trigger::tests::queue;
    use crate::state::Repos;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use hookline_db::MemoryRepos;
    use std::sync::Arc;
    use tower::ServiceExt;

    pub(crate) const MASTER_KEY: &str = "router-test-key";

    pub(crate) fn state() -> (AppState, Arc<MemoryRepos>) {
        let repos = Arc::new(MemoryRepos::new());
        let state = AppState::new(
            None,
            Repos::memory(repos.clone()),
            queue(),
            Arc::new(AesGcmCipher::from_master_key(MASTER_KEY)),
        );
        (state, repos)
    }

    pub(crate) async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        // Extractor rejections answer in plain text.
        let body = serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned())
        });
        (status, body)
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _) = state();
        let (status, body) = send(
            &state,
            Request::get("/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = send(
            &state,
            Request::get("/health/ready").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let (state, _) = state();
        let response = router(state)
            .oneshot(Request::get("/api/v1/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
