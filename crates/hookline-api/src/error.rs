//! API error handling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use hookline_queue::QueueError;
use serde_json::json;

use crate::services::pipeline_trigger::TriggerError;
use crate::services::webhook_processor::WebhookError;

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Conflict(String),
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<hookline_core::Error> for ApiError {
    fn from(err: hookline_core::Error) -> Self {
        match err {
            hookline_core::Error::NotFound(msg) => ApiError::NotFound(msg),
            hookline_core::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            hookline_core::Error::Unauthorized(msg) => ApiError::Unauthorized(msg),
            hookline_core::Error::Conflict(msg) => ApiError::Conflict(msg),
            hookline_core::Error::InvalidTransition { .. } => ApiError::Conflict(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<hookline_db::DbError> for ApiError {
    fn from(err: hookline_db::DbError) -> Self {
        match err {
            hookline_db::DbError::NotFound(msg) => ApiError::NotFound(msg),
            hookline_db::DbError::Duplicate(msg) => ApiError::Conflict(msg),
            hookline_db::DbError::InvalidData(msg) => ApiError::Conflict(msg),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::JobNotFound(_) => ApiError::NotFound(err.to_string()),
            QueueError::JobActive(_) | QueueError::InvalidStatus { .. } => {
                ApiError::Conflict(err.to_string())
            }
            QueueError::NotPurgeable(_)
            | QueueError::UnknownJobKind { .. }
            | QueueError::InvalidCron { .. }
            | QueueError::DurationOutOfRange(_) => ApiError::BadRequest(err.to_string()),
            QueueError::Closed => ApiError::Unavailable(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::SignatureMismatch => ApiError::Unauthorized(err.to_string()),
            WebhookError::WebhookNotFound(_) => ApiError::NotFound(err.to_string()),
            WebhookError::InvalidPayload(_) => ApiError::BadRequest(err.to_string()),
            WebhookError::Db(e) => e.into(),
            WebhookError::Queue(e) => e.into(),
            WebhookError::Core(e) => e.into(),
        }
    }
}

impl From<TriggerError> for ApiError {
    fn from(err: TriggerError) -> Self {
        match err {
            TriggerError::RunNotFound(_) => ApiError::NotFound(err.to_string()),
            TriggerError::Core(e) => e.into(),
            TriggerError::Db(e) => e.into(),
        }
    }
}
