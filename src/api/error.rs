//! API error responses

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::Error;
use crate::dispatch::DispatchError;

/// Error body: `{"error": {"code": ..., "message": ...}}`
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

/// Errors returned by API handlers
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    DeliveryFailed(String),
    Upstream(String),
    NotConfigured(&'static str),
    Internal(String),
}

impl ApiError {
    /// Shorthand for the usual "no such device" response
    #[must_use]
    pub fn device_not_found() -> Self {
        Self::NotFound("device not found".to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            Self::DeliveryFailed(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "delivery_failed", msg),
            Self::Upstream(msg) => (StatusCode::BAD_GATEWAY, "upstream_failed", msg),
            Self::NotConfigured(msg) => (StatusCode::SERVICE_UNAVAILABLE, "not_configured", msg.to_string()),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal server error".to_string(),
                )
            }
        };

        (status, Json(ErrorResponse { error: ErrorDetail { code, message } })).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidInput(msg) => Self::BadRequest(msg),
            Error::Conflict(msg) => Self::Conflict(msg),
            Error::NotFound(msg) => Self::NotFound(msg),
            Error::Auth(msg) => Self::Unauthorized(msg),
            Error::Http(e) => Self::Upstream(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::UnknownCommand(_)
            | DispatchError::BadArguments(_)
            | DispatchError::UnknownToken
            | DispatchError::MalformedMessage(_)
            | DispatchError::NoMatchingDevice => Self::BadRequest(err.to_string()),
            DispatchError::Delivery(e) => Self::DeliveryFailed(e.to_string()),
            DispatchError::Registry(e) => e.into(),
            DispatchError::Internal(msg) => Self::Internal(msg),
        }
    }
}
