//! Inbound SMS command endpoint

use std::sync::Arc;

use axum::{Router, extract::State, http::StatusCode, middleware, routing::post};

use super::{ApiError, ApiState, rate_limit};

/// Build the `/command/sms` router, rate limited when a limiter is configured
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/command/sms", post(trigger_via_sms))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_middleware,
        ))
        .with_state(state)
}

/// Trigger a command from a plain-text `"<identity> <pin> <command>"` body
///
/// Only the status code is meaningful; no reply is sent to the sender.
async fn trigger_via_sms(
    State(state): State<Arc<ApiState>>,
    body: String,
) -> Result<StatusCode, ApiError> {
    let resolver = state
        .sms
        .as_ref()
        .ok_or(ApiError::NotConfigured("SMS commands are disabled"))?;

    match resolver.handle(&body).await {
        Ok(_) => Ok(StatusCode::OK),
        Err(e) => {
            tracing::info!(error = %e, "SMS command rejected");
            Err(e.into())
        }
    }
}
