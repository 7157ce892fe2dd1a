//! Invocation retrieval for devices
//!
//! Devices are not logged in. Possession of a pending token is the only
//! credential, and it works exactly once.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};

use super::{ApiError, ApiState};
use crate::dispatch::{InvocationContext, InvocationToken};

/// Build the `/invocation` router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/invocation/{token}", get(retrieve_invocation))
        .with_state(state)
}

/// Trade a pending token for its invocation context
async fn retrieve_invocation(
    State(state): State<Arc<ApiState>>,
    Path(raw_token): Path<String>,
) -> Result<Json<InvocationContext>, ApiError> {
    let token: InvocationToken = raw_token
        .parse()
        .map_err(|_| ApiError::BadRequest("malformed invocation token".to_string()))?;

    let context = state.dispatcher.retrieve(token).await?;
    tracing::info!(command_id = context.command_id, "invocation retrieved");

    Ok(Json(context))
}
