//! Command catalog endpoint

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};

use super::ApiState;
use crate::catalog::Command;

/// Build the `/command` router (the caller adds the session layer)
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/command", get(list_commands))
        .with_state(state)
}

/// Every command in the catalog
async fn list_commands(State(state): State<Arc<ApiState>>) -> Json<Vec<Command>> {
    Json(state.dispatcher.catalog().all().to_vec())
}
