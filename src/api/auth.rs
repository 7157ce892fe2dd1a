//! Session authentication: login endpoints and the owner middleware

use std::sync::Arc;

use axum::{
    Form, Router,
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;

use super::{ApiError, ApiState};
use crate::Error;

/// Authenticated identity of the current request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner(pub String);

/// Middleware rejecting requests without a valid session
///
/// Injects the session identity as an [`Owner`] extension.
pub async fn require_session(
    State(state): State<Arc<ApiState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let identity = state.identity.identity(req.headers());
    if identity.is_empty() {
        tracing::debug!(path = %req.uri().path(), "request without session");
        return Err(StatusCode::UNAUTHORIZED);
    }

    req.extensions_mut().insert(Owner(identity));
    Ok(next.run(req).await)
}

/// Build the `/auth` router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/check", get(check))
        .route("/auth/logout", post(logout))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct LoginForm {
    #[serde(default)]
    assertion: String,
}

/// Verify an identity assertion and start a session
async fn login(
    State(state): State<Arc<ApiState>>,
    Form(form): Form<LoginForm>,
) -> Result<Response, ApiError> {
    let (Some(sessions), Some(verifier)) = (&state.sessions, &state.verifier) else {
        return Err(ApiError::NotConfigured("login is not configured"));
    };

    let email = match verifier.verify(&form.assertion).await {
        Ok(email) => email,
        Err(Error::Auth(reason)) => return Err(ApiError::Unauthorized(reason)),
        Err(e) => {
            tracing::warn!(error = %e, "identity verifier unavailable");
            return Err(ApiError::Upstream("identity verifier unavailable".to_string()));
        }
    };

    let cookie = sessions.issue_cookie(&email)?;
    tracing::info!(%email, "user logged in");

    Ok(([(header::SET_COOKIE, cookie)], "ok").into_response())
}

/// `ok` when the request carries a session, empty otherwise
async fn check(State(state): State<Arc<ApiState>>, headers: HeaderMap) -> &'static str {
    if state.identity.is_authenticated(&headers) {
        "ok"
    } else {
        ""
    }
}

/// End the current session
async fn logout(State(state): State<Arc<ApiState>>) -> Result<Response, ApiError> {
    let sessions = state
        .sessions
        .as_ref()
        .ok_or(ApiError::NotConfigured("login is not configured"))?;

    Ok(([(header::SET_COOKIE, sessions.clear_cookie())], "").into_response())
}
