//! HTTP API server for the whereis gateway

pub mod auth;
pub mod commands;
pub mod devices;
mod error;
pub mod health;
pub mod invocation;
pub mod rate_limit;
pub mod sms;

use std::sync::Arc;

use axum::{Router, middleware};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use auth::Owner;
pub use error::{ApiError, ErrorDetail, ErrorResponse};

use crate::Result;
use crate::catalog::CommandCatalog;
use crate::db::{DbPool, DeviceRepo};
use crate::dispatch::{CommandDispatcher, PendingInvocations, PushNotifier, SmsResolver};
use crate::security::{IdentityGate, IdentityVerifier, SessionManager};

/// Shared state for API handlers
pub struct ApiState {
    pub db: DbPool,
    pub dispatcher: Arc<CommandDispatcher>,
    /// Present when SMS commands are enabled
    pub sms: Option<SmsResolver>,
    /// Decides who a request belongs to
    pub identity: Arc<dyn IdentityGate>,
    /// Issues session cookies on login; `None` disables `/auth/login`
    pub sessions: Option<Arc<SessionManager>>,
    pub verifier: Option<Arc<IdentityVerifier>>,
    pub sms_limiter: Option<rate_limit::SharedLimiter>,
}

/// Identity gate used when no session manager is configured
struct Anonymous;

impl IdentityGate for Anonymous {
    fn identity(&self, _headers: &axum::http::HeaderMap) -> String {
        String::new()
    }
}

/// Configuration for building an API server
pub struct ApiServerBuilder {
    db: DbPool,
    catalog: Arc<CommandCatalog>,
    notifier: Arc<dyn PushNotifier>,
    pending: Option<Arc<PendingInvocations>>,
    host: String,
    port: u16,
    identity: Option<Arc<dyn IdentityGate>>,
    sessions: Option<Arc<SessionManager>>,
    verifier: Option<Arc<IdentityVerifier>>,
    sms_enabled: bool,
    sms_rate_limit: Option<u32>,
}

impl ApiServerBuilder {
    /// Create a new API server builder
    #[must_use]
    pub fn new(db: DbPool, catalog: Arc<CommandCatalog>, notifier: Arc<dyn PushNotifier>) -> Self {
        Self {
            db,
            catalog,
            notifier,
            pending: None,
            host: "127.0.0.1".to_string(),
            port: crate::config::DEFAULT_PORT,
            identity: None,
            sessions: None,
            verifier: None,
            sms_enabled: true,
            sms_rate_limit: None,
        }
    }

    /// Set the address to bind
    #[must_use]
    pub fn host(mut self, host: String) -> Self {
        self.host = host;
        self
    }

    /// Set the port to listen on
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Share an existing pending invocation store (e.g. with a TTL sweeper)
    #[must_use]
    pub fn pending(mut self, pending: Arc<PendingInvocations>) -> Self {
        self.pending = Some(pending);
        self
    }

    /// Set the session manager, which also becomes the identity gate
    #[must_use]
    pub fn sessions(mut self, sessions: Arc<SessionManager>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Override the identity gate
    #[must_use]
    pub fn identity_gate(mut self, gate: Arc<dyn IdentityGate>) -> Self {
        self.identity = Some(gate);
        self
    }

    /// Set the identity assertion verifier used by `/auth/login`
    #[must_use]
    pub fn verifier(mut self, verifier: Arc<IdentityVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Enable or disable `/command/sms`
    #[must_use]
    pub const fn sms_enabled(mut self, enabled: bool) -> Self {
        self.sms_enabled = enabled;
        self
    }

    /// Limit `/command/sms` to this many requests per minute
    #[must_use]
    pub const fn sms_rate_limit(mut self, requests_per_minute: u32) -> Self {
        self.sms_rate_limit = Some(requests_per_minute);
        self
    }

    /// Build the API server
    #[must_use]
    pub fn build(self) -> ApiServer {
        let dispatcher = Arc::new(CommandDispatcher::new(
            DeviceRepo::new(self.db.clone()),
            self.catalog,
            self.pending.unwrap_or_default(),
            self.notifier,
        ));

        let sms = self
            .sms_enabled
            .then(|| SmsResolver::new(dispatcher.clone()));

        let identity: Arc<dyn IdentityGate> = match (self.identity, &self.sessions) {
            (Some(gate), _) => gate,
            (None, Some(sessions)) => sessions.clone(),
            (None, None) => {
                tracing::warn!("no session manager configured, all device routes will reject");
                Arc::new(Anonymous)
            }
        };

        let state = Arc::new(ApiState {
            db: self.db,
            dispatcher,
            sms,
            identity,
            sessions: self.sessions,
            verifier: self.verifier,
            sms_limiter: self.sms_rate_limit.map(rate_limit::create_limiter),
        });

        ApiServer {
            state,
            host: self.host,
            port: self.port,
        }
    }
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    host: String,
    port: u16,
}

impl ApiServer {
    /// Shared handler state
    #[must_use]
    pub const fn state(&self) -> &Arc<ApiState> {
        &self.state
    }

    /// Build the router with all routes
    #[must_use]
    pub fn router(&self) -> Router {
        let session_layer =
            middleware::from_fn_with_state(self.state.clone(), auth::require_session);

        // Owner-scoped routes
        let protected = Router::new()
            .merge(devices::router(self.state.clone()))
            .merge(commands::router(self.state.clone()))
            .route_layer(session_layer);

        let router = Router::new()
            .merge(protected)
            .merge(auth::router(self.state.clone()))
            .merge(invocation::router(self.state.clone()))
            .merge(sms::router(self.state.clone()))
            .merge(health::router())
            .merge(health::ready_router(self.state.clone()));

        // CORS layer for cross-origin requests from the web client
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        router.layer(cors).layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(%addr, "API server listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}
