use std::sync::Arc;

use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use grid_hedge_orchestrator::SessionRegistry;

use crate::handlers::{self, ApiState};

/// HTTP control surface over the session registry.
///
/// Thin dispatch only: every route forwards to the registry, which owns the
/// actual lifecycle rules.
pub struct ApiServer {
    state: ApiState,
}

impl ApiServer {
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>, admin_secret: impl Into<String>) -> Self {
        Self {
            state: ApiState {
                registry,
                admin_secret: admin_secret.into(),
            },
        }
    }

    /// Builds the router with all session and admin routes.
    #[must_use]
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/api/sessions", post(handlers::register_session))
            .route("/api/sessions", get(handlers::list_sessions))
            .route("/api/sessions/:user_id", get(handlers::get_session))
            .route("/api/sessions/:user_id", delete(handlers::unregister_session))
            .route("/api/sessions/:user_id/start", put(handlers::start_session))
            .route("/api/sessions/:user_id/stop", put(handlers::stop_session))
            .route(
                "/api/sessions/:user_id/close-positions",
                post(handlers::force_close_positions),
            )
            .with_state(self.state.clone())
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Binds and serves until the process exits.
    ///
    /// # Errors
    /// Returns an error if the address cannot be bound or serving fails.
    pub async fn serve(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("control API listening on {addr}");

        axum::serve(listener, self.router()).await?;

        Ok(())
    }
}
