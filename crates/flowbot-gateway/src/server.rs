use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use flowbot_core::config::GatewayConfig;

use crate::routes;
use crate::state::AppState;

/// Build the HTTP router. Exposed separately so tests can drive it without a socket.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(routes::health))
        .route(
            "/api/owners/{owner}/flows/{flow_id}/messages",
            post(routes::send_message),
        )
        .route(
            "/api/owners/{owner}/flows/{flow_id}/sessions/{key}",
            get(routes::get_session).delete(routes::reset_session),
        )
        // Chat widgets are embedded on arbitrary sites.
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// HTTP gateway server built on axum.
pub struct GatewayServer {
    config: GatewayConfig,
    state: Arc<AppState>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// Run the gateway server until the cancellation token is triggered.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let app = router(self.state.clone());

        let listener = TcpListener::bind(&self.config.bind).await?;
        info!(bind = %self.config.bind, "Gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Gateway shut down");
        Ok(())
    }
}
