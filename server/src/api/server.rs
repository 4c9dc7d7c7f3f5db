//! Router assembly and the HTTP listen loop.

use std::net::SocketAddr;

use anyhow::Result;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware::from_fn_with_state;
use tokio::net::TcpListener;
use tower_http::compression::CompressionLayer;

use crate::app::CoreApp;
use crate::core::constants::INTERACTION_BODY_LIMIT;

use super::auth::require_api_key;
use super::middleware::{self, AllowedOrigins};
use super::routes;

pub struct ApiServer {
    app: CoreApp,
    allowed_origins: AllowedOrigins,
}

impl ApiServer {
    pub fn new(app: CoreApp) -> Self {
        let allowed_origins = AllowedOrigins::new(&app.config.server.host, app.config.server.port);
        Self { app, allowed_origins }
    }

    /// Runs until the shutdown signal fires, then returns the `CoreApp` so
    /// the caller can await `shutdown.shutdown()` and flush background
    /// tasks.
    pub async fn start(self) -> Result<CoreApp> {
        let Self { app, allowed_origins } = self;

        let shutdown = app.shutdown.clone();
        let host = app.config.server.host.clone();
        let port = app.config.server.port;
        let addr = SocketAddr::new(host.parse()?, port);

        let state = app.state();

        let ingest_routes = routes::ingest_routes()
            .layer(DefaultBodyLimit::max(INTERACTION_BODY_LIMIT))
            .with_state(state.clone());

        let dashboard_routes = routes::dashboard_routes()
            .layer(from_fn_with_state(app.auth_state(), require_api_key))
            .with_state(state);

        let router = Router::new()
            .merge(ingest_routes)
            .merge(dashboard_routes)
            .fallback(middleware::handle_404)
            .layer(CompressionLayer::new())
            .layer(middleware::cors(&allowed_origins));

        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(shutdown.wait())
            .await?;

        Ok(app)
    }
}
