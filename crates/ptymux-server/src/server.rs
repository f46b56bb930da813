use anyhow::{Context, Result};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use ptymux_terminal::{PtyRegistry, RegistryConfig};

use crate::routes::{self, AppState};

/// Web server configuration
#[derive(Debug, Clone)]
pub struct WebServerConfig {
    pub bind_addr: SocketAddr,
    pub registry: RegistryConfig,
}

/// Web server instance
pub struct WebServer {
    config: WebServerConfig,
    registry: Arc<PtyRegistry>,
}

impl WebServer {
    /// Create a new web server
    pub fn new(config: WebServerConfig) -> Self {
        let registry = Arc::new(PtyRegistry::new(config.registry.clone()));
        Self { config, registry }
    }

    /// Get the pty registry
    pub fn registry(&self) -> Arc<PtyRegistry> {
        Arc::clone(&self.registry)
    }

    /// Router with the API routes plus tracing and CORS layers
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: self.registry(),
        };

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        routes::create_router(state)
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until `shutdown` fires. Every pty is killed on the way out, which
    /// also ends the open event streams so the graceful shutdown can finish.
    pub async fn start(self, shutdown: CancellationToken) -> Result<()> {
        let app = self.router();
        let sweeper = self.registry.spawn_sweeper(shutdown.child_token());

        let listener = tokio::net::TcpListener::bind(&self.config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.config.bind_addr))?;
        info!("pty server listening on http://{}", listener.local_addr()?);

        let registry = self.registry();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("shutting down, killing pty sessions");
                registry.shutdown().await;
            })
            .await
            .context("Server error")?;

        let _ = sweeper.await;
        info!("pty server stopped");
        Ok(())
    }
}
