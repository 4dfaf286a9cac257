//! API Server
//!
//! HTTP + WebSocket front for the round engine.

use super::{
    handlers::AppState,
    middleware::{create_cors_layer, request_id_middleware},
    routes::create_router,
};
use crate::config::ApiConfig;
use crate::games::engine::RoundEngine;
use crate::metrics::GameMetrics;
use std::{net::SocketAddr, sync::Arc};
use tokio::signal;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

pub struct ApiServer {
    config: ApiConfig,
    engine: Arc<RoundEngine>,
    metrics: Arc<GameMetrics>,
    metrics_enabled: bool,
}

impl ApiServer {
    pub fn new(config: ApiConfig, engine: Arc<RoundEngine>, metrics: Arc<GameMetrics>) -> Self {
        Self {
            config,
            engine,
            metrics,
            metrics_enabled: true,
        }
    }

    /// Serve `GET /metrics` or not
    pub fn with_metrics_endpoint(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    /// Serve until Ctrl+C or SIGTERM
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let addr = self.socket_addr()?;
        let app = self.create_app();

        info!("🌐 Starting Bingo Hall API Server");
        info!("   Listen: http://{}", addr);
        info!("   CORS: {:?}", self.config.allowed_origins);
        info!("   Request timeout: {}s", self.config.request_timeout_secs);
        info!("   Metrics enabled: {}", self.metrics_enabled);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("✅ API Server running");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("🛑 API Server stopped gracefully");
        Ok(())
    }

    /// Router with the middleware stack applied
    pub fn create_app(&self) -> axum::Router {
        let state = Arc::new(AppState {
            engine: self.engine.clone(),
            metrics: self.metrics.clone(),
            config: self.config.clone(),
        });

        create_router(state, self.metrics_enabled)
            // Request ID middleware (first for tracing)
            .layer(axum::middleware::from_fn(request_id_middleware))
            // CORS layer (before timeout to handle preflight)
            .layer(create_cors_layer(self.config.allowed_origins.clone()))
            .layer(TimeoutLayer::new(self.config.request_timeout()))
            .layer(TraceLayer::new_for_http())
    }

    fn socket_addr(&self) -> Result<SocketAddr, Box<dyn std::error::Error>> {
        Ok(SocketAddr::from((
            self.config.host.parse::<std::net::IpAddr>()?,
            self.config.port,
        )))
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
