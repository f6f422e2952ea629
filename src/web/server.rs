//! Web server using Axum.

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use super::router::create_app_router;
use crate::agency::Agency;
use crate::error::{Error, Result};

/// Largest accepted request body; a full batch of large messages fits comfortably.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Web server configuration.
pub struct WebServerConfig {
    pub port: u16,
    pub host: String,
}

impl Default for WebServerConfig {
    fn default() -> Self {
        Self {
            port: 10000,
            host: "0.0.0.0".to_string(),
        }
    }
}

/// Serve the agency API until Ctrl-C, then terminate every local agent.
pub async fn run_server(config: WebServerConfig, agency: Arc<Agency>) -> Result<()> {
    let app = create_app_router(agency.clone())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| Error::Config(format!("Invalid address: {}", e)))?;

    tracing::info!("Starting agency server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(agency))
        .await?;

    tracing::info!("Agency server stopped");
    Ok(())
}

async fn shutdown_signal(agency: Arc<Agency>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        return;
    }
    tracing::info!("Shutdown requested, terminating agents");
    agency.terminate_all();
}
