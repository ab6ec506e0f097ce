//! Liveness and metrics endpoint
//!
//! - `GET /` answers `i am ok`
//! - `GET /metrics` returns the Prometheus text exposition

use std::future::Future;
use std::net::SocketAddr;

use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::metrics;

/// Build the router with all routes
pub fn router() -> Router {
    Router::new()
        .route("/", get(liveness_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
}

async fn liveness_handler() -> &'static str {
    "i am ok"
}

async fn metrics_handler() -> impl IntoResponse {
    match metrics::encode_metrics() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Serve until `shutdown_signal` resolves
pub async fn serve(
    config: &ServerConfig,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.health_port);
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::config(format!("invalid health server address {addr}: {e}")))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Health server listening");

    axum::serve(listener, router())
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    tracing::info!("Health server stopped");
    Ok(())
}
