//! HTTP API module
//!
//! Exposes the pipeline over HTTP:
//! - `POST /api/accessibility/analyze` submits a site and waits for its report
//! - `GET /api/accessibility/requests/{id}` polls a request
//! - `GET /api/health` reports whether the queue answers

mod handlers;
mod models;

pub use handlers::{status_for, ApiError, ApiState};
pub use models::{AnalyzeRequest, ApiResponse, HealthResponse};

use crate::pipeline::PipelineHandle;
use crate::{ConfigError, Result};
use axum::routing::{get, post};
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Builds the API router over a running pipeline
pub fn router(pipeline: PipelineHandle) -> Router {
    Router::new()
        .route("/api/accessibility/analyze", post(handlers::analyze))
        .route(
            "/api/accessibility/requests/{id}",
            get(handlers::request_status),
        )
        .route("/api/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(ApiState { pipeline })
}

/// Serves the API until `shutdown` resolves
///
/// # Arguments
///
/// * `listen` - Socket address to bind, e.g. `127.0.0.1:5000`
/// * `pipeline` - Handle to the running pipeline
/// * `shutdown` - Resolves when the server should stop accepting requests
pub async fn serve<F>(listen: &str, pipeline: PipelineHandle, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = listen
        .parse()
        .map_err(|_| ConfigError::InvalidAddress(listen.to_string()))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(pipeline))
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
