//! Liveness endpoint.
//!
//! `GET /health` answers `{"status":"ok","timestamp":...}` for as long as the
//! process runs. It knows nothing about the watcher.

use std::net::SocketAddr;

use axum::Router;
use tokio_util::sync::CancellationToken;

async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn log_request(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let started = std::time::Instant::now();

    let response = next.run(req).await;

    tracing::debug!(
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "[http] {method} {uri}"
    );
    response
}

pub fn router() -> Router {
    Router::new()
        .route("/health", axum::routing::get(health_check))
        .layer(axum::middleware::from_fn(log_request))
}

/// Serve the health endpoint on all interfaces until `ct` is cancelled.
pub async fn serve(port: u16, ct: CancellationToken) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    crate::log_event!("http", "listening", "health check on http://{addr}/health");

    axum::serve(listener, router())
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await?;

    crate::debug_event!("http", "stopped");
    Ok(())
}
