//! Request logging middleware.
//!
//! One structured line per request: method, path, status, latency, caller.

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::Request,
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{info, warn};

/// Logs every HTTP request with timing. 5xx responses log at WARN so
/// settlement failures stand out; health checks are skipped to cut noise.
pub async fn request_logging(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    if path == "/health" {
        return next.run(request).await;
    }

    let start = Instant::now();
    let response = next.run(request).await;
    let latency_ms = start.elapsed().as_millis() as u64;
    let status = response.status().as_u16();

    if status >= 500 {
        warn!(
            method = %method,
            path = %path,
            status,
            latency_ms,
            client_ip = %addr.ip(),
            "Request failed"
        );
    } else {
        info!(
            method = %method,
            path = %path,
            status,
            latency_ms,
            client_ip = %addr.ip(),
            "Request completed"
        );
    }

    response
}
