use axum::{
    extract::{ConnectInfo, Request},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::clock::duration_millis;
use crate::key_generator::{client_ip, UNKNOWN_CLIENT};

/// Logging middleware for request/response tracking
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    let started = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client_ip = get_client_ip(&request);
    let user_agent = request
        .headers()
        .get(axum::http::header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-")
        .to_string();

    info!(
        target: "api_gate::middleware",
        request_id = %request_id,
        method = %method,
        uri = %uri,
        client_ip = %client_ip,
        user_agent = %user_agent,
        "Incoming request"
    );

    let response = next.run(request).await;

    info!(
        target: "api_gate::middleware",
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %response.status(),
        elapsed_ms = duration_millis(started.elapsed()),
        "Request completed"
    );

    response
}

fn get_client_ip(request: &Request) -> String {
    if let Some(ip) = client_ip(request.headers()) {
        return ip;
    }

    // Fallback to connection info
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        addr.ip().to_string()
    } else {
        UNKNOWN_CLIENT.to_string()
    }
}
