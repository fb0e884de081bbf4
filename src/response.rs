use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::store::WindowRecord;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Response sent in place of the handler when a limiter denies a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub status: StatusCode,
    pub message: String,
    pub limit: u64,
    /// Epoch milliseconds at which the window expires
    pub reset_at: u64,
    pub retry_after_secs: u64,
}

#[derive(Debug, Serialize)]
struct DenialBody<'a> {
    error: &'a str,
}

impl Denial {
    /// Window reset in epoch seconds, rounded up.
    pub fn reset_epoch_secs(&self) -> u64 {
        self.reset_at.div_ceil(1000)
    }

    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from_static("0"));
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(self.reset_epoch_secs()));
        headers.insert(
            axum::http::header::RETRY_AFTER,
            HeaderValue::from(self.retry_after_secs),
        );
        headers
    }
}

impl IntoResponse for Denial {
    fn into_response(self) -> Response {
        let headers = self.headers();
        let body = Json(DenialBody {
            error: &self.message,
        });
        (self.status, headers, body).into_response()
    }
}

/// Whole seconds until `reset_at`, rounded up and never negative.
pub fn retry_after_secs(reset_at: u64, now: u64) -> u64 {
    reset_at.saturating_sub(now).div_ceil(1000)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub uptime: String,
    pub environment: String,
    pub version: String,
    pub tracked_keys: usize,
}

impl HealthResponse {
    pub fn up(uptime_secs: u64, environment: &str, tracked_keys: usize) -> Self {
        Self {
            status: "UP".to_string(),
            timestamp: epoch_secs(),
            uptime: format!("{}m {}s", uptime_secs / 60, uptime_secs % 60),
            environment: environment.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            tracked_keys,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiInfoResponse {
    pub name: String,
    pub version: String,
    pub description: String,
    pub endpoints: BTreeMap<&'static str, &'static str>,
    pub timestamp: u64,
}

impl ApiInfoResponse {
    pub fn new(api_version: &str) -> Self {
        let endpoints = BTreeMap::from([
            ("/api", "This information page"),
            ("/api/health", "Health and status information"),
            ("/api/hello", "A simple test endpoint"),
            ("/api/rate-limit/policies", "Configured rate limit policies"),
            (
                "/api/rate-limit/:identifier/:key",
                "Rate limit window for a key - GET (read), DELETE (reset)",
            ),
        ]);

        Self {
            name: "api-gate".to_string(),
            version: api_version.to_string(),
            description: "A RESTful API service with tiered rate limiting".to_string(),
            endpoints,
            timestamp: epoch_secs(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HelloResponse {
    pub message: String,
    pub status: String,
    pub timestamp: u64,
}

impl HelloResponse {
    pub fn new() -> Self {
        Self {
            message: "Hello World!".to_string(),
            status: "success".to_string(),
            timestamp: epoch_secs(),
        }
    }
}

impl Default for HelloResponse {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct WindowResponse {
    pub key: String,
    pub count: u64,
    pub reset_at: u64,
    pub success: bool,
}

impl WindowResponse {
    pub fn new(key: String, record: WindowRecord) -> Self {
        Self {
            key,
            count: record.count,
            reset_at: record.reset_at,
            success: true,
        }
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    fn denial() -> Denial {
        Denial {
            status: StatusCode::TOO_MANY_REQUESTS,
            message: "Too many requests, please try again later.".to_string(),
            limit: 2,
            reset_at: 1_700_000_000_500,
            retry_after_secs: 1,
        }
    }

    #[test]
    fn test_retry_after_rounds_up_and_floors_at_zero() {
        assert_eq!(retry_after_secs(10_000, 9_000), 1);
        assert_eq!(retry_after_secs(10_000, 8_999), 2);
        assert_eq!(retry_after_secs(10_000, 9_999), 1);
        assert_eq!(retry_after_secs(10_000, 10_000), 0);
        assert_eq!(retry_after_secs(10_000, 12_000), 0);
    }

    #[test]
    fn test_denial_headers() {
        let headers = denial().headers();
        assert_eq!(headers["x-ratelimit-limit"], "2");
        assert_eq!(headers["x-ratelimit-remaining"], "0");
        assert_eq!(headers["x-ratelimit-reset"], "1700000001");
        assert_eq!(headers["retry-after"], "1");
    }

    #[tokio::test]
    async fn test_denial_response_body() {
        let response = denial().into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(
            &bytes[..],
            br#"{"error":"Too many requests, please try again later."}"#
        );
    }

    #[test]
    fn test_health_uptime_format() {
        let health = HealthResponse::up(125, "test", 3);
        assert_eq!(health.uptime, "2m 5s");
        assert_eq!(health.status, "UP");
        assert_eq!(health.tracked_keys, 3);
    }
}
