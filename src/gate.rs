//! Request gate.
//!
//! Sits in front of every route: picks one limiter from the request path (the
//! tiered dispatcher for the rate limit administration routes), turns a denial
//! into the response on the spot, and otherwise hands the request to request
//! logging and then the handler.

use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::middleware::logging_middleware;
use crate::rate_limiter::{Decision, RateLimiter};
use crate::store::WindowStore;
use crate::tiered::{caller_role, TieredRateLimiter};

pub const X_API_VERSION: HeaderName = HeaderName::from_static("x-api-version");

const API_PREFIX: &str = "/api";
const AUTH_PREFIX: &str = "/api/auth";
const RATE_LIMIT_PREFIX: &str = "/api/rate-limit";

/// Which limiter a path falls under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathPolicy {
    /// Authentication endpoints
    Strict,
    /// Rate limit administration, limited per caller tier
    Tiered,
    /// Everything else under `/api`
    Api,
    Unlimited,
}

impl PathPolicy {
    pub fn for_path(path: &str) -> Self {
        if is_under(path, AUTH_PREFIX) {
            PathPolicy::Strict
        } else if is_under(path, RATE_LIMIT_PREFIX) {
            PathPolicy::Tiered
        } else if is_under(path, API_PREFIX) {
            PathPolicy::Api
        } else {
            PathPolicy::Unlimited
        }
    }
}

/// `/api/auth` and `/api/auth/login` are under `/api/auth`, `/api/authors` is not.
fn is_under(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

#[derive(Clone, Debug)]
pub struct RequestGate {
    strict: RateLimiter,
    api: RateLimiter,
    tiered: TieredRateLimiter,
    api_version: HeaderValue,
}

impl RequestGate {
    pub fn new(
        strict: RateLimiter,
        api: RateLimiter,
        tiered: TieredRateLimiter,
        api_version: &str,
    ) -> Result<Self> {
        let api_version = HeaderValue::from_str(api_version)
            .map_err(|_| Error::Config(format!("invalid API version '{}'", api_version)))?;
        Ok(Self {
            strict,
            api,
            tiered,
            api_version,
        })
    }

    /// Limiters from `config`. Strict and API both key on the bare client
    /// address, so each gets its own store; the tiers share a third one.
    pub fn from_config(config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let strict = RateLimiter::with_store(
            config.strict_policy().build()?,
            WindowStore::with_clock(clock.clone()),
        );
        let api = RateLimiter::with_store(
            config.api_policy().build()?,
            WindowStore::with_clock(clock.clone()),
        );
        let tiered = TieredRateLimiter::new(&config.tiered(), WindowStore::with_clock(clock))?;
        Self::new(strict, api, tiered, &config.api_version)
    }

    pub fn limiters(&self) -> [&RateLimiter; 2] {
        [&self.strict, &self.api]
    }

    pub fn tiered(&self) -> &TieredRateLimiter {
        &self.tiered
    }

    /// Charge `request` to exactly one limiter, chosen by path.
    pub fn check(&self, request: &Request) -> Decision {
        match PathPolicy::for_path(request.uri().path()) {
            PathPolicy::Strict => self.strict.check(request),
            PathPolicy::Tiered => self.tiered.dispatch(request, caller_role(request)),
            PathPolicy::Api => self.api.check(request),
            PathPolicy::Unlimited => Decision::Allow,
        }
    }

    pub fn api_version(&self) -> &HeaderValue {
        &self.api_version
    }
}

/// Gate middleware. A denied request is answered here and never reaches
/// request logging or the handler.
pub async fn request_gate(
    State(gate): State<Arc<RequestGate>>,
    request: Request,
    next: Next,
) -> Response {
    if let Decision::Deny(denial) = gate.check(&request) {
        return denial.into_response();
    }

    let mut response = logging_middleware(request, next).await;
    response
        .headers_mut()
        .insert(X_API_VERSION, gate.api_version().clone());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::tiered::{CallerRole, Tier};
    use axum::body::Body;

    #[test]
    fn test_path_policy() {
        assert_eq!(PathPolicy::for_path("/api/auth/login"), PathPolicy::Strict);
        assert_eq!(PathPolicy::for_path("/api/auth/register"), PathPolicy::Strict);
        assert_eq!(PathPolicy::for_path("/api/auth"), PathPolicy::Strict);
        assert_eq!(PathPolicy::for_path("/api/users"), PathPolicy::Api);
        assert_eq!(PathPolicy::for_path("/api/authors"), PathPolicy::Api);
        assert_eq!(
            PathPolicy::for_path("/api/rate-limit/policies"),
            PathPolicy::Tiered
        );
        assert_eq!(
            PathPolicy::for_path("/api/rate-limit/api/10.0.0.1"),
            PathPolicy::Tiered
        );
        assert_eq!(PathPolicy::for_path("/api/rate-limits"), PathPolicy::Api);
        assert_eq!(PathPolicy::for_path("/api"), PathPolicy::Api);
        assert_eq!(PathPolicy::for_path("/apis"), PathPolicy::Unlimited);
        assert_eq!(PathPolicy::for_path("/"), PathPolicy::Unlimited);
        assert_eq!(PathPolicy::for_path("/health"), PathPolicy::Unlimited);
    }

    fn get(uri: &str) -> Request {
        Request::builder()
            .uri(uri)
            .header("x-forwarded-for", "10.0.0.1")
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_gate_charges_the_selected_limiter() {
        let gate = RequestGate::from_config(&Config::default(), Arc::new(SystemClock)).unwrap();
        let [strict, api] = gate.limiters();
        let tier_store = gate.tiered().limiter(Tier::Anonymous).store();

        assert!(gate.check(&get("/api/auth/login")).is_allowed());
        assert!(gate.check(&get("/")).is_allowed());
        assert_eq!(strict.store().get("10.0.0.1").count, 1);
        assert!(api.store().is_empty());
        assert!(tier_store.is_empty());

        assert!(gate.check(&get("/api/users")).is_allowed());
        assert_eq!(api.store().get("10.0.0.1").count, 1);
    }

    #[test]
    fn test_admin_routes_charge_only_the_caller_tier() {
        let config = Config {
            rate_limit_api_max: 2,
            rate_limit_admin_max: 5,
            ..Config::default()
        };
        let gate = RequestGate::from_config(&config, Arc::new(SystemClock)).unwrap();

        for _ in 0..5 {
            let mut request = get("/api/rate-limit/policies");
            request
                .extensions_mut()
                .insert(CallerRole("admin".to_string()));
            assert!(gate.check(&request).is_allowed());
        }

        let [strict, api] = gate.limiters();
        let tier_store = gate.tiered().limiter(Tier::Admin).store();
        assert!(strict.store().is_empty());
        assert!(api.store().is_empty());
        assert_eq!(tier_store.get("admin_10.0.0.1").count, 5);
    }

    #[test]
    fn test_invalid_api_version() {
        let config = Config {
            api_version: "1.0\n".to_string(),
            ..Config::default()
        };
        assert!(RequestGate::from_config(&config, Arc::new(SystemClock)).is_err());
    }
}
