//! Fixed-window rate limiter.
//!
//! A [`RateLimiter`] pairs one [`RateLimitPolicy`] with a [`WindowStore`]
//! handle and decides, per request, whether it may proceed.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::key_generator::UNKNOWN_CLIENT;
use crate::rate_limit_config::RateLimitPolicy;
use crate::response::{retry_after_secs, Denial};
use crate::store::WindowStore;

/// Outcome of a limiter check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(Denial),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

#[derive(Clone, Debug)]
pub struct RateLimiter {
    policy: Arc<RateLimitPolicy>,
    store: WindowStore,
}

impl RateLimiter {
    /// Limiter with its own private store.
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self::with_store(policy, WindowStore::new())
    }

    /// Limiter charging hits to a store shared with other limiters.
    pub fn with_store(policy: RateLimitPolicy, store: WindowStore) -> Self {
        Self {
            policy: Arc::new(policy),
            store,
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    pub fn store(&self) -> &WindowStore {
        &self.store
    }

    /// Derive the key for `request`. A key function that fails charges the
    /// request to [`UNKNOWN_CLIENT`] rather than letting it through unlimited.
    pub fn key_for(&self, request: &Request) -> String {
        match self.policy.key_fn().extract(request) {
            Ok(key) => key,
            Err(err) => {
                debug!(
                    target: "api_gate::rate_limiter",
                    identifier = %self.policy.identifier(),
                    error = %err,
                    "Key derivation failed, using fallback key"
                );
                UNKNOWN_CLIENT.to_string()
            }
        }
    }

    /// Count `request` against its window and decide whether it may proceed.
    pub fn check(&self, request: &Request) -> Decision {
        if self.policy.should_skip(request) {
            return Decision::Allow;
        }

        let key = self.key_for(request);
        let record = self.store.hit(&key, self.policy.window());

        if record.count <= self.policy.max_hits() {
            return Decision::Allow;
        }

        let now = self.store.now_millis();
        let retry_after = retry_after_secs(record.reset_at, now);

        warn!(
            target: "api_gate::rate_limiter",
            identifier = %self.policy.identifier(),
            key = %key,
            path = %request.uri().path(),
            count = record.count,
            max = self.policy.max_hits(),
            reset_in_seconds = retry_after,
            "Rate limit exceeded"
        );

        Decision::Deny(Denial {
            status: self.policy.status(),
            message: self.policy.message().to_string(),
            limit: self.policy.max_hits(),
            reset_at: record.reset_at,
            retry_after_secs: retry_after,
        })
    }
}

/// Middleware applying a single limiter to whatever it wraps:
///
/// ```ignore
/// Router::new()
///     .route("/api/search", get(search))
///     .route_layer(axum::middleware::from_fn_with_state(limiter, rate_limit));
/// ```
pub async fn rate_limit(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    match limiter.check(&request) {
        Decision::Allow => next.run(request).await,
        Decision::Deny(denial) => denial.into_response(),
    }
}
