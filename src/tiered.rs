//! Role-tiered rate limiting.
//!
//! Anonymous, authenticated and admin callers are charged against separate
//! limiters. Each tier prefixes its keys (`anon_`, `auth_`, `admin_`), so all
//! three can share one store without their counts colliding.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use validator::Validate;

use crate::error::Result;
use crate::key_generator::{KeyExtractor, PrefixedClientIpKey};
use crate::rate_limit_config::{PolicySettings, RateLimitPolicy, RateLimitPolicyBuilder};
use crate::rate_limiter::{Decision, RateLimiter};
use crate::store::WindowStore;

pub const ADMIN_ROLE: &str = "admin";

/// Role of the authenticated caller, placed in the request extensions by the
/// authentication layer. Requests without it are anonymous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerRole(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Anonymous,
    Authenticated,
    Admin,
}

impl Tier {
    /// `"admin"` is the admin tier, any other non-empty role is
    /// authenticated, and no role at all is anonymous.
    pub fn for_role(role: Option<&str>) -> Self {
        match role {
            Some(ADMIN_ROLE) => Tier::Admin,
            Some(role) if !role.is_empty() => Tier::Authenticated,
            _ => Tier::Anonymous,
        }
    }

    pub fn key_prefix(&self) -> &'static str {
        match self {
            Tier::Anonymous => "anon",
            Tier::Authenticated => "auth",
            Tier::Admin => "admin",
        }
    }

    pub fn identifier(&self) -> &'static str {
        match self {
            Tier::Anonymous => "anonymous",
            Tier::Authenticated => "authenticated",
            Tier::Admin => "admin",
        }
    }
}

/// Window and ceiling for each tier.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TieredConfig {
    #[validate(nested)]
    pub anonymous: PolicySettings,
    #[validate(nested)]
    pub authenticated: PolicySettings,
    #[validate(nested)]
    pub admin: PolicySettings,
}

impl Default for TieredConfig {
    fn default() -> Self {
        Self {
            anonymous: PolicySettings::per_minute(30),
            authenticated: PolicySettings::per_minute(100),
            admin: PolicySettings::per_minute(300),
        }
    }
}

impl TieredConfig {
    pub fn new(window: Duration, anonymous: u64, authenticated: u64, admin: u64) -> Self {
        Self {
            anonymous: PolicySettings::new(window, anonymous),
            authenticated: PolicySettings::new(window, authenticated),
            admin: PolicySettings::new(window, admin),
        }
    }

    fn settings(&self, tier: Tier) -> &PolicySettings {
        match tier {
            Tier::Anonymous => &self.anonymous,
            Tier::Authenticated => &self.authenticated,
            Tier::Admin => &self.admin,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TieredRateLimiter {
    anonymous: RateLimiter,
    authenticated: RateLimiter,
    admin: RateLimiter,
}

impl TieredRateLimiter {
    /// Build the three tiers over one shared store, keyed on the tier-prefixed
    /// client address.
    pub fn new(config: &TieredConfig, store: WindowStore) -> Result<Self> {
        Self::build(config, store, |_, builder| builder)
    }

    /// Like [`new`](Self::new), but every tier derives keys with `key_fn`
    /// instead of the tier-prefixed client address.
    pub fn with_key_fn(
        config: &TieredConfig,
        store: WindowStore,
        key_fn: Arc<dyn KeyExtractor>,
    ) -> Result<Self> {
        Self::build(config, store, move |_, builder| {
            builder.shared_key_fn(key_fn.clone())
        })
    }

    fn build(
        config: &TieredConfig,
        store: WindowStore,
        customize: impl Fn(Tier, RateLimitPolicyBuilder) -> RateLimitPolicyBuilder,
    ) -> Result<Self> {
        config.validate()?;

        let limiter = |tier: Tier| -> Result<RateLimiter> {
            let builder = RateLimitPolicy::builder()
                .settings(config.settings(tier))
                .identifier(tier.identifier())
                .key_fn(PrefixedClientIpKey::new(tier.key_prefix()));
            let policy = customize(tier, builder).build()?;
            Ok(RateLimiter::with_store(policy, store.clone()))
        };

        Ok(Self {
            anonymous: limiter(Tier::Anonymous)?,
            authenticated: limiter(Tier::Authenticated)?,
            admin: limiter(Tier::Admin)?,
        })
    }

    pub fn limiter(&self, tier: Tier) -> &RateLimiter {
        match tier {
            Tier::Anonymous => &self.anonymous,
            Tier::Authenticated => &self.authenticated,
            Tier::Admin => &self.admin,
        }
    }

    pub fn policies(&self) -> [&RateLimitPolicy; 3] {
        [
            self.anonymous.policy(),
            self.authenticated.policy(),
            self.admin.policy(),
        ]
    }

    /// Check `request` against exactly one tier's limiter.
    pub fn dispatch(&self, request: &Request, role: Option<&str>) -> Decision {
        self.limiter(Tier::for_role(role)).check(request)
    }
}

/// Role stored on `request` by the authentication layer, if any.
pub fn caller_role(request: &Request) -> Option<&str> {
    request
        .extensions()
        .get::<CallerRole>()
        .map(|role| role.0.as_str())
}

/// Middleware applying the tier matching the request's [`CallerRole`].
pub async fn tiered_rate_limit(
    State(limiter): State<TieredRateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    match limiter.dispatch(&request, caller_role(&request)) {
        Decision::Allow => next.run(request).await,
        Decision::Deny(denial) => denial.into_response(),
    }
}
