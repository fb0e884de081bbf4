use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::gate::RequestGate;
use crate::health::HealthChecker;
use crate::rate_limit_config::PolicySummary;
use crate::rate_limiter::RateLimiter;
use crate::response::{ApiInfoResponse, HelloResponse, WindowResponse};
use crate::store::WindowStore;
use crate::tiered::Tier;
use crate::validation::WindowPath;

/// Shared application state
pub type SharedState = Arc<AppState>;

/// Every limiter the service runs, plus what the handlers report on.
pub struct AppState {
    pub config: Config,
    pub gate: Arc<RequestGate>,
    pub health: HealthChecker,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let gate = RequestGate::from_config(&config, clock)?;
        let health = HealthChecker::new(config.environment.clone(), distinct_stores(&gate));

        Ok(Self {
            gate: Arc::new(gate),
            health,
            config,
        })
    }

    /// Every limiter, gate first then tiers.
    pub fn limiters(&self) -> Vec<&RateLimiter> {
        let mut limiters: Vec<&RateLimiter> = self.gate.limiters().to_vec();
        limiters.extend(
            [Tier::Anonymous, Tier::Authenticated, Tier::Admin]
                .into_iter()
                .map(|tier| self.gate.tiered().limiter(tier)),
        );
        limiters
    }

    pub fn limiter(&self, identifier: &str) -> Option<&RateLimiter> {
        self.limiters()
            .into_iter()
            .find(|limiter| limiter.policy().identifier() == identifier)
    }

    /// Distinct stores backing the limiters.
    pub fn stores(&self) -> Vec<WindowStore> {
        distinct_stores(&self.gate)
    }
}

/// The strict and API stores plus the one store all tiers share.
fn distinct_stores(gate: &RequestGate) -> Vec<WindowStore> {
    let [strict, api] = gate.limiters();
    vec![
        strict.store().clone(),
        api.store().clone(),
        gate.tiered().limiter(Tier::Anonymous).store().clone(),
    ]
}

#[derive(Debug, Serialize)]
pub struct PoliciesResponse {
    pub policies: Vec<PolicySummary>,
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub identifier: String,
    pub key: String,
    pub existed: bool,
    pub success: bool,
}

/// API information page
pub async fn api_info(State(state): State<SharedState>) -> impl IntoResponse {
    Json(ApiInfoResponse::new(&state.config.api_version))
}

pub async fn hello() -> impl IntoResponse {
    Json(HelloResponse::new())
}

/// Health check endpoint
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.health.check_health())
}

/// List every configured limiter policy
pub async fn list_policies(State(state): State<SharedState>) -> impl IntoResponse {
    let policies = state
        .limiters()
        .into_iter()
        .map(|limiter| limiter.policy().summary())
        .collect();

    Json(PoliciesResponse {
        policies,
        success: true,
    })
}

/// Current window for a key in one limiter's store
pub async fn get_window(
    State(state): State<SharedState>,
    Path(path): Path<WindowPath>,
) -> Result<impl IntoResponse> {
    let path = path.validated()?;
    let limiter = find_limiter(&state, &path.identifier)?;
    let record = limiter.store().get(&path.key);

    Ok(Json(WindowResponse::new(path.key, record)))
}

/// Forget a key's window so its next request starts fresh
pub async fn reset_window(
    State(state): State<SharedState>,
    Path(path): Path<WindowPath>,
) -> Result<impl IntoResponse> {
    let path = path.validated()?;
    let limiter = find_limiter(&state, &path.identifier)?;
    let existed = limiter.store().reset(&path.key);

    tracing::info!(
        target: "api_gate::handlers",
        identifier = %path.identifier,
        key = %path.key,
        existed = existed,
        "Rate limit window reset"
    );

    Ok(Json(ResetResponse {
        identifier: path.identifier,
        key: path.key,
        existed,
        success: true,
    }))
}

pub async fn not_found() -> Error {
    Error::NotFound("Route".to_string())
}

fn find_limiter<'a>(state: &'a AppState, identifier: &str) -> Result<&'a RateLimiter> {
    state
        .limiter(identifier)
        .ok_or_else(|| Error::NotFound(format!("Rate limiter '{}'", identifier)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_lookup_by_identifier() {
        let state = AppState::new(Config::default()).unwrap();
        let identifiers: Vec<&str> = state
            .limiters()
            .into_iter()
            .map(|limiter| limiter.policy().identifier())
            .collect();
        assert_eq!(
            identifiers,
            ["strict", "api", "anonymous", "authenticated", "admin"]
        );
        assert!(state.limiter("api").is_some());
        assert!(state.limiter("missing").is_none());
    }

    #[test]
    fn test_tiers_share_one_store() {
        let state = AppState::new(Config::default()).unwrap();
        state
            .gate
            .tiered()
            .limiter(Tier::Admin)
            .store()
            .increment("admin_10.0.0.1", std::time::Duration::from_secs(60));
        assert_eq!(
            state
                .gate
                .tiered()
                .limiter(Tier::Anonymous)
                .store()
                .get("admin_10.0.0.1")
                .count,
            1
        );
        assert_eq!(state.stores().len(), 3);
    }
}
