use envconfig::Envconfig;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::rate_limit_config::{PolicySettings, RateLimitPolicy, RateLimitPolicyBuilder};
use crate::tiered::TieredConfig;

#[derive(Debug, Envconfig, Clone)]
pub struct Config {
    /// Server bind address
    #[envconfig(from = "BIND_ADDR", default = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Log level for this crate when RUST_LOG is unset
    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,

    /// Deployment environment reported by the health endpoint
    #[envconfig(from = "APP_ENV", default = "development")]
    pub environment: String,

    /// Value of the x-api-version response header
    #[envconfig(from = "API_VERSION", default = "1.0.0")]
    pub api_version: String,

    /// Window length for the standard limiter in milliseconds
    #[envconfig(from = "RATE_LIMIT_WINDOW_MS", default = "60000")]
    pub rate_limit_window_ms: u64,

    /// Hits per window for the standard limiter
    #[envconfig(from = "RATE_LIMIT_MAX_REQUESTS", default = "60")]
    pub rate_limit_max_requests: u64,

    /// Hits per minute on authentication endpoints
    #[envconfig(from = "RATE_LIMIT_STRICT_MAX", default = "10")]
    pub rate_limit_strict_max: u64,

    /// Hits per minute on other API endpoints
    #[envconfig(from = "RATE_LIMIT_API_MAX", default = "120")]
    pub rate_limit_api_max: u64,

    #[envconfig(from = "RATE_LIMIT_ANONYMOUS_MAX", default = "30")]
    pub rate_limit_anonymous_max: u64,

    #[envconfig(from = "RATE_LIMIT_AUTHENTICATED_MAX", default = "100")]
    pub rate_limit_authenticated_max: u64,

    #[envconfig(from = "RATE_LIMIT_ADMIN_MAX", default = "300")]
    pub rate_limit_admin_max: u64,

    /// Interval between expired-window sweeps in seconds
    #[envconfig(from = "CLEANUP_INTERVAL", default = "600")]
    pub cleanup_interval_secs: u64,
}

const MINUTE: Duration = Duration::from_secs(60);

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            log_level: "info".to_string(),
            environment: "development".to_string(),
            api_version: "1.0.0".to_string(),
            rate_limit_window_ms: 60_000,
            rate_limit_max_requests: 60,
            rate_limit_strict_max: 10,
            rate_limit_api_max: 120,
            rate_limit_anonymous_max: 30,
            rate_limit_authenticated_max: 100,
            rate_limit_admin_max: 300,
            cleanup_interval_secs: 600,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Config::init_from_env().map_err(|e| Error::Config(e.to_string()))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    /// General-purpose limiter, `RATE_LIMIT_WINDOW_MS` / `RATE_LIMIT_MAX_REQUESTS`.
    ///
    /// The gate does not use it. It is for routes wrapped individually with
    /// [`rate_limit`](crate::rate_limiter::rate_limit).
    pub fn standard_policy(&self) -> RateLimitPolicyBuilder {
        RateLimitPolicy::builder()
            .window_ms(self.rate_limit_window_ms)
            .max_hits(self.rate_limit_max_requests)
            .identifier("standard")
    }

    /// Limiter for authentication endpoints.
    pub fn strict_policy(&self) -> RateLimitPolicyBuilder {
        RateLimitPolicy::builder()
            .window(MINUTE)
            .max_hits(self.rate_limit_strict_max)
            .message("Too many authentication attempts, please try again later.")
            .identifier("strict")
    }

    /// Limiter for the rest of the API.
    pub fn api_policy(&self) -> RateLimitPolicyBuilder {
        RateLimitPolicy::builder()
            .window(MINUTE)
            .max_hits(self.rate_limit_api_max)
            .identifier("api")
    }

    pub fn tiered(&self) -> TieredConfig {
        TieredConfig {
            anonymous: PolicySettings::per_minute(self.rate_limit_anonymous_max),
            authenticated: PolicySettings::per_minute(self.rate_limit_authenticated_max),
            admin: PolicySettings::per_minute(self.rate_limit_admin_max),
        }
    }
}

/// Ready-made policies for routes wrapped individually with
/// [`rate_limit`](crate::rate_limiter::rate_limit). The gate never uses them.
pub mod presets {
    use super::MINUTE;
    use crate::rate_limit_config::{RateLimitPolicy, RateLimitPolicyBuilder};

    pub fn strict_api() -> RateLimitPolicyBuilder {
        RateLimitPolicy::builder()
            .window(MINUTE)
            .max_hits(10)
            .message("Too many requests to this endpoint. Please try again later.")
            .identifier("strict-api")
    }

    pub fn standard_api() -> RateLimitPolicyBuilder {
        RateLimitPolicy::builder()
            .window(MINUTE)
            .max_hits(60)
            .identifier("standard-api")
    }

    pub fn generous_api() -> RateLimitPolicyBuilder {
        RateLimitPolicy::builder()
            .window(MINUTE)
            .max_hits(200)
            .identifier("generous-api")
    }
}
