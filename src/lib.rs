pub mod clock;
pub mod config;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod health;
pub mod key_generator;
pub mod middleware;
pub mod rate_limit_config;
pub mod rate_limiter;
pub mod response;
pub mod server;
pub mod store;
pub mod tiered;
pub mod validation;

pub use config::Config;
pub use error::{Error, Result};
pub use gate::RequestGate;
pub use rate_limit_config::{PolicySettings, RateLimitPolicy};
pub use rate_limiter::{Decision, RateLimiter};
pub use server::{create_app, Server};
pub use store::{WindowRecord, WindowStore};
pub use tiered::{CallerRole, TieredRateLimiter};
