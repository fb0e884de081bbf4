use axum::extract::Request;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use validator::{Validate, ValidationError};

use crate::error::{Error, Result};
use crate::key_generator::{ClientIpKey, KeyExtractor};

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_HITS: u64 = 60;
pub const DEFAULT_MESSAGE: &str = "Too many requests, please try again later.";
pub const DEFAULT_IDENTIFIER: &str = "standard";

/// Predicate deciding whether a request bypasses limiting.
pub type SkipFn = Arc<dyn Fn(&Request) -> bool + Send + Sync>;

/// Everything a limiter needs to decide on a request. Immutable once built.
#[derive(Clone)]
pub struct RateLimitPolicy {
    window: Duration,
    max_hits: u64,
    key_fn: Arc<dyn KeyExtractor>,
    skip_fn: Option<SkipFn>,
    message: String,
    status: StatusCode,
    identifier: String,
}

impl fmt::Debug for RateLimitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitPolicy")
            .field("identifier", &self.identifier)
            .field("window", &self.window)
            .field("max_hits", &self.max_hits)
            .field("status", &self.status)
            .field("message", &self.message)
            .field("skips", &self.skip_fn.is_some())
            .finish()
    }
}

impl RateLimitPolicy {
    pub fn builder() -> RateLimitPolicyBuilder {
        RateLimitPolicyBuilder::default()
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_hits(&self) -> u64 {
        self.max_hits
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn key_fn(&self) -> &dyn KeyExtractor {
        self.key_fn.as_ref()
    }

    pub fn should_skip(&self, request: &Request) -> bool {
        self.skip_fn.as_ref().is_some_and(|skip| skip(request))
    }

    /// Serializable view of the policy for the admin API.
    pub fn summary(&self) -> PolicySummary {
        PolicySummary {
            identifier: self.identifier.clone(),
            window: self.window,
            max: self.max_hits,
            message: self.message.clone(),
            status: self.status.as_u16(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PolicySummary {
    pub identifier: String,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    pub max: u64,
    pub message: String,
    pub status: u16,
}

/// Builder for [`RateLimitPolicy`]. Unset fields take the standard defaults:
/// 60 hits per minute keyed on client address, denied with 429.
pub struct RateLimitPolicyBuilder {
    window: Duration,
    max_hits: u64,
    key_fn: Arc<dyn KeyExtractor>,
    skip_fn: Option<SkipFn>,
    message: String,
    status: StatusCode,
    identifier: String,
}

impl Default for RateLimitPolicyBuilder {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            max_hits: DEFAULT_MAX_HITS,
            key_fn: Arc::new(ClientIpKey),
            skip_fn: None,
            message: DEFAULT_MESSAGE.to_string(),
            status: StatusCode::TOO_MANY_REQUESTS,
            identifier: DEFAULT_IDENTIFIER.to_string(),
        }
    }
}

impl RateLimitPolicyBuilder {
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn window_ms(self, window_ms: u64) -> Self {
        self.window(Duration::from_millis(window_ms))
    }

    pub fn max_hits(mut self, max_hits: u64) -> Self {
        self.max_hits = max_hits;
        self
    }

    pub fn key_fn(mut self, key_fn: impl KeyExtractor + 'static) -> Self {
        self.key_fn = Arc::new(key_fn);
        self
    }

    pub fn shared_key_fn(mut self, key_fn: Arc<dyn KeyExtractor>) -> Self {
        self.key_fn = key_fn;
        self
    }

    pub fn skip(mut self, skip: impl Fn(&Request) -> bool + Send + Sync + 'static) -> Self {
        self.skip_fn = Some(Arc::new(skip));
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    /// Apply declarative settings on top of this builder.
    pub fn settings(mut self, settings: &PolicySettings) -> Self {
        self.window = settings.window;
        self.max_hits = settings.max;
        if let Some(message) = &settings.message {
            self.message = message.clone();
        }
        if let Some(identifier) = &settings.identifier {
            self.identifier = identifier.clone();
        }
        self
    }

    /// Reject policies that can never be enforced. `max_hits = 0` is allowed
    /// and denies every request.
    pub fn build(self) -> Result<RateLimitPolicy> {
        if self.window.as_millis() == 0 {
            return Err(Error::InvalidPolicy(format!(
                "window must be at least 1ms (limiter '{}')",
                self.identifier
            )));
        }
        if !(self.status.is_client_error() || self.status.is_server_error()) {
            return Err(Error::InvalidPolicy(format!(
                "denial status {} is not an error status (limiter '{}')",
                self.status, self.identifier
            )));
        }
        if self.identifier.trim().is_empty() {
            return Err(Error::InvalidPolicy(
                "identifier cannot be empty".to_string(),
            ));
        }

        Ok(RateLimitPolicy {
            window: self.window,
            max_hits: self.max_hits,
            key_fn: self.key_fn,
            skip_fn: self.skip_fn,
            message: self.message,
            status: self.status,
            identifier: self.identifier,
        })
    }
}

/// Declarative limiter settings, e.g. from a config file:
///
/// ```json
/// { "window": "1m", "max": 30, "identifier": "anonymous" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PolicySettings {
    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "validate_window"))]
    pub window: Duration,

    #[validate(range(max = 1_000_000_000))]
    pub max: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 512))]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 64))]
    pub identifier: Option<String>,
}

impl PolicySettings {
    pub fn new(window: Duration, max: u64) -> Self {
        Self {
            window,
            max,
            message: None,
            identifier: None,
        }
    }

    pub fn per_minute(max: u64) -> Self {
        Self::new(DEFAULT_WINDOW, max)
    }

    /// Validate and turn into a builder with the standard defaults for
    /// everything the settings leave out.
    pub fn into_builder(self) -> Result<RateLimitPolicyBuilder> {
        self.validate()?;
        Ok(RateLimitPolicy::builder().settings(&self))
    }
}

fn validate_window(window: &Duration) -> std::result::Result<(), ValidationError> {
    if window.as_millis() == 0 {
        let mut error = ValidationError::new("window");
        error.message = Some("window must be at least 1ms".into());
        return Err(error);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_builder_defaults() {
        let policy = RateLimitPolicy::builder().build().unwrap();
        assert_eq!(policy.window(), Duration::from_secs(60));
        assert_eq!(policy.max_hits(), 60);
        assert_eq!(policy.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(policy.message(), "Too many requests, please try again later.");
        assert_eq!(policy.identifier(), "standard");
        assert!(!policy.should_skip(&Request::new(Body::empty())));
    }

    #[test]
    fn test_zero_window_is_rejected() {
        let err = RateLimitPolicy::builder()
            .window(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPolicy(_)));

        let err = RateLimitPolicy::builder()
            .window(Duration::from_micros(500))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPolicy(_)));
    }

    #[test]
    fn test_success_status_is_rejected() {
        let err = RateLimitPolicy::builder()
            .status(StatusCode::OK)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPolicy(_)));

        assert!(RateLimitPolicy::builder()
            .status(StatusCode::SERVICE_UNAVAILABLE)
            .build()
            .is_ok());
    }

    #[test]
    fn test_zero_max_is_allowed() {
        let policy = RateLimitPolicy::builder().max_hits(0).build().unwrap();
        assert_eq!(policy.max_hits(), 0);
    }

    #[test]
    fn test_settings_from_json() {
        let settings: PolicySettings = serde_json::from_str(
            r#"{ "window": "30s", "max": 20, "identifier": "custom" }"#,
        )
        .unwrap();
        let policy = settings.into_builder().unwrap().build().unwrap();
        assert_eq!(policy.window(), Duration::from_secs(30));
        assert_eq!(policy.max_hits(), 20);
        assert_eq!(policy.identifier(), "custom");
        assert_eq!(policy.message(), DEFAULT_MESSAGE);
    }

    #[test]
    fn test_invalid_settings() {
        let settings: PolicySettings =
            serde_json::from_str(r#"{ "window": "0s", "max": 20 }"#).unwrap();
        assert!(matches!(
            settings.into_builder(),
            Err(Error::Validation(_))
        ));

        let mut settings = PolicySettings::per_minute(10);
        settings.identifier = Some(String::new());
        assert!(matches!(
            settings.into_builder(),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_summary_serializes_humantime_window() {
        let policy = RateLimitPolicy::builder()
            .window_ms(60_000)
            .max_hits(10)
            .identifier("strict")
            .build()
            .unwrap();
        let json = serde_json::to_value(policy.summary()).unwrap();
        assert_eq!(json["window"], "1m");
        assert_eq!(json["max"], 10);
        assert_eq!(json["status"], 429);
    }
}
