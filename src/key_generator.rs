//! Key derivation for rate limiting.
//!
//! A key names the counter a request is charged against. The default key is
//! the client address as reported by the proxy headers.

use axum::extract::Request;
use axum::http::HeaderMap;
use std::fmt;
use thiserror::Error;

/// Key used when nothing identifies the caller.
pub const UNKNOWN_CLIENT: &str = "unknown-ip";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("missing header '{0}'")]
    MissingHeader(String),

    #[error("header '{0}' is not valid UTF-8")]
    InvalidHeader(String),
}

/// Strategy mapping a request to its rate limit key.
///
/// Implemented for plain closures, so a policy can take either one of the
/// provided strategies or `|req: &Request| Ok(...)`.
pub trait KeyExtractor: Send + Sync {
    fn extract(&self, request: &Request) -> Result<String, KeyError>;
}

impl<F> KeyExtractor for F
where
    F: Fn(&Request) -> Result<String, KeyError> + Send + Sync,
{
    fn extract(&self, request: &Request) -> Result<String, KeyError> {
        self(request)
    }
}

/// Client address from `x-forwarded-for`, then `x-real-ip`, then
/// [`UNKNOWN_CLIENT`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientIpKey;

impl KeyExtractor for ClientIpKey {
    fn extract(&self, request: &Request) -> Result<String, KeyError> {
        Ok(client_ip(request.headers()).unwrap_or_else(|| UNKNOWN_CLIENT.to_string()))
    }
}

/// Client address namespaced by a tier prefix, e.g. `anon_203.0.113.7`.
#[derive(Debug, Clone)]
pub struct PrefixedClientIpKey {
    prefix: String,
}

impl PrefixedClientIpKey {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl KeyExtractor for PrefixedClientIpKey {
    fn extract(&self, request: &Request) -> Result<String, KeyError> {
        let ip = client_ip(request.headers()).unwrap_or_else(|| UNKNOWN_CLIENT.to_string());
        Ok(format!("{}_{}", self.prefix, ip))
    }
}

/// Value of a required header, such as an API key.
#[derive(Debug, Clone)]
pub struct HeaderKey {
    name: String,
}

impl HeaderKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().to_ascii_lowercase(),
        }
    }
}

impl KeyExtractor for HeaderKey {
    fn extract(&self, request: &Request) -> Result<String, KeyError> {
        let value = request
            .headers()
            .get(self.name.as_str())
            .ok_or_else(|| KeyError::MissingHeader(self.name.clone()))?;
        let value = value
            .to_str()
            .map_err(|_| KeyError::InvalidHeader(self.name.clone()))?
            .trim();
        if value.is_empty() {
            return Err(KeyError::MissingHeader(self.name.clone()));
        }
        Ok(format!("{}:{}", self.name, value))
    }
}

impl fmt::Debug for dyn KeyExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyExtractor")
    }
}

/// Extract the client address from proxy headers.
///
/// `x-forwarded-for` may carry a chain; the first hop is the client. Empty or
/// non UTF-8 values fall through to the next header.
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    forwarded
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
        })
        .map(str::to_string)
}
