use serde::Deserialize;
use validator::{Validate, ValidationError};

use crate::error::Result;

/// Path parameters addressing one window: the limiter's identifier and the
/// key inside its store.
#[derive(Debug, Deserialize, Validate)]
pub struct WindowPath {
    #[validate(length(min = 1, max = 64, message = "Identifier must be between 1 and 64 characters"))]
    pub identifier: String,

    #[validate(
        length(min = 1, max = 256, message = "Key must be between 1 and 256 characters"),
        custom(function = "validate_key_chars")
    )]
    pub key: String,
}

impl WindowPath {
    pub fn validated(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }
}

fn validate_key_chars(key: &str) -> std::result::Result<(), ValidationError> {
    if key.chars().any(|c| c.is_control() || c.is_whitespace()) {
        let mut error = ValidationError::new("key_chars");
        error.message = Some("Key cannot contain whitespace or control characters".into());
        return Err(error);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn path(identifier: &str, key: &str) -> WindowPath {
        WindowPath {
            identifier: identifier.to_string(),
            key: key.to_string(),
        }
    }

    #[test]
    fn test_valid_paths() {
        assert_eq!(path("api", "192.168.1.1").validated().unwrap().key, "192.168.1.1");
        assert_eq!(
            path("anonymous", "anon_10.0.0.1").validated().unwrap().key,
            "anon_10.0.0.1"
        );
        assert!(path("strict", "unknown-ip").validated().is_ok());
    }

    #[test]
    fn test_empty_key() {
        assert!(matches!(path("api", "").validated(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_too_long_key() {
        let key = "a".repeat(257);
        assert!(matches!(path("api", &key).validated(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_whitespace_key() {
        assert!(matches!(
            path("api", "invalid key").validated(),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_too_long_identifier() {
        let identifier = "i".repeat(65);
        assert!(matches!(
            path(&identifier, "10.0.0.1").validated(),
            Err(Error::Validation(_))
        ));
    }
}
