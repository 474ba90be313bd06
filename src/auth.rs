//! API-key authentication
//!
//! Keys arrive in the `X-API-Key` header; a separate list carries the
//! admin bit that gates replay and snapshot pinning.

use thiserror::Error;

use crate::config::Settings;

/// Error type for authentication
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("API key required")]
    Missing,

    #[error("invalid API key")]
    Invalid,

    #[error("admin privileges required")]
    Forbidden,
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Missing => "AUTH_MISSING_API_KEY",
            AuthError::Invalid => "AUTH_INVALID_API_KEY",
            AuthError::Forbidden => "AUTH_FORBIDDEN",
        }
    }
}

/// A verified caller identity.
#[derive(Debug, Clone)]
pub struct ApiKey {
    pub key: String,
    pub admin: bool,
}

impl ApiKey {
    pub fn require_admin(&self) -> Result<(), AuthError> {
        if self.admin {
            Ok(())
        } else {
            Err(AuthError::Forbidden)
        }
    }
}

/// Verify the `X-API-Key` header value against the configured key lists.
pub fn verify_api_key(settings: &Settings, header: Option<&str>) -> Result<ApiKey, AuthError> {
    let key = header.ok_or(AuthError::Missing)?;
    if !settings.api_keys.iter().any(|k| k == key) {
        return Err(AuthError::Invalid);
    }
    Ok(ApiKey {
        key: key.to_string(),
        admin: settings.admin_api_keys.iter().any(|k| k == key),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_verification() {
        let settings = Settings::default();
        assert!(matches!(
            verify_api_key(&settings, None),
            Err(AuthError::Missing)
        ));
        assert!(matches!(
            verify_api_key(&settings, Some("nope")),
            Err(AuthError::Invalid)
        ));

        let user = verify_api_key(&settings, Some("dev-key-123")).unwrap();
        assert!(!user.admin);
        assert!(user.require_admin().is_err());

        let admin = verify_api_key(&settings, Some("admin-key-456")).unwrap();
        assert!(admin.admin);
        assert!(admin.require_admin().is_ok());
    }
}
