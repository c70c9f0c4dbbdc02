//! Shared utility functions for provider adapters.

use std::time::Duration;

use solace_domain::config::{AuthConfig, AuthMode};
use solace_domain::error::{Error, Result};

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::Http`].
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Build a pooled client. `request_timeout` is `None` for streaming clients,
/// whose bodies may legitimately outlive any fixed deadline.
pub(crate) fn build_client(
    connect_timeout_ms: u64,
    request_timeout_ms: Option<u64>,
) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(Duration::from_millis(connect_timeout_ms))
        .pool_idle_timeout(Duration::from_secs(90));
    if let Some(ms) = request_timeout_ms {
        builder = builder.timeout(Duration::from_millis(ms));
    }
    builder.build().map_err(from_reqwest)
}

/// Resolve the API key from an [`AuthConfig`].
///
/// Precedence:
/// 1. `mode = "none"` → no key
/// 2. `key` field (plaintext, warns)
/// 3. `env` field (reads environment variable)
/// 4. Error
pub fn resolve_api_key(auth: &AuthConfig) -> Result<Option<String>> {
    if auth.mode == AuthMode::None {
        return Ok(None);
    }

    if let Some(ref key) = auth.key {
        tracing::warn!(
            "API key loaded from plaintext config field 'key'; prefer 'env' instead"
        );
        return Ok(Some(key.clone()));
    }

    if let Some(ref env_var) = auth.env {
        return std::env::var(env_var).map(Some).map_err(|_| {
            Error::Auth(format!(
                "environment variable '{}' not set or not valid UTF-8",
                env_var
            ))
        });
    }

    Err(Error::Auth(
        "no API key configured: set 'key' or 'env' in AuthConfig, or mode = \"none\"".into(),
    ))
}

/// A resolved auth header, ready to attach to requests.
#[derive(Debug, Clone)]
pub(crate) struct AuthHeader {
    pub name: String,
    pub value: String,
}

impl AuthHeader {
    /// Resolve `auth` into a header, falling back to the given name and
    /// prefix when the config leaves them unset.
    pub fn resolve(
        auth: &AuthConfig,
        default_header: &str,
        default_prefix: &str,
    ) -> Result<Option<Self>> {
        let Some(key) = resolve_api_key(auth)? else {
            return Ok(None);
        };
        let name = auth
            .header
            .clone()
            .unwrap_or_else(|| default_header.to_string());
        let prefix = auth
            .prefix
            .clone()
            .unwrap_or_else(|| default_prefix.to_string());
        Ok(Some(Self {
            name,
            value: format!("{prefix}{key}"),
        }))
    }

    pub fn apply(header: Option<&Self>, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match header {
            Some(h) => req.header(&h.name, &h.value),
            None => req,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_api_key_plaintext() {
        let auth = AuthConfig {
            key: Some("sk-test-123".into()),
            ..Default::default()
        };
        let result = resolve_api_key(&auth).unwrap();
        assert_eq!(result.as_deref(), Some("sk-test-123"));
    }

    #[test]
    fn resolve_api_key_env_var() {
        let var_name = "SOLACE_TEST_RESOLVE_ENV_KEY_1234";
        std::env::set_var(var_name, "env-secret-value");
        let auth = AuthConfig::from_env(var_name);
        let result = resolve_api_key(&auth).unwrap();
        assert_eq!(result.as_deref(), Some("env-secret-value"));
        std::env::remove_var(var_name);
    }

    #[test]
    fn resolve_api_key_env_var_missing() {
        let auth = AuthConfig::from_env("SOLACE_TEST_NONEXISTENT_VAR_8888");
        let err = resolve_api_key(&auth).unwrap_err();
        assert!(err.to_string().contains("SOLACE_TEST_NONEXISTENT_VAR_8888"));
    }

    #[test]
    fn resolve_api_key_no_config() {
        let err = resolve_api_key(&AuthConfig::default()).unwrap_err();
        assert!(err.to_string().contains("no API key configured"));
    }

    #[test]
    fn mode_none_needs_no_key() {
        let auth = AuthConfig {
            mode: AuthMode::None,
            env: Some("SOLACE_TEST_SHOULD_NOT_BE_READ".into()),
            ..Default::default()
        };
        assert!(resolve_api_key(&auth).unwrap().is_none());
    }

    #[test]
    fn header_defaults_apply_when_unset() {
        let auth = AuthConfig {
            key: Some("abc".into()),
            ..Default::default()
        };
        let h = AuthHeader::resolve(&auth, "Authorization", "Bearer ")
            .unwrap()
            .unwrap();
        assert_eq!(h.name, "Authorization");
        assert_eq!(h.value, "Bearer abc");
    }

    #[test]
    fn header_config_overrides_defaults() {
        let auth = AuthConfig {
            key: Some("abc".into()),
            header: Some("xi-api-key".into()),
            prefix: Some(String::new()),
            ..Default::default()
        };
        let h = AuthHeader::resolve(&auth, "Authorization", "Bearer ")
            .unwrap()
            .unwrap();
        assert_eq!(h.name, "xi-api-key");
        assert_eq!(h.value, "abc");
    }
}
