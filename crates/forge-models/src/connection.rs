//! Connection modes and request headers.
//!
//! Forge talks to the Messages API in one of two ways:
//! - **direct**: the credential is attached here, together with the
//!   direct-access marker the API expects from browser-style clients;
//! - **proxied**: requests go to an intermediary that attaches the credential
//!   itself, so no credential header is sent.

use std::fmt;

use forge_abstraction::ModelError;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

/// Direct Messages API endpoint.
pub const DIRECT_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// Path appended to a proxy base URL.
pub const MESSAGES_PATH: &str = "/v1/messages";

/// Value of the `anthropic-version` header.
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Value of the `anthropic-beta` header when web search is declared.
pub const WEB_SEARCH_BETA: &str = "web-search-2025-03-05";

const API_KEY_HEADER: &str = "x-api-key";
const VERSION_HEADER: &str = "anthropic-version";
const BETA_HEADER: &str = "anthropic-beta";
const DIRECT_ACCESS_HEADER: &str = "anthropic-dangerous-direct-browser-access";

/// How requests reach the completion service. Immutable for a run.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ConnectionConfig {
    /// Credential attached locally.
    Direct {
        /// API key.
        api_key: String,
    },
    /// Forwarded to a proxy that attaches the credential.
    Proxied {
        /// Proxy base URL; `/v1/messages` is appended.
        base_url: String,
    },
}

impl ConnectionConfig {
    /// Direct mode with the given key.
    pub fn direct(api_key: impl Into<String>) -> Self {
        Self::Direct { api_key: api_key.into() }
    }

    /// Proxied mode via the given base URL.
    pub fn proxied(base_url: impl Into<String>) -> Self {
        Self::Proxied { base_url: base_url.into() }
    }

    /// Whether a credential travels with each request.
    pub fn is_direct(&self) -> bool {
        matches!(self, Self::Direct { .. })
    }

    /// URL requests are posted to.
    ///
    /// Direct mode uses `direct_url`; proxied mode strips trailing slashes from
    /// the base URL and appends [`MESSAGES_PATH`].
    pub fn endpoint(&self, direct_url: &str) -> String {
        match self {
            Self::Direct { .. } => direct_url.to_string(),
            Self::Proxied { base_url } => format!("{}{}", base_url.trim_end_matches('/'), MESSAGES_PATH),
        }
    }

    /// Headers for one request.
    ///
    /// # Errors
    /// Returns `ModelError::Misconfiguration` if the credential is not a valid
    /// header value.
    pub fn headers(&self, declares_web_search: bool) -> Result<HeaderMap, ModelError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(HeaderName::from_static(VERSION_HEADER), HeaderValue::from_static(ANTHROPIC_VERSION));

        if declares_web_search {
            headers.insert(HeaderName::from_static(BETA_HEADER), HeaderValue::from_static(WEB_SEARCH_BETA));
        }

        if let Self::Direct { api_key } = self {
            let mut key = HeaderValue::from_str(api_key).map_err(|_| {
                ModelError::Misconfiguration("API key contains characters not allowed in a header".to_string())
            })?;
            key.set_sensitive(true);
            headers.insert(HeaderName::from_static(API_KEY_HEADER), key);
            headers.insert(HeaderName::from_static(DIRECT_ACCESS_HEADER), HeaderValue::from_static("true"));
        }

        Ok(headers)
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct { .. } => f.debug_struct("Direct").field("api_key", &"<redacted>").finish(),
            Self::Proxied { base_url } => f.debug_struct("Proxied").field("base_url", base_url).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_headers() {
        let headers = ConnectionConfig::direct("sk-test").headers(false).unwrap();
        assert_eq!(headers["content-type"], "application/json");
        assert_eq!(headers["anthropic-version"], ANTHROPIC_VERSION);
        assert_eq!(headers["x-api-key"], "sk-test");
        assert_eq!(headers["anthropic-dangerous-direct-browser-access"], "true");
        assert!(headers.get("anthropic-beta").is_none());
    }

    #[test]
    fn test_proxied_headers_carry_no_credential() {
        let headers = ConnectionConfig::proxied("https://proxy.example.com").headers(true).unwrap();
        assert!(headers.get("x-api-key").is_none());
        assert!(headers.get("anthropic-dangerous-direct-browser-access").is_none());
        assert_eq!(headers["anthropic-beta"], WEB_SEARCH_BETA);
    }

    #[test]
    fn test_invalid_key_is_misconfiguration() {
        let result = ConnectionConfig::direct("bad\nkey").headers(false);
        assert!(matches!(result, Err(ModelError::Misconfiguration(_))));
    }

    #[test]
    fn test_endpoints() {
        assert_eq!(ConnectionConfig::direct("k").endpoint(DIRECT_API_URL), DIRECT_API_URL);
        assert_eq!(
            ConnectionConfig::proxied("https://forge-proxy.workers.dev///").endpoint(DIRECT_API_URL),
            "https://forge-proxy.workers.dev/v1/messages"
        );
    }

    #[test]
    fn test_debug_redacts_key() {
        let rendered = format!("{:?}", ConnectionConfig::direct("sk-secret"));
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("redacted"));
    }

    #[test]
    fn test_deserialize_tagged_modes() {
        let direct: ConnectionConfig = serde_json::from_str(r#"{"mode": "direct", "api_key": "k"}"#).unwrap();
        assert!(direct.is_direct());
        let proxied: ConnectionConfig =
            serde_json::from_str(r#"{"mode": "proxied", "base_url": "https://p"}"#).unwrap();
        assert_eq!(proxied, ConnectionConfig::proxied("https://p"));
    }
}
