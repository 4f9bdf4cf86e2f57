//! Access tokens and the providers that hand them out.
//!
//! An [`AccessToken`] is the short-lived bearer credential for the Web API.
//! A [`TokenProvider`] obtains new ones, either by talking to the accounts
//! service directly ([`auth::TokenExchange`](crate::auth::TokenExchange)) or
//! through the local backend ([`backend::Client`](crate::backend::Client)).

use std::{
    fmt,
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use veil::Redact;

use crate::error::Result;

/// Bearer credential with its absolute expiry.
#[derive(Clone, Redact, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccessToken {
    #[redact]
    pub token: String,
    pub expires_at: SystemTime,
}

impl AccessToken {
    /// A token valid for `expires_in` from now.
    #[must_use]
    pub fn new(token: impl Into<String>, expires_in: Duration) -> Self {
        let now = SystemTime::now();
        Self {
            token: token.into(),
            expires_at: now.checked_add(expires_in).unwrap_or(now),
        }
    }

    #[must_use]
    pub fn time_to_live(&self) -> Duration {
        self.expires_at
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO)
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        SystemTime::now() >= self.expires_at
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.token
    }
}

impl fmt::Display for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token)
    }
}

/// Body of a successful answer from the token endpoint.
///
/// ```json
/// {
///     "access_token": "BQD...",
///     "token_type": "Bearer",
///     "scope": "user-read-private streaming",
///     "expires_in": 3600,
///     "refresh_token": "AQD..."
/// }
/// ```
#[serde_as]
#[derive(Clone, Deserialize, Redact, PartialEq, Eq)]
pub struct TokenResponse {
    #[redact]
    pub access_token: String,

    #[serde(default)]
    pub token_type: String,

    #[serde(default)]
    pub scope: Option<String>,

    #[serde_as(as = "DurationSeconds<u64>")]
    pub expires_in: Duration,

    /// Present on the authorization-code grant; on the refresh grant only
    /// when the provider rotates the credential.
    #[redact]
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl TokenResponse {
    /// Anchors the relative lifetime at the current instant.
    #[must_use]
    pub fn access_token(&self) -> AccessToken {
        AccessToken::new(self.access_token.clone(), self.expires_in)
    }
}

/// Where to send the user for consent, and the nonce correlating the
/// redirect back to this attempt.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationRequest {
    pub auth_url: String,
    pub state: String,
}

/// Source of access tokens for a [`Session`](crate::session::Session).
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Starts a login attempt.
    async fn authorize(&self) -> Result<AuthorizationRequest>;

    /// Exchanges an authorization code for a token, persisting the refresh
    /// credential that comes with it.
    async fn exchange_code(&self, code: &str, state: &str, redirect_uri: &str)
        -> Result<AccessToken>;

    /// Exchanges the persisted refresh credential for a new token.
    async fn refresh(&self) -> Result<AccessToken>;

    /// Forgets the persisted refresh credential.
    async fn revoke(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_is_anchored_at_creation() {
        let token = AccessToken::new("token", Duration::from_secs(3600));
        assert!(!token.is_expired());
        assert!(token.time_to_live() > Duration::from_secs(3590));

        let expired = AccessToken::new("token", Duration::ZERO);
        assert!(expired.is_expired());
        assert_eq!(expired.time_to_live(), Duration::ZERO);
    }

    #[test]
    fn parses_token_endpoint_answer() {
        let json = r#"{
            "access_token": "access",
            "token_type": "Bearer",
            "scope": "streaming",
            "expires_in": 3600,
            "refresh_token": "refresh"
        }"#;

        let response: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.expires_in, Duration::from_secs(3600));
        assert_eq!(response.refresh_token.as_deref(), Some("refresh"));

        let debug = format!("{response:?}");
        assert!(!debug.contains("access\""));
        assert!(!debug.contains("refresh\""));
    }

    #[test]
    fn authorization_request_uses_camel_case() {
        let request = AuthorizationRequest {
            auth_url: "https://example.com".to_string(),
            state: "abc".to_string(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["authUrl"], "https://example.com");
        assert_eq!(json["state"], "abc");
    }
}
