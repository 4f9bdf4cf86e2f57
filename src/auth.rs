//! Token exchanges against the accounts service.
//!
//! Implements the authorization-code flow:
//!
//! 1. [`authorize`](TokenExchange::authorize) builds the consent URL and
//!    issues a single-use nonce (`state`).
//! 2. The accounts service redirects back with a `code` and the nonce.
//! 3. [`exchange_authorization_code`](TokenExchange::exchange_authorization_code)
//!    verifies the nonce, trades the code for tokens and persists the
//!    refresh credential.
//! 4. [`exchange_refresh_token`](TokenExchange::exchange_refresh_token)
//!    later trades the persisted credential for fresh access tokens.
//!
//! Both exchanges POST a form-encoded body to `/api/token` with HTTP Basic
//! authentication built from the client id and secret. That format is fixed
//! by the provider.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use base64::prelude::*;
use reqwest::{
    header::{AUTHORIZATION, CONTENT_TYPE},
    Method, Url,
};
use uuid::Uuid;

use crate::{
    config::Config,
    credentials::Credentials,
    error::{Error, Result},
    http::Client as HttpClient,
    preferences::PreferenceStore,
    tokens::{AccessToken, AuthorizationRequest, TokenProvider, TokenResponse},
};

pub struct TokenExchange {
    http_client: HttpClient,
    credentials: Credentials,
    accounts_url: Url,
    redirect_uri: Url,
    scope: String,
    preferences: PreferenceStore,

    /// Nonces issued by `authorize` that have not been redeemed yet.
    pending: Mutex<HashMap<String, Instant>>,
}

impl TokenExchange {
    /// Length of the `state` nonce.
    pub const STATE_LENGTH: usize = 16;

    /// How long a login attempt may take from consent URL to callback.
    const STATE_LIFETIME: Duration = Duration::from_secs(10 * 60);

    /// Upper bound on concurrently pending login attempts.
    const MAX_PENDING_STATES: usize = 32;

    const FORM_CONTENT: &'static str = "application/x-www-form-urlencoded";

    /// Creates a new exchange service.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            http_client: HttpClient::new(config)?,
            credentials: config.credentials.clone(),
            accounts_url: config.accounts_url.clone(),
            redirect_uri: config.redirect_uri.clone(),
            scope: config.scope(),
            preferences: PreferenceStore::new(&config.preferences_file),
            pending: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn preferences(&self) -> &PreferenceStore {
        &self.preferences
    }

    /// Generates a random alphanumeric nonce of [`STATE_LENGTH`](Self::STATE_LENGTH)
    /// characters.
    #[must_use]
    pub fn generate_state() -> String {
        let mut state = String::with_capacity(Self::STATE_LENGTH);
        while state.len() < Self::STATE_LENGTH {
            // Version 4 UUIDs draw from the operating system's CSPRNG.
            let encoded = BASE64_STANDARD_NO_PAD.encode(Uuid::new_v4().as_bytes());
            let missing = Self::STATE_LENGTH - state.len();
            state.extend(
                encoded
                    .chars()
                    .filter(char::is_ascii_alphanumeric)
                    .take(missing),
            );
        }
        state
    }

    /// Builds the consent URL for a new login attempt.
    ///
    /// # Errors
    ///
    /// Will return `ConfigurationMissing` without a client id.
    pub fn authorize(&self) -> Result<AuthorizationRequest> {
        let client_id = self.credentials.client_id()?;
        let state = Self::generate_state();

        let mut url = self.accounts_url.join("authorize")?;
        url.query_pairs_mut()
            .append_pair("client_id", client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", self.redirect_uri.as_str())
            .append_pair("scope", &self.scope)
            .append_pair("state", &state);

        self.remember_state(&state)?;
        debug!("issued authorization state");

        Ok(AuthorizationRequest {
            auth_url: url.into(),
            state,
        })
    }

    fn remember_state(&self, state: &str) -> Result<()> {
        let mut pending = self.pending.lock()?;
        pending.retain(|_, issued| issued.elapsed() < Self::STATE_LIFETIME);

        if pending.len() >= Self::MAX_PENDING_STATES {
            // Evict the oldest attempt; it is the least likely to complete.
            if let Some(oldest) = pending
                .iter()
                .min_by_key(|(_, issued)| **issued)
                .map(|(state, _)| state.clone())
            {
                pending.remove(&oldest);
            }
        }

        pending.insert(state.to_owned(), Instant::now());
        Ok(())
    }

    /// Redeems a nonce. Each nonce verifies at most once.
    fn verify_state(&self, state: &str) -> Result<()> {
        let issued = self.pending.lock()?.remove(state);
        match issued {
            Some(issued) if issued.elapsed() < Self::STATE_LIFETIME => Ok(()),
            Some(_) => Err(Error::bad_request("Authorization state expired")),
            None => Err(Error::bad_request("Authorization state unknown")),
        }
    }

    /// Trades an authorization code for tokens and persists the refresh
    /// credential.
    ///
    /// An empty `redirect_uri` stands for the configured one; the provider
    /// requires it to match the one used in the consent URL.
    ///
    /// # Errors
    ///
    /// * `BadRequest` if code or state are missing, or the state was not
    ///   issued by this service
    /// * `ConfigurationMissing` without client id and secret
    /// * `UpstreamRejected` if the provider refuses the code
    /// * `UpstreamUnreachable` on network failure
    /// * `PersistenceFailure` if the refresh credential cannot be saved
    pub async fn exchange_authorization_code(
        &self,
        code: &str,
        state: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse> {
        if code.is_empty() || state.is_empty() {
            return Err(Error::bad_request("Authorization failed. No code found."));
        }

        let authorization = self.credentials.basic_auth()?;
        self.verify_state(state)?;

        let redirect_uri = if redirect_uri.is_empty() {
            self.redirect_uri.as_str()
        } else {
            redirect_uri
        };

        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "authorization_code")
            .append_pair("code", code)
            .append_pair("redirect_uri", redirect_uri)
            .finish();

        let response = self
            .request_token(&authorization, body, "Failed to exchange code for token")
            .await?;

        if let Some(refresh_token) = &response.refresh_token {
            self.preferences.set_refresh_token(refresh_token).await?;
        } else {
            warn!("authorization did not grant a refresh token");
        }

        info!("authorization successful");
        Ok(response)
    }

    /// Trades the persisted refresh credential for a new access token.
    ///
    /// When the provider rotates the refresh credential, the new one is
    /// persisted in place of the old, unless the old one was cleared or
    /// replaced in the meantime.
    ///
    /// # Errors
    ///
    /// * `ConfigurationMissing` without client id and secret
    /// * `NoStoredCredential` if no refresh credential is on record
    /// * `UpstreamRejected` if the provider refuses the credential
    /// * `UpstreamUnreachable` on network failure
    pub async fn exchange_refresh_token(&self) -> Result<TokenResponse> {
        let authorization = self.credentials.basic_auth()?;
        let client_id = self.credentials.client_id()?;

        let preferences = self.preferences.load().await;
        let Some(refresh_token) = preferences.refresh_token else {
            return Err(Error::no_stored_credential("No refresh token available"));
        };

        debug!("refreshing access token");
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "refresh_token")
            .append_pair("refresh_token", &refresh_token)
            .append_pair("client_id", client_id)
            .finish();

        let response = self
            .request_token(&authorization, body, "Failed to refresh token")
            .await?;

        if let Some(rotated) = &response.refresh_token {
            if *rotated != refresh_token
                && self
                    .preferences
                    .rotate_refresh_token(&refresh_token, rotated)
                    .await?
            {
                debug!("refresh token rotated");
            }
        }

        Ok(response)
    }

    async fn request_token(
        &self,
        authorization: &str,
        body: String,
        failure: &'static str,
    ) -> Result<TokenResponse> {
        let url = self.accounts_url.join("api/token")?;
        let request = self
            .http_client
            .request(Method::POST, url)
            .header(AUTHORIZATION, authorization)
            .header(CONTENT_TYPE, Self::FORM_CONTENT)
            .body(body);

        let response = self.http_client.send(request).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("{failure}: {status}");
            return Err(Error::upstream_rejected(failure, status, body));
        }

        let bytes = response.bytes().await?;
        let token = serde_json::from_slice::<TokenResponse>(&bytes)?;
        trace!("token response: {token:?}");

        Ok(token)
    }
}

#[async_trait]
impl TokenProvider for TokenExchange {
    async fn authorize(&self) -> Result<AuthorizationRequest> {
        TokenExchange::authorize(self)
    }

    async fn exchange_code(
        &self,
        code: &str,
        state: &str,
        redirect_uri: &str,
    ) -> Result<AccessToken> {
        self.exchange_authorization_code(code, state, redirect_uri)
            .await
            .map(|response| response.access_token())
    }

    async fn refresh(&self) -> Result<AccessToken> {
        self.exchange_refresh_token()
            .await
            .map(|response| response.access_token())
    }

    async fn revoke(&self) -> Result<()> {
        self.preferences.clear().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn exchange() -> TokenExchange {
        let mut config =
            Config::with_credentials(Credentials::new("test-client", "test-secret")).unwrap();
        config.preferences_file =
            std::env::temp_dir().join(format!("tunebridge-{}.json", Uuid::new_v4()));
        TokenExchange::new(&config).unwrap()
    }

    #[test]
    fn state_is_sixteen_alphanumerics() {
        for _ in 0..64 {
            let state = TokenExchange::generate_state();
            assert_eq!(state.len(), TokenExchange::STATE_LENGTH);
            assert!(state.chars().all(|c| c.is_ascii_alphanumeric()));
        }
        assert_ne!(
            TokenExchange::generate_state(),
            TokenExchange::generate_state()
        );
    }

    #[test]
    fn authorization_url_carries_all_parameters() {
        let request = exchange().authorize().unwrap();
        let url = Url::parse(&request.auth_url).unwrap();

        assert_eq!(url.path(), "/authorize");
        let query: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(query["client_id"], "test-client");
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["redirect_uri"], "http://localhost:3001/callback");
        assert_eq!(query["state"], request.state);
        assert!(query["scope"].starts_with("user-read-private user-read-email"));
        assert!(request
            .auth_url
            .contains("redirect_uri=http%3A%2F%2Flocalhost%3A3001%2Fcallback"));
    }

    #[test]
    fn authorization_requires_client_id() {
        let mut config = Config::with_credentials(Credentials::default()).unwrap();
        config.preferences_file = std::env::temp_dir().join("tunebridge-unused.json");
        let exchange = TokenExchange::new(&config).unwrap();

        let err = exchange.authorize().unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConfigurationMissing);
    }

    #[test]
    fn states_verify_once() {
        let exchange = exchange();
        let request = exchange.authorize().unwrap();

        assert!(exchange.verify_state(&request.state).is_ok());
        let err = exchange.verify_state(&request.state).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
    }

    #[test]
    fn pending_states_are_bounded() {
        let exchange = exchange();
        let first = exchange.authorize().unwrap();
        for _ in 0..TokenExchange::MAX_PENDING_STATES {
            exchange.authorize().unwrap();
        }

        assert_eq!(
            exchange.pending.lock().unwrap().len(),
            TokenExchange::MAX_PENDING_STATES
        );
        assert!(exchange.verify_state(&first.state).is_err());
    }

    #[tokio::test]
    async fn missing_code_is_rejected_locally() {
        let exchange = exchange();
        let request = exchange.authorize().unwrap();

        let err = exchange
            .exchange_authorization_code("", &request.state, "")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn unknown_state_is_rejected_locally() {
        let err = exchange()
            .exchange_authorization_code("code", "forged-state-000", "")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn refresh_without_credential_is_rejected_locally() {
        let err = exchange().exchange_refresh_token().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoStoredCredential);
    }
}
