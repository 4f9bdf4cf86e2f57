//! The authority on the current access token.
//!
//! A [`Session`] moves through the login lifecycle:
//!
//! ```text
//! LoggedOut --begin_login--> Authorizing --complete_login--> LoggedIn
//!     ^                                                      |    ^
//!     +---------------------------logout---------------------+    |
//!                                                  valid_token (refresh)
//! ```
//!
//! It is shared between tasks as `Arc<Session<P>>`. In-memory state sits
//! behind a synchronous mutex that is never held across an await; token
//! refreshes are single-flight, so callers arriving while a refresh is in
//! progress wait for it and share its outcome.

use std::{
    path::PathBuf,
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, TimestampMilliSeconds};
use veil::Redact;

use crate::{
    error::{Error, Result},
    preferences,
    tokens::{AccessToken, TokenProvider},
};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Status {
    #[default]
    LoggedOut,
    Authorizing,
    LoggedIn,
}

#[derive(Debug, Default)]
struct State {
    status: Status,

    /// Nonce of the login attempt in progress.
    nonce: Option<String>,

    access_token: Option<AccessToken>,

    /// Set by the first login and kept across expiry; only logout clears it.
    is_logged: bool,

    /// Number of completed refreshes, successful or not.
    refreshes: u64,

    /// Token produced by the latest refresh, `None` if it failed.
    refreshed: Option<String>,

    /// Number of logouts. A refresh that straddles one is discarded.
    logouts: u64,
}

impl State {
    fn cached_token(&self) -> Option<String> {
        self.access_token
            .as_ref()
            .filter(|token| !token.is_expired())
            .map(|token| token.token.clone())
    }
}

/// What survives a restart of the desktop process.
#[serde_as]
#[derive(Default, Deserialize, Serialize, Redact)]
#[serde(default, rename_all = "camelCase")]
struct SavedSession {
    #[redact]
    token: Option<String>,

    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    token_expiry: Option<SystemTime>,

    is_user_logged: bool,
}

pub struct Session<P> {
    provider: P,
    state: Mutex<State>,
    refresh_lock: tokio::sync::Mutex<()>,
    saved_session: Option<PathBuf>,
}

impl<P> Session<P>
where
    P: TokenProvider,
{
    #[must_use]
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            state: Mutex::new(State::default()),
            refresh_lock: tokio::sync::Mutex::new(()),
            saved_session: None,
        }
    }

    /// Keeps the session in `path` across restarts; see [`init`](Self::init)
    /// and [`teardown`](Self::teardown).
    #[must_use]
    pub fn with_saved_session(mut self, path: impl Into<PathBuf>) -> Self {
        self.saved_session = Some(path.into());
        self
    }

    #[must_use]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // State is plain data and consistent after every statement, so a
        // panic elsewhere cannot leave it torn.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Restores the session saved by the last [`teardown`](Self::teardown).
    ///
    /// A missing or corrupt file leaves the session logged out.
    pub async fn init(&self) {
        let Some(path) = &self.saved_session else {
            return;
        };

        let Some(saved) = preferences::load_json::<SavedSession>(path).await else {
            return;
        };

        let mut state = self.state();
        if let Some(token) = saved.token {
            state.access_token = Some(AccessToken {
                token,
                expires_at: saved.token_expiry.unwrap_or(SystemTime::UNIX_EPOCH),
            });
            state.is_logged = saved.is_user_logged;
            if state.is_logged {
                state.status = Status::LoggedIn;
            }
        }
        debug!("session restored, status: {:?}", state.status);
    }

    /// Writes the session for the next [`init`](Self::init).
    ///
    /// # Errors
    ///
    /// Returns `PersistenceFailure` if the session cannot be written.
    pub async fn teardown(&self) -> Result<()> {
        let Some(path) = &self.saved_session else {
            return Ok(());
        };

        let saved = {
            let state = self.state();
            SavedSession {
                token: state.access_token.as_ref().map(|t| t.token.clone()),
                token_expiry: state.access_token.as_ref().map(|t| t.expires_at),
                is_user_logged: state.is_logged && state.access_token.is_some(),
            }
        };

        preferences::save_json(path, &saved).await
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.state().status
    }

    #[must_use]
    pub fn is_logged(&self) -> bool {
        self.state().is_logged
    }

    /// The current token, whether or not it is still valid.
    #[must_use]
    pub fn access_token(&self) -> Option<AccessToken> {
        self.state().access_token.clone()
    }

    #[must_use]
    pub fn token_expiry(&self) -> Option<SystemTime> {
        self.state().access_token.as_ref().map(|t| t.expires_at)
    }

    /// Starts a login attempt and returns the URL to send the user to.
    ///
    /// # Errors
    ///
    /// Whatever the provider fails with; the session stays where it was.
    pub async fn begin_login(&self) -> Result<String> {
        let request = self.provider.authorize().await?;

        let mut state = self.state();
        state.status = Status::Authorizing;
        state.nonce = Some(request.state);

        Ok(request.auth_url)
    }

    /// Enters the logged-in state with a token valid for `expires_in`.
    pub fn complete_login(&self, access_token: impl Into<String>, expires_in: Duration) {
        self.set_logged_in(AccessToken::new(access_token, expires_in));
    }

    /// Completes the login attempt with the redirect's `code` and `state`.
    ///
    /// # Errors
    ///
    /// `BadRequest` if `state` is not the nonce of the attempt in progress;
    /// otherwise whatever the provider's code exchange fails with.
    pub async fn complete_login_with_code(
        &self,
        code: &str,
        state: &str,
        redirect_uri: &str,
    ) -> Result<()> {
        {
            let current = self.state();
            if let Some(nonce) = &current.nonce {
                if nonce != state {
                    return Err(Error::bad_request("Authorization state mismatch"));
                }
            }
        }

        let token = self.provider.exchange_code(code, state, redirect_uri).await?;
        self.set_logged_in(token);
        Ok(())
    }

    fn set_logged_in(&self, token: AccessToken) {
        let mut state = self.state();
        state.access_token = Some(token);
        state.is_logged = true;
        state.status = Status::LoggedIn;
        state.nonce = None;
        info!("logged in");
    }

    /// Returns a token that is valid now, refreshing it if needed.
    ///
    /// Returns `None` if no valid token can be had; the cause is logged.
    pub async fn valid_token(&self) -> Option<String> {
        let (generation, epoch) = {
            let state = self.state();
            if let Some(token) = state.cached_token() {
                trace!("using cached token");
                return Some(token);
            }
            (state.refreshes, state.logouts)
        };

        let _refreshing = self.refresh_lock.lock().await;

        {
            let state = self.state();
            if state.logouts != epoch {
                debug!("logged out while waiting for a refresh");
                return state.cached_token();
            }
            if state.refreshes != generation {
                trace!("sharing outcome of concurrent refresh");
                return state.refreshed.clone();
            }
        }

        let result = self.provider.refresh().await;

        let mut state = self.state();
        state.refreshes += 1;
        if state.logouts != epoch {
            debug!("discarding refresh that completed after logout");
            state.refreshed = None;
            return state.cached_token();
        }

        match result {
            Ok(token) => {
                debug!(
                    "token refreshed, valid for {}s",
                    token.time_to_live().as_secs()
                );
                let value = token.token.clone();
                state.access_token = Some(token);
                state.is_logged = true;
                state.status = Status::LoggedIn;
                state.refreshed = Some(value.clone());
                Some(value)
            }
            Err(e) => {
                error!("failed to refresh token: {e}");
                state.refreshed = None;
                None
            }
        }
    }

    /// Forgets the session and the persisted refresh credential.
    ///
    /// The in-memory session is reset even if revoking fails.
    ///
    /// # Errors
    ///
    /// Whatever the provider fails with while revoking.
    pub async fn logout(&self) -> Result<()> {
        {
            let mut state = self.state();
            let (refreshes, logouts) = (state.refreshes, state.logouts + 1);
            *state = State {
                refreshes,
                logouts,
                ..State::default()
            };
        }
        info!("logged out");

        self.provider.revoke().await
    }
}
