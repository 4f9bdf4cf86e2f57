//! Client of the local backend, as used by the desktop process.
//!
//! The desktop process never holds the client secret. It obtains tokens and
//! library answers from the backend served by [`server`](crate::server),
//! which in turn talks to the remote service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::{
    config::Config,
    error::{Error, ErrorKind, Result, Upstream},
    http::Client as HttpClient,
    server::{ErrorBody, TOKEN_EXPIRY_HEADER},
    tokens::{AccessToken, AuthorizationRequest, TokenProvider},
    util::from_epoch_millis,
};

pub struct Client {
    http_client: HttpClient,
    base_url: Url,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CallbackBody<'a> {
    code: &'a str,
    state: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    redirect_uri: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallbackAnswer {
    access_token: String,
    token_expiry: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TransferBody<'a> {
    access_token: &'a str,
    device_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlayBody<'a> {
    access_token: &'a str,
    uris: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<usize>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IdsBody<'a> {
    access_token: &'a str,
    ids: &'a [String],
}

impl Client {
    pub const DEFAULT_URL: &'static str = "http://localhost:9876/";

    /// Lifetime assumed for refreshed tokens when the backend does not say.
    const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

    /// # Errors
    ///
    /// Will return `Err` if the HTTP client cannot be built.
    pub fn new(config: &Config, base_url: Url) -> Result<Self> {
        Ok(Self {
            http_client: HttpClient::new(config)?,
            base_url,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn call(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = self.http_client.send(request).await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map_or_else(|_| body.clone(), |answer| answer.error);

        let kind = match status {
            StatusCode::BAD_REQUEST => return Err(Error::bad_request(message)),
            StatusCode::UNAUTHORIZED => ErrorKind::InvalidToken,
            StatusCode::FORBIDDEN => ErrorKind::InsufficientScope,
            StatusCode::TOO_MANY_REQUESTS => ErrorKind::RateLimited,
            _ => ErrorKind::UpstreamRejected,
        };

        Err(Error::new(
            kind,
            Upstream {
                message,
                status,
                body,
            },
        ))
    }

    async fn json<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let response = self.call(request).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(Into::into)
    }

    fn post(&self, path: &str) -> Result<reqwest::RequestBuilder> {
        let url = self.base_url.join(path)?;
        Ok(self.http_client.request(Method::POST, url))
    }

    /// Asks the backend which of `ids` are saved in the user's library.
    ///
    /// # Errors
    ///
    /// Whatever the backend answers with.
    pub async fn saved_tracks_contain(&self, access_token: &str, ids: &[String]) -> Result<Value> {
        let mut url = self.base_url.join("spotify/tracks")?;
        url.query_pairs_mut()
            .append_pair("access_token", access_token)
            .append_pair("ids", &ids.join(","));

        self.json(self.http_client.request(Method::POST, url)).await
    }

    /// # Errors
    ///
    /// Whatever the backend answers with.
    pub async fn transfer_playback(&self, access_token: &str, device_id: &str) -> Result<()> {
        let request = self.post("spotify/transfer-playback")?.json(&TransferBody {
            access_token,
            device_id,
        });
        self.call(request).await.map(drop)
    }

    /// # Errors
    ///
    /// Whatever the backend answers with.
    pub async fn play(
        &self,
        access_token: &str,
        uris: &[String],
        offset: Option<usize>,
    ) -> Result<()> {
        let request = self.post("spotify/play")?.json(&PlayBody {
            access_token,
            uris,
            offset,
        });
        self.call(request).await.map(drop)
    }

    /// # Errors
    ///
    /// Whatever the backend answers with.
    pub async fn like(&self, access_token: &str, ids: &[String]) -> Result<()> {
        let request = self
            .post("spotify/like")?
            .json(&IdsBody { access_token, ids });
        self.call(request).await.map(drop)
    }

    /// # Errors
    ///
    /// Whatever the backend answers with.
    pub async fn unlike(&self, access_token: &str, ids: &[String]) -> Result<()> {
        let request = self
            .post("spotify/unlike")?
            .json(&IdsBody { access_token, ids });
        self.call(request).await.map(drop)
    }
}

#[async_trait]
impl TokenProvider for Client {
    async fn authorize(&self) -> Result<AuthorizationRequest> {
        let url = self.base_url.join("auth/login")?;
        self.json(self.http_client.request(Method::GET, url)).await
    }

    async fn exchange_code(
        &self,
        code: &str,
        state: &str,
        redirect_uri: &str,
    ) -> Result<AccessToken> {
        let request = self.post("auth/callback")?.json(&CallbackBody {
            code,
            state,
            redirect_uri,
        });

        let answer: CallbackAnswer = self.json(request).await?;
        Ok(AccessToken {
            token: answer.access_token,
            expires_at: from_epoch_millis(answer.token_expiry),
        })
    }

    async fn refresh(&self) -> Result<AccessToken> {
        let url = self.base_url.join("auth/refresh")?;
        let response = self
            .call(self.http_client.request(Method::GET, url))
            .await
            .map_err(|e| match e.kind {
                // The backend answers 400 only when it has nothing to refresh.
                ErrorKind::BadRequest => Error::no_stored_credential(e.error),
                _ => e,
            })?;

        let expiry = response
            .headers()
            .get(TOKEN_EXPIRY_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());

        let token = response.text().await?;
        if token.is_empty() {
            return Err(Error::internal("backend answered with an empty token"));
        }

        Ok(match expiry {
            Some(millis) => AccessToken {
                token,
                expires_at: from_epoch_millis(millis),
            },
            None => {
                warn!("backend did not report token expiry");
                AccessToken::new(token, Self::DEFAULT_TOKEN_LIFETIME)
            }
        })
    }

    async fn revoke(&self) -> Result<()> {
        let request = self.post("auth/logout")?;
        self.call(request).await.map(drop)
    }
}
