//! Playback control calls to the Web API.
//!
//! Each operation forwards to exactly one upstream endpoint with the
//! caller's bearer token. Parameters are validated before any request goes
//! out, and upstream failures are classified by [`Error::upstream`].

use reqwest::{Method, Url};
use serde::Serialize;
use serde_json::Value;

use crate::{
    config::Config,
    error::{Error, Result},
    http::Client as HttpClient,
};

pub struct WebApi {
    http_client: HttpClient,
    api_url: Url,
}

#[derive(Serialize)]
struct TransferBody<'a> {
    device_ids: [&'a str; 1],
}

#[derive(Serialize)]
struct PlayBody<'a> {
    uris: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<Offset>,
}

#[derive(Serialize)]
struct Offset {
    position: usize,
}

impl WebApi {
    /// Upstream ceiling on ids per library request.
    pub const MAX_IDS: usize = 50;

    const SCOPE_LIBRARY_READ: &'static str = "user-library-read";
    const SCOPE_LIBRARY_MODIFY: &'static str = "user-library-modify";
    const SCOPE_PLAYBACK: &'static str = "user-modify-playback-state";

    /// # Errors
    ///
    /// Will return `Err` if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            http_client: HttpClient::new(config)?,
            api_url: config.api_url.clone(),
        })
    }

    /// Splits a comma-separated id list, dropping blanks.
    #[must_use]
    pub fn parse_ids(ids: &str) -> Vec<String> {
        ids.split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(ToOwned::to_owned)
            .collect()
    }

    fn check_token(access_token: &str) -> Result<()> {
        if access_token.is_empty() {
            return Err(Error::bad_request("Missing access_token parameter"));
        }
        Ok(())
    }

    fn check_ids(ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Err(Error::bad_request("No valid track IDs provided"));
        }
        if ids.len() > Self::MAX_IDS {
            return Err(Error::bad_request(format!(
                "Maximum {} track IDs allowed per request",
                Self::MAX_IDS
            )));
        }
        Ok(())
    }

    /// Endpoint URL with an `ids` query of comma-joined, individually
    /// encoded ids.
    fn ids_url(&self, path: &str, ids: &[String]) -> Result<Url> {
        let mut url = self.api_url.join(path)?;
        let joined = ids
            .iter()
            .map(|id| url::form_urlencoded::byte_serialize(id.as_bytes()).collect::<String>())
            .collect::<Vec<_>>()
            .join(",");
        url.set_query(Some(&format!("ids={joined}")));
        Ok(url)
    }

    async fn call(
        &self,
        request: reqwest::RequestBuilder,
        scope: &str,
    ) -> Result<reqwest::Response> {
        let response = self.http_client.send(request).await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let err = Error::upstream(status, body, Some(scope));
        warn!("{err}");
        Err(err)
    }

    /// Checks which of `ids` are in the user's saved-tracks library.
    ///
    /// Returns the upstream JSON verbatim: an array of booleans in the order
    /// of `ids`.
    ///
    /// # Errors
    ///
    /// `BadRequest` for a missing token or an empty or oversized id list;
    /// otherwise the classified upstream failure.
    pub async fn saved_tracks_contain(&self, access_token: &str, ids: &[String]) -> Result<Value> {
        Self::check_token(access_token)?;
        Self::check_ids(ids)?;

        let url = self.ids_url("me/tracks/contains", ids)?;
        let request = self
            .http_client
            .request(Method::GET, url)
            .bearer_auth(access_token);

        let response = self.call(request, Self::SCOPE_LIBRARY_READ).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(Into::into)
    }

    /// Moves playback to `device_id`.
    ///
    /// # Errors
    ///
    /// `BadRequest` for a missing token or device id; otherwise the
    /// classified upstream failure.
    pub async fn transfer_playback(&self, access_token: &str, device_id: &str) -> Result<()> {
        Self::check_token(access_token)?;
        if device_id.is_empty() {
            return Err(Error::bad_request("Missing deviceId parameter"));
        }

        let url = self.api_url.join("me/player")?;
        let request = self
            .http_client
            .request(Method::PUT, url)
            .bearer_auth(access_token)
            .json(&TransferBody {
                device_ids: [device_id],
            });

        self.call(request, Self::SCOPE_PLAYBACK).await?;
        info!("playback transferred to device {device_id}");
        Ok(())
    }

    /// Starts playing `uris`, from the track at `offset` when given.
    ///
    /// # Errors
    ///
    /// `BadRequest` for a missing token, no uris or an offset outside of
    /// `uris`; otherwise the classified upstream failure.
    pub async fn play(
        &self,
        access_token: &str,
        uris: &[String],
        offset: Option<usize>,
    ) -> Result<()> {
        Self::check_token(access_token)?;
        if uris.is_empty() {
            return Err(Error::bad_request("Missing uris parameter"));
        }
        if offset.is_some_and(|position| position >= uris.len()) {
            return Err(Error::bad_request("Offset outside of uris"));
        }

        let url = self.api_url.join("me/player/play")?;
        let request = self
            .http_client
            .request(Method::PUT, url)
            .bearer_auth(access_token)
            .json(&PlayBody {
                uris,
                offset: offset.map(|position| Offset { position }),
            });

        self.call(request, Self::SCOPE_PLAYBACK).await?;
        Ok(())
    }

    /// Adds tracks to the user's library.
    ///
    /// # Errors
    ///
    /// As [`saved_tracks_contain`](Self::saved_tracks_contain).
    pub async fn save_tracks(&self, access_token: &str, ids: &[String]) -> Result<()> {
        self.modify_library(Method::PUT, access_token, ids).await
    }

    /// Removes tracks from the user's library.
    ///
    /// # Errors
    ///
    /// As [`saved_tracks_contain`](Self::saved_tracks_contain).
    pub async fn remove_tracks(&self, access_token: &str, ids: &[String]) -> Result<()> {
        self.modify_library(Method::DELETE, access_token, ids).await
    }

    async fn modify_library(
        &self,
        method: Method,
        access_token: &str,
        ids: &[String],
    ) -> Result<()> {
        Self::check_token(access_token)?;
        Self::check_ids(ids)?;

        let url = self.ids_url("me/tracks", ids)?;
        let request = self
            .http_client
            .request(method, url)
            .bearer_auth(access_token);

        self.call(request, Self::SCOPE_LIBRARY_MODIFY).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{credentials::Credentials, error::ErrorKind};

    fn api() -> WebApi {
        // Unroutable, so any request that slips through validation fails
        // with `UpstreamUnreachable` instead of `BadRequest`.
        let mut config = Config::with_credentials(Credentials::default()).unwrap();
        config.api_url = Url::parse("http://127.0.0.1:9/v1/").unwrap();
        WebApi::new(&config).unwrap()
    }

    fn ids(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("track{i}")).collect()
    }

    #[test]
    fn parses_comma_separated_ids() {
        assert_eq!(WebApi::parse_ids(" a, b,,c ,"), vec!["a", "b", "c"]);
        assert!(WebApi::parse_ids(" , ").is_empty());
    }

    #[test]
    fn ids_are_comma_joined_under_api_base() {
        let url = api().ids_url("me/tracks/contains", &ids(3)).unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:9/v1/me/tracks/contains?ids=track0,track1,track2"
        );
    }

    #[tokio::test]
    async fn oversized_id_list_is_rejected_locally() {
        let err = api()
            .saved_tracks_contain("token", &ids(WebApi::MAX_IDS + 1))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn missing_parameters_are_rejected_locally() {
        let api = api();

        let err = api.saved_tracks_contain("", &ids(1)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);

        let err = api.saved_tracks_contain("token", &[]).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);

        let err = api.transfer_playback("token", "").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);

        let err = api.play("token", &ids(2), Some(2)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);

        let err = api.remove_tracks("", &ids(1)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
    }
}
