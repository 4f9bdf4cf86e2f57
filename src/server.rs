//! The local backend the desktop client talks to.
//!
//! Routes:
//!
//! | Method | Path                         | Answer                                   |
//! |--------|------------------------------|------------------------------------------|
//! | GET    | `/`                          | `{msg}`                                  |
//! | GET    | `/auth/login`                | `{authUrl, state}`                       |
//! | POST   | `/auth/callback`             | `{message, accessToken, tokenExpiry, logged}` |
//! | GET    | `/auth/refresh`              | access token as plain text               |
//! | POST   | `/auth/logout`               | `{message}`                              |
//! | POST   | `/spotify/tracks`            | upstream JSON                            |
//! | POST   | `/spotify/transfer-playback` | `{success}`                              |
//! | POST   | `/spotify/play`              | `{success}`                              |
//! | POST   | `/spotify/like`              | `{success}`                              |
//! | POST   | `/spotify/unlike`            | `{success}`                              |
//!
//! Every failure is answered with an [`ErrorBody`] and the status of
//! [`Error::status`]; no error takes the process down.

use std::{future::Future, sync::Arc};

use axum::{
    extract::{FromRequest, FromRequestParts, Query, Request, State},
    http::{request::Parts, HeaderMap, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use crate::{
    api::WebApi,
    auth::TokenExchange,
    config::Config,
    error::{Error, Result},
    tokens::{AccessToken, AuthorizationRequest},
    util::epoch_millis,
};

/// Header of `/auth/refresh` answers carrying the new token's expiry in
/// milliseconds since epoch.
pub const TOKEN_EXPIRY_HEADER: HeaderName = HeaderName::from_static("x-token-expiry");

/// Body of every failed request.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{self}");
        } else {
            debug!("{self}");
        }

        let details = self.upstream_answer().and_then(|upstream| {
            if upstream.body.is_empty() {
                None
            } else {
                // Relay JSON bodies as JSON, anything else as a string.
                Some(
                    serde_json::from_str(&upstream.body)
                        .unwrap_or_else(|_| Value::String(upstream.body.clone())),
                )
            }
        });

        let body = ErrorBody {
            error: self.public_message(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// JSON request body that answers malformed input with an [`ErrorBody`].
struct JsonBody<T>(T);

impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| Error::bad_request(rejection.body_text()))?;
        Ok(Self(value))
    }
}

/// Query string that answers malformed input with an [`ErrorBody`].
struct QueryParams<T>(T);

impl<T, S> FromRequestParts<S> for QueryParams<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| Error::bad_request(rejection.body_text()))?;
        Ok(Self(value))
    }
}

pub struct Backend {
    exchange: TokenExchange,
    api: WebApi,
}

impl Backend {
    /// # Errors
    ///
    /// Will return `Err` if the HTTP clients cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            exchange: TokenExchange::new(config)?,
            api: WebApi::new(config)?,
        })
    }

    #[must_use]
    pub fn exchange(&self) -> &TokenExchange {
        &self.exchange
    }
}

type Shared = Arc<Backend>;

pub fn router(backend: Backend) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/auth/login", get(login))
        .route("/auth/callback", post(callback))
        .route("/auth/refresh", get(refresh))
        .route("/auth/logout", post(logout))
        .route("/spotify/tracks", post(saved_tracks))
        .route("/spotify/transfer-playback", post(transfer_playback))
        .route("/spotify/play", post(play))
        .route("/spotify/like", post(like))
        .route("/spotify/unlike", post(unlike))
        .with_state(Arc::new(backend))
}

/// Serves the backend on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns `Internal` if the server fails while accepting connections.
pub async fn serve<F>(listener: TcpListener, backend: Backend, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("listening on http://{addr}");
    }

    axum::serve(listener, router(backend))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(Error::internal)
}

async fn root() -> Json<Value> {
    Json(json!({ "msg": concat!(env!("CARGO_PKG_NAME"), " is running") }))
}

async fn login(State(backend): State<Shared>) -> Result<Json<AuthorizationRequest>> {
    backend.exchange.authorize().map(Json)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct CallbackRequest {
    code: Option<String>,
    state: Option<String>,
    redirect_uri: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CallbackResponse {
    message: &'static str,
    access_token: String,
    token_expiry: u64,
    logged: bool,
}

async fn callback(
    State(backend): State<Shared>,
    JsonBody(request): JsonBody<CallbackRequest>,
) -> Result<Json<CallbackResponse>> {
    let code = request.code.unwrap_or_default();
    let state = request.state.unwrap_or_default();
    let redirect_uri = request.redirect_uri.unwrap_or_default();

    let token = backend
        .exchange
        .exchange_authorization_code(&code, &state, &redirect_uri)
        .await?
        .access_token();

    Ok(Json(CallbackResponse {
        message: "Authorization successful",
        token_expiry: epoch_millis(token.expires_at),
        access_token: token.token,
        logged: true,
    }))
}

async fn refresh(State(backend): State<Shared>) -> Result<(HeaderMap, String)> {
    let token: AccessToken = backend.exchange.exchange_refresh_token().await?.access_token();

    let mut headers = HeaderMap::new();
    headers.insert(
        TOKEN_EXPIRY_HEADER,
        HeaderValue::from(epoch_millis(token.expires_at)),
    );

    Ok((headers, token.token))
}

async fn logout(State(backend): State<Shared>) -> Result<Json<Value>> {
    backend.exchange.preferences().clear().await?;
    Ok(Json(json!({ "message": "Logout successful" })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TracksQuery {
    access_token: Option<String>,
    ids: Option<String>,
}

async fn saved_tracks(
    State(backend): State<Shared>,
    QueryParams(query): QueryParams<TracksQuery>,
) -> Result<Json<Value>> {
    let Some(access_token) = query.access_token.filter(|token| !token.is_empty()) else {
        return Err(Error::bad_request("Missing access_token parameter"));
    };
    let Some(ids) = query.ids.filter(|ids| !ids.is_empty()) else {
        return Err(Error::bad_request("Missing ids parameter"));
    };

    let ids = WebApi::parse_ids(&ids);
    backend
        .api
        .saved_tracks_contain(&access_token, &ids)
        .await
        .map(Json)
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Success {
    pub success: bool,
}

const SUCCESS: Json<Success> = Json(Success { success: true });

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct TransferRequest {
    access_token: String,
    device_id: String,
}

async fn transfer_playback(
    State(backend): State<Shared>,
    JsonBody(request): JsonBody<TransferRequest>,
) -> Result<Json<Success>> {
    backend
        .api
        .transfer_playback(&request.access_token, &request.device_id)
        .await?;
    Ok(SUCCESS)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PlayRequest {
    access_token: String,
    uris: Vec<String>,
    offset: Option<usize>,
}

async fn play(
    State(backend): State<Shared>,
    JsonBody(request): JsonBody<PlayRequest>,
) -> Result<Json<Success>> {
    backend
        .api
        .play(&request.access_token, &request.uris, request.offset)
        .await?;
    Ok(SUCCESS)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct IdsRequest {
    access_token: String,
    ids: Vec<String>,
}

async fn like(
    State(backend): State<Shared>,
    JsonBody(request): JsonBody<IdsRequest>,
) -> Result<Json<Success>> {
    backend
        .api
        .save_tracks(&request.access_token, &request.ids)
        .await?;
    Ok(SUCCESS)
}

async fn unlike(
    State(backend): State<Shared>,
    JsonBody(request): JsonBody<IdsRequest>,
) -> Result<Json<Success>> {
    backend
        .api
        .remove_tracks(&request.access_token, &request.ids)
        .await?;
    Ok(SUCCESS)
}
