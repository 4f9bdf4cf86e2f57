//! Mock accounts service and Web API, plus a backend wired to them.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    net::SocketAddr,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicU16, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use axum::{
    extract::{RawQuery, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use url::Url;

use tunebridge::{
    config::Config, credentials::Credentials, preferences::PreferenceStore, server,
};

pub const CLIENT_ID: &str = "test-client";
pub const CLIENT_SECRET: &str = "test-secret";

#[derive(Default)]
pub struct Upstream {
    pub token_requests: AtomicUsize,
    pub api_requests: AtomicUsize,

    /// Status the Web API answers with; zero for success.
    pub api_status: AtomicU16,

    /// Whether refresh grants hand out a new refresh token.
    pub rotate: AtomicBool,

    /// Milliseconds the token endpoint waits before answering.
    pub token_delay: AtomicU64,

    pub last_form: Mutex<HashMap<String, String>>,
    pub last_authorization: Mutex<Option<String>>,
    pub last_query: Mutex<Option<String>>,
    pub last_body: Mutex<Option<Value>>,
}

impl Upstream {
    pub fn fail_with(&self, status: StatusCode) {
        self.api_status.store(status.as_u16(), Ordering::SeqCst);
    }

    fn failure(&self) -> Option<Response> {
        let status = StatusCode::from_u16(self.api_status.load(Ordering::SeqCst)).ok()?;
        let body = json!({ "error": { "status": status.as_u16(), "message": "mock failure" } });
        Some((status, Json(body)).into_response())
    }

    pub fn form(&self, key: &str) -> Option<String> {
        self.last_form.lock().unwrap().get(key).cloned()
    }
}

type Shared = Arc<Upstream>;

async fn token(State(upstream): State<Shared>, headers: HeaderMap, body: String) -> Json<Value> {
    let count = upstream.token_requests.fetch_add(1, Ordering::SeqCst) + 1;

    let form: HashMap<String, String> = url::form_urlencoded::parse(body.as_bytes())
        .into_owned()
        .collect();
    let grant_type = form.get("grant_type").cloned().unwrap_or_default();
    *upstream.last_form.lock().unwrap() = form;
    *upstream.last_authorization.lock().unwrap() = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned);

    let delay = upstream.token_delay.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(delay)).await;

    let mut answer = json!({
        "access_token": format!("access-{count}"),
        "token_type": "Bearer",
        "scope": "user-library-read",
        "expires_in": 3600,
    });
    if grant_type == "authorization_code" {
        answer["refresh_token"] = json!("refresh-1");
    } else if upstream.rotate.load(Ordering::SeqCst) {
        answer["refresh_token"] = json!("refresh-rotated");
    }

    Json(answer)
}

async fn contains(State(upstream): State<Shared>, RawQuery(query): RawQuery) -> Response {
    upstream.api_requests.fetch_add(1, Ordering::SeqCst);
    *upstream.last_query.lock().unwrap() = query.clone();
    if let Some(failure) = upstream.failure() {
        return failure;
    }

    let count = query
        .as_deref()
        .and_then(|query| query.strip_prefix("ids="))
        .map_or(0, |ids| ids.split(',').count());
    Json(vec![true; count]).into_response()
}

async fn library(State(upstream): State<Shared>, RawQuery(query): RawQuery) -> Response {
    upstream.api_requests.fetch_add(1, Ordering::SeqCst);
    *upstream.last_query.lock().unwrap() = query;
    upstream
        .failure()
        .unwrap_or_else(|| StatusCode::OK.into_response())
}

async fn player(State(upstream): State<Shared>, Json(body): Json<Value>) -> Response {
    upstream.api_requests.fetch_add(1, Ordering::SeqCst);
    *upstream.last_body.lock().unwrap() = Some(body);
    upstream
        .failure()
        .unwrap_or_else(|| StatusCode::NO_CONTENT.into_response())
}

async fn spawn(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    addr
}

pub struct Harness {
    pub upstream: Shared,
    pub config: Config,
    pub backend_url: Url,
    pub preferences_file: PathBuf,
}

impl Harness {
    /// Starts a mock upstream and a backend talking to it.
    pub async fn start() -> Self {
        let upstream = Shared::default();
        let mock = Router::new()
            .route("/api/token", post(token))
            .route("/v1/me/tracks/contains", get(contains))
            .route("/v1/me/tracks", put(library).delete(library))
            .route("/v1/me/player", put(player))
            .route("/v1/me/player/play", put(player))
            .with_state(Arc::clone(&upstream));
        let upstream_addr = spawn(mock).await;

        let preferences_file =
            std::env::temp_dir().join(format!("tunebridge-{}.json", uuid::Uuid::new_v4()));

        let mut config =
            Config::with_credentials(Credentials::new(CLIENT_ID, CLIENT_SECRET)).unwrap();
        config.accounts_url = Url::parse(&format!("http://{upstream_addr}/")).unwrap();
        config.api_url = Url::parse(&format!("http://{upstream_addr}/v1/")).unwrap();
        config.preferences_file = preferences_file.clone();

        let backend = server::Backend::new(&config).unwrap();
        let backend_addr = spawn(server::router(backend)).await;

        Self {
            upstream,
            config,
            backend_url: Url::parse(&format!("http://{backend_addr}/")).unwrap(),
            preferences_file,
        }
    }

    pub fn url(&self, path: &str) -> Url {
        self.backend_url.join(path).unwrap()
    }

    pub async fn stored_refresh_token(&self) -> Option<String> {
        PreferenceStore::new(&self.preferences_file)
            .load()
            .await
            .refresh_token
    }

    /// Logs in through the backend and returns the callback answer.
    pub async fn login(&self, client: &reqwest::Client) -> Value {
        let login: Value = client
            .get(self.url("auth/login"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        client
            .post(self.url("auth/callback"))
            .json(&json!({ "code": "the-code", "state": login["state"] }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.preferences_file);
    }
}
