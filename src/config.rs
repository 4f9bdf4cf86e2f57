use std::path::PathBuf;

use url::Url;

use crate::{credentials::Credentials, error::Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub app_name: String,
    pub app_version: String,

    pub user_agent: String,

    pub credentials: Credentials,

    /// Base of the accounts service, hosting `/authorize` and `/api/token`.
    pub accounts_url: Url,

    /// Base of the Web API, e.g. `https://api.spotify.com/v1/`.
    pub api_url: Url,

    /// Where the accounts service sends the user after consent.
    pub redirect_uri: Url,

    /// Permissions requested during authorization.
    pub scopes: Vec<String>,

    /// JSON file holding the refresh credential.
    pub preferences_file: PathBuf,
}

impl Config {
    pub const ACCOUNTS_URL: &'static str = "https://accounts.spotify.com/";
    pub const API_URL: &'static str = "https://api.spotify.com/v1/";
    pub const REDIRECT_URI: &'static str = "http://localhost:3001/callback";
    pub const PREFERENCES_FILE: &'static str = "user-preferences.json";

    /// Permissions needed for playback control and library access.
    pub const SCOPES: [&'static str; 10] = [
        "user-read-private",
        "user-read-email",
        "user-modify-playback-state",
        "streaming",
        "user-read-playback-state",
        "user-library-read",
        "playlist-read-private",
        "playlist-read-collaborative",
        "user-top-read",
        "user-library-modify",
    ];

    /// Creates a configuration pointing at the production service.
    ///
    /// # Errors
    ///
    /// Will return `Err` if any of the built-in URLs fails to parse.
    pub fn with_credentials(credentials: Credentials) -> Result<Self> {
        let app_name = env!("CARGO_PKG_NAME").to_owned();
        let app_version = env!("CARGO_PKG_VERSION").to_owned();

        let os_name = match std::env::consts::OS {
            "macos" => "osx",
            other => other,
        };
        let user_agent = format!("{app_name}/{app_version} (Rust; {os_name}; Desktop)");
        trace!("user agent: {user_agent}");

        Ok(Self {
            app_name,
            app_version,
            user_agent,
            credentials,
            accounts_url: Url::parse(Self::ACCOUNTS_URL)?,
            api_url: Url::parse(Self::API_URL)?,
            redirect_uri: Url::parse(Self::REDIRECT_URI)?,
            scopes: Self::SCOPES.iter().map(ToString::to_string).collect(),
            preferences_file: PathBuf::from(Self::PREFERENCES_FILE),
        })
    }

    /// The space-joined scope list.
    #[must_use]
    pub fn scope(&self) -> String {
        self.scopes.join(" ")
    }
}
