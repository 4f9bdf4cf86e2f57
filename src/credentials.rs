//! Client credentials for the remote OAuth provider.
//!
//! The client id and secret identify this application to the accounts
//! service. They are read from a TOML secrets file:
//!
//! ```toml
//! client_id = "0123456789abcdef0123456789abcdef"
//! client_secret = "fedcba9876543210fedcba9876543210"
//! ```
//!
//! Either value may also be supplied on the command line or through the
//! environment, which takes precedence over the file.

use std::{fs, path::Path};

use base64::prelude::*;
use serde::Deserialize;
use veil::Redact;

use crate::error::{Error, Result};

/// Client id and secret as registered with the accounts service.
///
/// Both halves are optional so that a half-configured application can still
/// start; operations that need a missing half fail with
/// [`ErrorKind::ConfigurationMissing`](crate::error::ErrorKind::ConfigurationMissing).
#[derive(Clone, Default, Deserialize, Redact, PartialEq, Eq, Hash)]
pub struct Credentials {
    /// Public client identifier.
    pub client_id: Option<String>,

    /// Client secret. Redacted in debug output.
    #[redact]
    pub client_secret: Option<String>,
}

impl Credentials {
    /// Secrets files larger than this are rejected unread.
    const MAX_FILE_SIZE: u64 = 1024;

    #[must_use]
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: Some(client_id.into()),
            client_secret: Some(client_secret.into()),
        }
    }

    /// Loads credentials from a TOML secrets file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationMissing` if the file cannot be read, is too
    /// large or is not valid TOML.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let unreadable =
            |e: std::io::Error| Error::configuration_missing(format!("{}: {e}", path.display()));

        // Prevent out-of-memory condition: secrets file should be small.
        let file_size = fs::metadata(path).map_err(unreadable)?.len();
        if file_size > Self::MAX_FILE_SIZE {
            return Err(Error::configuration_missing(format!(
                "{} is too large",
                path.display()
            )));
        }

        let contents = fs::read_to_string(path).map_err(unreadable)?;
        toml::from_str(&contents).map_err(Into::into)
    }

    /// Overlays the values that are present in `other`.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            client_id: other.client_id.or(self.client_id),
            client_secret: other.client_secret.or(self.client_secret),
        }
    }

    /// The client id, required to build authorization URLs.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationMissing` when no client id is configured.
    pub fn client_id(&self) -> Result<&str> {
        self.client_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::configuration_missing("Spotify client ID not configured"))
    }

    /// The `Authorization` header value for token requests:
    /// `Basic base64(client_id:client_secret)`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationMissing` unless both halves are configured.
    pub fn basic_auth(&self) -> Result<String> {
        match (self.client_id.as_deref(), self.client_secret.as_deref()) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
                let encoded = BASE64_STANDARD.encode(format!("{id}:{secret}"));
                Ok(format!("Basic {encoded}"))
            }
            _ => Err(Error::configuration_missing(
                "SPOTIFY_CLIENT_ID or SPOTIFY_CLIENT_SECRET not configured",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn basic_auth_encodes_id_and_secret() {
        let credentials = Credentials::new("id", "secret");
        // base64("id:secret")
        assert_eq!(credentials.basic_auth().unwrap(), "Basic aWQ6c2VjcmV0");
    }

    #[test]
    fn basic_auth_requires_both_halves() {
        let credentials = Credentials {
            client_id: Some("id".to_string()),
            client_secret: None,
        };
        let err = credentials.basic_auth().unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConfigurationMissing);
        assert_eq!(credentials.client_id().unwrap(), "id");
    }

    #[test]
    fn merge_prefers_present_overrides() {
        let file = Credentials::new("file-id", "file-secret");
        let env = Credentials {
            client_id: Some("env-id".to_string()),
            client_secret: None,
        };

        let merged = file.merge(env);
        assert_eq!(merged.client_id.as_deref(), Some("env-id"));
        assert_eq!(merged.client_secret.as_deref(), Some("file-secret"));
    }

    #[test]
    fn debug_output_redacts_secret() {
        let credentials = Credentials::new("id", "hunter2");
        assert!(!format!("{credentials:?}").contains("hunter2"));
    }

    #[test]
    fn parses_secrets_file() {
        let path = std::env::temp_dir().join(format!("tunebridge-{}.toml", uuid::Uuid::new_v4()));
        fs::write(&path, "client_id = \"abc\"\nclient_secret = \"def\"\n").unwrap();

        let credentials = Credentials::from_file(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(credentials, Credentials::new("abc", "def"));
    }
}
