//! Error handling for tunebridge.
//!
//! Provides a unified error type whose categories map one-to-one onto the
//! HTTP statuses the local backend answers with.
//!
//! # Error Categories
//!
//! * Configuration (500): client credentials missing
//! * Caller errors (400): missing or invalid parameters, no stored credential
//! * Upstream outcomes (401, 403, 429, relayed): what the Web API answered
//! * Infrastructure (500): unreachable upstream, persistence, internal
//!
//! # Example
//!
//! ```rust
//! use tunebridge::error::{Error, ErrorKind, Result};
//!
//! fn check(ids: &[String]) -> Result<()> {
//!     if ids.is_empty() {
//!         return Err(Error::bad_request("no valid track ids provided"));
//!     }
//!     Ok(())
//! }
//! ```

use std::fmt;

use http::StatusCode;
use thiserror::Error;

/// Main error type combining error kind and details.
#[derive(Debug)]
pub struct Error {
    /// Classification of the error
    pub kind: ErrorKind,

    /// Details of the underlying error
    pub error: Box<dyn std::error::Error + Send + Sync>,
}

/// Standard result type for tunebridge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories of the session and proxy layers.
///
/// Each variant maps to the HTTP status that the local backend returns for
/// it; see [`Error::status`].
#[expect(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Eq, Error, Hash, Ord, PartialEq, PartialOrd)]
pub enum ErrorKind {
    /// HTTP Mapping: 500 Internal Server Error
    #[error("configuration missing")]
    ConfigurationMissing,

    /// HTTP Mapping: 400 Bad Request
    #[error("bad request")]
    BadRequest,

    /// HTTP Mapping: 400 Bad Request
    #[error("no stored credential")]
    NoStoredCredential,

    /// HTTP Mapping: 401 Unauthorized
    #[error("invalid token")]
    InvalidToken,

    /// HTTP Mapping: 403 Forbidden
    #[error("insufficient scope")]
    InsufficientScope,

    /// HTTP Mapping: 429 Too Many Requests
    #[error("rate limited")]
    RateLimited,

    /// HTTP Mapping: relays the upstream status
    #[error("upstream rejected request")]
    UpstreamRejected,

    /// HTTP Mapping: 500 Internal Server Error
    #[error("upstream unreachable")]
    UpstreamUnreachable,

    /// HTTP Mapping: 500 Internal Server Error
    #[error("persistence failure")]
    PersistenceFailure,

    /// HTTP Mapping: 500 Internal Server Error
    #[error("internal error")]
    Internal,
}

/// A non-success answer from the remote service.
///
/// Carried as the underlying error of upstream-classified errors so that the
/// original status and body can be relayed verbatim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Upstream {
    /// Human readable summary shown to the caller.
    pub message: String,

    /// Status the remote service answered with.
    pub status: StatusCode,

    /// Response body, unparsed.
    pub body: String,
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.status)
    }
}

impl std::error::Error for Upstream {}

impl Error {
    /// Creates a new error with specified kind and details.
    pub fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind,
            error: error.into(),
        }
    }

    /// Creates an error for absent client configuration.
    ///
    /// Fatal for the request at hand, never for the process.
    pub fn configuration_missing<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::ConfigurationMissing, error)
    }

    /// Creates an error for missing or invalid caller-supplied parameters.
    ///
    /// Raised before any network call is made.
    pub fn bad_request<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::BadRequest, error)
    }

    /// Creates an error for a refresh attempted without a stored credential.
    pub fn no_stored_credential<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::NoStoredCredential, error)
    }

    /// Creates an error for network-level failures talking upstream.
    pub fn upstream_unreachable<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::UpstreamUnreachable, error)
    }

    /// Creates an error for failing to write durable state.
    pub fn persistence_failure<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::PersistenceFailure, error)
    }

    /// Creates an error for unexpected internal conditions.
    pub fn internal<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Internal, error)
    }

    /// Creates an error out of a non-success upstream answer.
    ///
    /// The status picks the kind:
    /// * 401 -> [`ErrorKind::InvalidToken`]
    /// * 403 -> [`ErrorKind::InsufficientScope`]
    /// * 429 -> [`ErrorKind::RateLimited`]
    /// * anything else -> [`ErrorKind::UpstreamRejected`]
    ///
    /// `scope` names the permission the endpoint requires and is mentioned
    /// in the 403 message.
    #[must_use]
    pub fn upstream(status: StatusCode, body: String, scope: Option<&str>) -> Self {
        let (kind, message) = match status {
            StatusCode::UNAUTHORIZED => (
                ErrorKind::InvalidToken,
                "Invalid or expired access token".to_string(),
            ),
            StatusCode::FORBIDDEN => (
                ErrorKind::InsufficientScope,
                match scope {
                    Some(scope) => format!("Insufficient permissions. Required scope: {scope}"),
                    None => "Insufficient permissions".to_string(),
                },
            ),
            StatusCode::TOO_MANY_REQUESTS => (
                ErrorKind::RateLimited,
                "Rate limit exceeded. Please try again later.".to_string(),
            ),
            _ => return Self::upstream_rejected("Spotify API error", status, body),
        };

        Self::new(
            kind,
            Upstream {
                message,
                status,
                body,
            },
        )
    }

    /// Creates an error for a non-success upstream answer whose status is
    /// relayed as-is.
    #[must_use]
    pub fn upstream_rejected(message: impl Into<String>, status: StatusCode, body: String) -> Self {
        Self::new(
            ErrorKind::UpstreamRejected,
            Upstream {
                message: message.into(),
                status,
                body,
            },
        )
    }

    /// Attempts to downcast the underlying error to a concrete type.
    #[must_use]
    pub fn downcast<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.error.downcast_ref::<E>()
    }

    /// The upstream answer behind this error, if any.
    #[must_use]
    pub fn upstream_answer(&self) -> Option<&Upstream> {
        self.downcast::<Upstream>()
    }

    /// HTTP status the local backend answers with for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self.kind {
            ErrorKind::BadRequest | ErrorKind::NoStoredCredential => StatusCode::BAD_REQUEST,
            ErrorKind::InvalidToken => StatusCode::UNAUTHORIZED,
            ErrorKind::InsufficientScope => StatusCode::FORBIDDEN,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::UpstreamRejected => self
                .upstream_answer()
                .map_or(StatusCode::BAD_GATEWAY, |upstream| upstream.status),
            ErrorKind::ConfigurationMissing
            | ErrorKind::UpstreamUnreachable
            | ErrorKind::PersistenceFailure
            | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message suitable for showing to the caller.
    ///
    /// Network failures are reported generically; their details only go to
    /// the log.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self.kind {
            ErrorKind::UpstreamUnreachable => "Upstream service unreachable".to_string(),
            _ => match self.upstream_answer() {
                Some(upstream) => upstream.message.clone(),
                None => self.error.to_string(),
            },
        }
    }
}

/// Returns the underlying error source.
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

/// Formats the error for display as "{kind}: {details}".
impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: ", self.kind)?;
        self.error.fmt(fmt)
    }
}

/// Converts IO errors.
///
/// Reads are handled where they happen (a missing preference file is not an
/// error), so whatever IO error bubbles up stems from writing state.
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::persistence_failure(err)
    }
}

/// Converts HTTP client errors into appropriate error kinds.
///
/// * Connect, timeout and request errors -> `UpstreamUnreachable`
/// * Decode and body errors -> `Internal`
/// * Builder errors -> `Internal`
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() || err.is_body() || err.is_builder() {
            return Self::internal(err);
        }

        if let Some(status) = err.status() {
            return Self::upstream(status, err.to_string(), None);
        }

        Self::upstream_unreachable(err)
    }
}

/// Converts JSON errors to `Internal`.
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(err)
    }
}

/// Converts TOML errors to `ConfigurationMissing`.
impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::configuration_missing(err)
    }
}

/// Converts URL parsing errors to `Internal`.
impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::internal(e.to_string())
    }
}

/// Converts mutex poisoning errors to `Internal`.
impl<T> From<std::sync::PoisonError<std::sync::MutexGuard<'_, T>>> for Error {
    fn from(e: std::sync::PoisonError<std::sync::MutexGuard<'_, T>>) -> Self {
        Self::internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_statuses_map_to_distinct_kinds() {
        let unauthorized = Error::upstream(StatusCode::UNAUTHORIZED, String::new(), None);
        let forbidden = Error::upstream(
            StatusCode::FORBIDDEN,
            String::new(),
            Some("user-library-read"),
        );
        let limited = Error::upstream(StatusCode::TOO_MANY_REQUESTS, String::new(), None);

        assert_eq!(unauthorized.kind, ErrorKind::InvalidToken);
        assert_eq!(unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(forbidden.kind, ErrorKind::InsufficientScope);
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(limited.kind, ErrorKind::RateLimited);
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);

        let messages = [
            unauthorized.public_message(),
            forbidden.public_message(),
            limited.public_message(),
        ];
        assert_ne!(messages[0], messages[1]);
        assert_ne!(messages[1], messages[2]);
        assert!(messages[1].contains("user-library-read"));
    }

    #[test]
    fn rejected_relays_upstream_status_and_body() {
        let err = Error::upstream(
            StatusCode::NOT_FOUND,
            r#"{"error":"not found"}"#.to_string(),
            None,
        );

        assert_eq!(err.kind, ErrorKind::UpstreamRejected);
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            err.upstream_answer().map(|u| u.body.as_str()),
            Some(r#"{"error":"not found"}"#)
        );
    }

    #[test]
    fn local_kinds_have_fixed_statuses() {
        assert_eq!(Error::bad_request("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            Error::no_stored_credential("x").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::configuration_missing("x").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            Error::persistence_failure("x").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn unreachable_hides_details() {
        let err = Error::upstream_unreachable("dns error: no such host accounts.internal");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.public_message().contains("accounts.internal"));
    }
}
