//! Error types for the `auth-gateway` crate.
//!
//! Follows the same pattern as the other layers: a root Error struct holding an
//! error kind tree and an optional source for error chaining.

use std::error::Error as StdError;
use std::fmt;

/// Top-level error type for the auth-gateway crate.
/// Holds error kind and optional source for error chaining.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors in auth-gateway.
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    Auth(AuthErrorKind),
    Http(HttpErrorKind),
}

/// Authentication and authorization failures surfaced to callers.
#[derive(Debug, PartialEq)]
pub enum AuthErrorKind {
    /// No credential was held when one was required. Never retried.
    Unauthenticated,
    /// The backend answered 403. Never retried.
    AuthorizationDenied,
    /// A single request used up its refresh-triggered replays.
    RefreshExhausted,
    /// The shared refresh call failed; the credential has been cleared.
    RefreshFailed,
    /// A 401 arrived on a streaming body. The credential was refreshed but
    /// the request has to be resent by the caller.
    NotReplayable,
}

/// Errors from HTTP client operations.
#[derive(Debug, PartialEq)]
pub enum HttpErrorKind {
    BuilderFailed,
    RequestFailed,
    Network,
    Status(u16),
    Decode,
}

impl Error {
    /// Returns the auth error kind, if this is an authentication failure.
    pub fn auth_kind(&self) -> Option<&AuthErrorKind> {
        match &self.error_kind {
            ErrorKind::Auth(kind) => Some(kind),
            ErrorKind::Http(_) => None,
        }
    }

    /// True when the caller should treat the session as ended.
    pub fn is_session_ended(&self) -> bool {
        matches!(
            self.auth_kind(),
            Some(AuthErrorKind::RefreshFailed | AuthErrorKind::Unauthenticated)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Auth(kind) => write!(f, "Auth error: {:?}", kind)?,
            ErrorKind::Http(kind) => write!(f, "HTTP error: {:?}", kind)?,
        }
        if let Some(source) = &self.source {
            write!(f, " ({})", source)?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let error_kind = if err.is_builder() {
            ErrorKind::Http(HttpErrorKind::BuilderFailed)
        } else if err.is_decode() {
            ErrorKind::Http(HttpErrorKind::Decode)
        } else if err.is_request() {
            ErrorKind::Http(HttpErrorKind::RequestFailed)
        } else {
            ErrorKind::Http(HttpErrorKind::Network)
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

// The auth middleware reports its failures through `Error::Middleware`; unwrap
// them here so callers see the typed taxonomy again.
impl From<reqwest_middleware::Error> for Error {
    fn from(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Middleware(err) => match err.downcast::<Error>() {
                Ok(err) => err,
                Err(err) => Error {
                    source: Some(err.into()),
                    error_kind: ErrorKind::Http(HttpErrorKind::RequestFailed),
                },
            },
            reqwest_middleware::Error::Reqwest(err) => err.into(),
        }
    }
}

impl From<Error> for reqwest_middleware::Error {
    fn from(err: Error) -> Self {
        reqwest_middleware::Error::Middleware(anyhow::Error::new(err))
    }
}

/// Helper function to create auth errors.
pub fn auth_error(kind: AuthErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Auth(kind),
    }
}

/// Helper function to create HTTP errors.
pub fn http_error(kind: HttpErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Http(kind),
    }
}
