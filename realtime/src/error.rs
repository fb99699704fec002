//! Error types for the `realtime` crate.

use std::error::Error as StdError;
use std::fmt;

/// Top-level error type for the realtime crate.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: BusErrorKind,
}

/// Kinds of failure on the realtime bus.
#[derive(Debug, PartialEq)]
pub enum BusErrorKind {
    /// No credential was held when a connection was requested.
    Unauthenticated,
    /// The operation needs a connection object and there is none.
    NotConnected,
    /// Socket-level failure, including heart-beat timeouts.
    Transport,
    /// The peer sent something that is not valid STOMP.
    Protocol,
    Serialization,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Realtime error: {:?}", self.error_kind)?;
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

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: BusErrorKind::Transport,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: BusErrorKind::Serialization,
        }
    }
}

/// Helper function to create realtime errors.
pub fn bus_error(kind: BusErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: kind,
    }
}
