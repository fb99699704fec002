use std::fmt;

/// Lifecycle of the single logical bus connection.
///
/// `Disconnected` is only re-entered through an explicit disconnect; transport
/// failures put the connection back into `Connecting` while the transport
/// retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// What a transport reports back to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Handshake completed (initially or after a reconnect).
    Connected,
    /// The peer closed the link; the transport will retry.
    Disconnected,
    /// Socket or heart-beat failure; the transport will retry.
    Error(String),
    /// A message arrived on `destination` with a JSON text body.
    Message { destination: String, body: String },
}
