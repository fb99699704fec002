//! Seam between the bus client and the socket that carries it.
//!
//! The client owns lifecycle bookkeeping and subscription routing; a
//! transport owns the wire: handshake, reconnection with a fixed delay,
//! heart-beats and re-issuing subscriptions after each handshake.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::mpsc::UnboundedSender;

use crate::connection::Subscription;
use crate::error::Error;
use crate::message::TransportEvent;

/// One realtime link.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start connecting in the background. Every lifecycle change and inbound
    /// message is reported on `events`. Must return without waiting for the
    /// handshake.
    fn activate(&self, events: UnboundedSender<TransportEvent>);

    /// Stop the link and any pending reconnect.
    async fn deactivate(&self);

    /// Send a JSON text body to `destination`.
    async fn send(&self, destination: &str, body: String) -> Result<(), Error>;

    /// Start delivering messages for the subscription's topic. The transport
    /// keeps the subscription across reconnects until it is unsubscribed.
    async fn subscribe(&self, subscription: &Subscription) -> Result<(), Error>;

    async fn unsubscribe(&self, subscription: &Subscription) -> Result<(), Error>;
}

/// Builds a transport bound to the credential captured at connect time.
pub trait TransportFactory: Send + Sync {
    fn create(&self, token: SecretString) -> Arc<dyn Transport>;
}
