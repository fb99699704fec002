//! Realtime bus client: topic publish/subscribe over one authenticated
//! connection.
//!
//! # Architecture
//!
//! - **One logical connection**: [`Client::connect`] is idempotent. While a
//!   connection object exists, further calls reuse it and start no new
//!   handshake.
//! - **Credential bound at connect time**: the bearer token is read once from
//!   the shared [`CredentialStore`](auth_gateway::CredentialStore) and handed to
//!   the transport. A refreshed token takes effect on the next `connect()`.
//! - **Topic-keyed registry**: at most one subscription per topic, held in a
//!   DashMap. Subscribing twice returns the existing subscription.
//! - **Transport seam**: the [`Transport`] trait carries frames; the
//!   [`stomp`] module provides STOMP 1.2 over WebSocket with fixed-delay
//!   reconnect, heart-beats, and resubscription after every handshake.
//! - **Ephemeral publishes**: messages published while not connected are logged
//!   and dropped.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use realtime::stomp::{StompConfig, StompTransportFactory};
//!
//! let factory = StompTransportFactory::new(StompConfig {
//!     url: "wss://chat.example.com/ws".to_string(),
//!     ..Default::default()
//! });
//! let bus = realtime::Client::new(credentials.clone(), Arc::new(factory));
//!
//! bus.on_connect(|| log::info!("bus up"));
//! bus.connect().await?;
//! bus.subscribe("/topic/room.1", |payload| println!("{payload}")).await?;
//! bus.publish("/app/room.1", &serde_json::json!({ "text": "hi" })).await;
//! ```
//!
//! # Modules
//!
//! - `client`: connection lifecycle, publish/subscribe and observers
//! - `connection`: subscription ids and the topic registry
//! - `observer`: ordered observer lists with removal handles
//! - `stomp`: STOMP frame codec and WebSocket transport
//! - `transport`: the transport seam

pub mod client;
pub mod connection;
pub mod error;
pub mod message;
pub mod observer;
pub mod stomp;
pub mod transport;

pub use client::Client;
pub use connection::{Subscription, SubscriptionId};
pub use error::{BusErrorKind, Error};
pub use message::{ConnectionState, TransportEvent};
pub use observer::ObserverHandle;
pub use transport::{Transport, TransportFactory};
