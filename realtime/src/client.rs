use crate::connection::{Subscription, SubscriptionRegistry};
use crate::error::{bus_error, BusErrorKind, Error};
use crate::message::{ConnectionState, TransportEvent};
use crate::observer::{lock, ObserverHandle, ObserverList};
use crate::transport::{Transport, TransportFactory};
use auth_gateway::CredentialStore;
use log::*;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Realtime bus client: one logical connection, topic subscriptions
/// multiplexed over it, and lifecycle observers.
///
/// Construct once at startup and hand out clones; every clone drives the same
/// connection.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct Connection {
    transport: Arc<dyn Transport>,
    pump: JoinHandle<()>,
}

struct Inner {
    credentials: CredentialStore,
    factory: Arc<dyn TransportFactory>,
    /// Also serializes state changes against `on_connect` registration.
    state: StdMutex<ConnectionState>,
    /// Bumped on every connect and disconnect; events from an older
    /// connection are ignored.
    generation: AtomicU64,
    connection: Mutex<Option<Connection>>,
    subscriptions: SubscriptionRegistry,
    on_connect: ObserverList<()>,
    on_disconnect: ObserverList<()>,
    on_error: ObserverList<String>,
}

impl Client {
    pub fn new(credentials: CredentialStore, factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            inner: Arc::new(Inner {
                credentials,
                factory,
                state: StdMutex::new(ConnectionState::Disconnected),
                generation: AtomicU64::new(0),
                connection: Mutex::new(None),
                subscriptions: SubscriptionRegistry::new(),
                on_connect: ObserverList::new(),
                on_disconnect: ObserverList::new(),
                on_error: ObserverList::new(),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Activate the connection if there is none yet.
    ///
    /// The credential is read once here and bound to the new transport. Returns
    /// as soon as the transport is activated; handshake progress is reported to
    /// the `on_connect` / `on_error` observers. Calling this while a connection
    /// object exists reuses it and starts no new handshake.
    pub async fn connect(&self) -> Result<(), Error> {
        let mut connection = self.inner.connection.lock().await;
        if connection.is_some() {
            debug!("Realtime connection already exists, reusing it");
            return Ok(());
        }

        let token = self.inner.credentials.get().await.ok_or_else(|| {
            bus_error(
                BusErrorKind::Unauthenticated,
                "Cannot connect to the realtime bus without a credential",
            )
        })?;

        let transport = self.inner.factory.create(token);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (generation, _) = self.inner.advance(ConnectionState::Connecting);
        let pump = tokio::spawn(pump_events(
            Arc::downgrade(&self.inner),
            generation,
            events_rx,
        ));
        transport.activate(events_tx);

        *connection = Some(Connection { transport, pump });
        info!("Realtime connection activated");
        Ok(())
    }

    /// Tear down the transport and forget every subscription.
    ///
    /// Safe to call whether or not a connection exists. A later `connect()`
    /// builds a fresh transport.
    pub async fn disconnect(&self) {
        let mut guard = self.inner.connection.lock().await;
        let (_, previous) = self.inner.advance(ConnectionState::Disconnected);
        self.inner.subscriptions.clear();

        if let Some(connection) = guard.take() {
            connection.pump.abort();
            connection.transport.deactivate().await;
            info!("Realtime connection closed");
        }
        drop(guard);

        if previous != ConnectionState::Disconnected {
            self.inner.on_disconnect.notify(&());
        }
    }

    /// Serialize `payload` as JSON and send it to `topic`.
    ///
    /// Messages published while not connected are logged and dropped, never
    /// queued; check [`Client::is_connected`] before relying on delivery.
    pub async fn publish<T: Serialize + ?Sized>(&self, topic: &str, payload: &T) {
        if !self.is_connected() {
            error!(
                "Cannot publish to {topic}: realtime bus is {}",
                self.state()
            );
            return;
        }

        let body = match serde_json::to_string(payload) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize payload for {topic}: {e}");
                return;
            }
        };

        let transport = self
            .inner
            .connection
            .lock()
            .await
            .as_ref()
            .map(|c| Arc::clone(&c.transport));

        match transport {
            Some(transport) => {
                if let Err(e) = transport.send(topic, body).await {
                    error!("Failed to publish to {topic}: {e}");
                }
            }
            None => error!("Cannot publish to {topic}: connection was torn down"),
        }
    }

    /// Subscribe `handler` to `topic`.
    ///
    /// A topic that is already subscribed returns the existing subscription and
    /// `handler` is dropped, so no message is ever delivered twice. Handlers
    /// receive the decoded JSON payload of each message until the topic is
    /// unsubscribed or the connection is torn down.
    pub async fn subscribe<F>(&self, topic: &str, handler: F) -> Result<Subscription, Error>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let guard = self.inner.connection.lock().await;
        let Some(connection) = guard.as_ref() else {
            return Err(bus_error(
                BusErrorKind::NotConnected,
                &format!("Cannot subscribe to {topic} before connect()"),
            ));
        };

        let (subscription, created) = self
            .inner
            .subscriptions
            .insert_if_absent(topic, Arc::new(handler));
        if !created {
            debug!("Already subscribed to {topic}, reusing subscription");
            return Ok(subscription);
        }

        if let Err(e) = connection.transport.subscribe(&subscription).await {
            self.inner.subscriptions.remove(topic);
            return Err(e);
        }

        debug!(
            "Subscribed to {topic} ({})",
            subscription.id().as_str()
        );
        Ok(subscription)
    }

    /// Remove the subscription for `topic`, if there is one.
    pub async fn unsubscribe(&self, topic: &str) {
        let guard = self.inner.connection.lock().await;
        let Some(subscription) = self.inner.subscriptions.remove(topic) else {
            debug!("Not subscribed to {topic}, nothing to remove");
            return;
        };

        if let Some(connection) = guard.as_ref() {
            if let Err(e) = connection.transport.unsubscribe(&subscription).await {
                warn!("Failed to detach subscription for {topic}: {e}");
            }
        }
        debug!("Unsubscribed from {topic}");
    }

    /// Current subscription for `topic`, if any.
    pub fn subscription(&self, topic: &str) -> Option<Subscription> {
        self.inner.subscriptions.get(topic)
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.inner.subscriptions.subscriptions()
    }

    /// Observe successful handshakes, including reconnects.
    ///
    /// When the bus is already connected the observer is also invoked once,
    /// immediately.
    pub fn on_connect<F>(&self, observer: F) -> ObserverHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        let observer = Arc::new(observer);
        let registered = Arc::clone(&observer);

        let (handle, connected) = {
            let state = lock(&self.inner.state);
            let handle = self
                .inner
                .on_connect
                .register(Arc::new(move |_: &()| registered()));
            (handle, *state == ConnectionState::Connected)
        };

        if connected {
            observer();
        }
        handle
    }

    /// Observe loss of the connection, whether from the peer or `disconnect()`.
    pub fn on_disconnect<F>(&self, observer: F) -> ObserverHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner
            .on_disconnect
            .register(Arc::new(move |_: &()| observer()))
    }

    /// Observe transport failures. The transport keeps retrying on its own.
    pub fn on_error<F>(&self, observer: F) -> ObserverHandle
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner
            .on_error
            .register(Arc::new(move |detail: &String| observer(detail.as_str())))
    }
}

impl Inner {
    fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    /// Start a new connection generation in `state`. Returns the generation
    /// and the previous state.
    fn advance(&self, state: ConnectionState) -> (u64, ConnectionState) {
        let mut current = lock(&self.state);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        (generation, std::mem::replace(&mut *current, state))
    }

    /// Move to `state` on behalf of `generation`. Returns the previous state,
    /// or `None` when that generation has been torn down.
    fn transition(&self, generation: u64, state: ConnectionState) -> Option<ConnectionState> {
        let mut current = lock(&self.state);
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("Ignoring event from a torn down connection");
            return None;
        }
        Some(std::mem::replace(&mut *current, state))
    }

    fn handle_event(&self, generation: u64, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                let observers = {
                    let mut current = lock(&self.state);
                    if self.generation.load(Ordering::SeqCst) != generation {
                        debug!("Ignoring handshake from a torn down connection");
                        return;
                    }
                    *current = ConnectionState::Connected;
                    self.on_connect.snapshot()
                };
                info!("Realtime bus connected");
                for observer in observers {
                    observer(&());
                }
            }
            TransportEvent::Disconnected => {
                let Some(previous) = self.transition(generation, ConnectionState::Connecting)
                else {
                    return;
                };
                warn!("Realtime bus connection lost; transport will reconnect");
                if previous == ConnectionState::Connected {
                    self.on_disconnect.notify(&());
                }
            }
            TransportEvent::Error(detail) => {
                if self
                    .transition(generation, ConnectionState::Connecting)
                    .is_none()
                {
                    return;
                }
                error!("Realtime transport error: {detail}");
                self.on_error.notify(&detail);
            }
            TransportEvent::Message { destination, body } => {
                if self.generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                match serde_json::from_str::<Value>(&body) {
                    Ok(payload) => {
                        self.subscriptions.dispatch(&destination, payload);
                    }
                    Err(e) => warn!("Dropping non-JSON message on {destination}: {e}"),
                }
            }
        }
    }
}

async fn pump_events(
    inner: Weak<Inner>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_event(generation, event);
    }
    debug!("Transport event stream ended");
}
