use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use log::*;
use secrecy::SecretString;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, sleep_until, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::frame::{Command, Frame, HeartBeat};
use crate::connection::Subscription;
use crate::error::{bus_error, BusErrorKind, Error};
use crate::message::TransportEvent;
use crate::observer::lock;
use crate::transport::{Transport, TransportFactory};

/// Silence tolerated from the server, as a multiple of the negotiated period.
const INCOMING_GRACE: u32 = 2;

#[derive(Debug, Clone)]
pub struct StompConfig {
    /// WebSocket endpoint, e.g. `wss://chat.example.com/ws`
    pub url: String,
    /// Fixed wait between reconnect attempts
    pub reconnect_delay: Duration,
    /// Requested heart-beat period in both directions; zero disables
    pub heartbeat: Duration,
    /// Bound on the socket upgrade and on waiting for `CONNECTED`
    pub handshake_timeout: Duration,
}

impl Default for StompConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8080/ws".to_string(),
            reconnect_delay: Duration::from_millis(5000),
            heartbeat: Duration::from_millis(10_000),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// Builds a [`StompTransport`] per connection.
#[derive(Debug, Clone)]
pub struct StompTransportFactory {
    config: StompConfig,
}

impl StompTransportFactory {
    pub fn new(config: StompConfig) -> Self {
        Self { config }
    }
}

impl TransportFactory for StompTransportFactory {
    fn create(&self, token: SecretString) -> Arc<dyn Transport> {
        Arc::new(StompTransport::new(self.config.clone(), token))
    }
}

/// STOMP 1.2 over a WebSocket, reconnecting with a fixed delay until
/// deactivated.
pub struct StompTransport {
    shared: Arc<Shared>,
    commands: StdMutex<Option<mpsc::UnboundedReceiver<Frame>>>,
    task: StdMutex<Option<JoinHandle<()>>>,
}

struct Shared {
    config: StompConfig,
    token: SecretString,
    /// Subscription id to destination; replayed after every handshake.
    destinations: DashMap<String, String>,
    connected: AtomicBool,
    outbound: mpsc::UnboundedSender<Frame>,
    shutdown: watch::Sender<bool>,
}

enum SessionEnd {
    Shutdown,
    Closed,
}

impl StompTransport {
    pub fn new(config: StompConfig, token: SecretString) -> Self {
        let (outbound, commands) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                config,
                token,
                destinations: DashMap::new(),
                connected: AtomicBool::new(false),
                outbound,
                shutdown,
            }),
            commands: StdMutex::new(Some(commands)),
            task: StdMutex::new(None),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn push(&self, frame: Frame) -> Result<(), Error> {
        self.shared.outbound.send(frame).map_err(|_| {
            bus_error(BusErrorKind::Transport, "STOMP session is no longer running")
        })
    }
}

#[async_trait]
impl Transport for StompTransport {
    fn activate(&self, events: mpsc::UnboundedSender<TransportEvent>) {
        let Some(commands) = lock(&self.commands).take() else {
            warn!("STOMP transport already activated");
            return;
        };
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move { shared.run(commands, events).await });
        *lock(&self.task) = Some(handle);
    }

    async fn deactivate(&self) {
        self.shared.shutdown.send_replace(true);
        let handle = lock(&self.task).take();
        if let Some(mut handle) = handle {
            if timeout(self.shared.config.handshake_timeout, &mut handle)
                .await
                .is_err()
            {
                warn!("STOMP session did not stop in time, aborting it");
                handle.abort();
            }
        }
        self.shared.connected.store(false, Ordering::SeqCst);
    }

    async fn send(&self, destination: &str, body: String) -> Result<(), Error> {
        if !self.is_connected() {
            return Err(bus_error(
                BusErrorKind::NotConnected,
                &format!("Cannot send to {destination} while the STOMP session is down"),
            ));
        }
        self.push(Frame::send(destination, body))
    }

    async fn subscribe(&self, subscription: &Subscription) -> Result<(), Error> {
        let id = subscription.id().as_str();
        self.shared
            .destinations
            .insert(id.to_string(), subscription.topic().to_string());
        if self.is_connected() {
            self.push(Frame::subscribe(id, subscription.topic()))?;
        }
        Ok(())
    }

    async fn unsubscribe(&self, subscription: &Subscription) -> Result<(), Error> {
        let id = subscription.id().as_str();
        if self.shared.destinations.remove(id).is_some() && self.is_connected() {
            self.push(Frame::unsubscribe(id))?;
        }
        Ok(())
    }
}

// Dropping the last handle must not leave the reconnect loop running with the
// captured credential.
impl Drop for StompTransport {
    fn drop(&mut self) {
        self.shared.shutdown.send_replace(true);
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }
    }
}

impl Shared {
    async fn run(
        &self,
        mut commands: mpsc::UnboundedReceiver<Frame>,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            if *shutdown.borrow() {
                break;
            }

            info!("Connecting to realtime bus at {}", self.config.url);
            let outcome = self.session(&mut commands, &events, &mut shutdown).await;
            self.connected.store(false, Ordering::SeqCst);

            match outcome {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::Closed) => {
                    info!("Realtime bus closed the connection");
                    let _ = events.send(TransportEvent::Disconnected);
                }
                Err(e) => {
                    error!("Realtime bus connection error: {}", e);
                    let _ = events.send(TransportEvent::Error(e.to_string()));
                }
            }

            info!("Reconnecting in {:?}", self.config.reconnect_delay);
            tokio::select! {
                _ = sleep(self.config.reconnect_delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!("STOMP session stopped");
    }

    async fn session(
        &self,
        commands: &mut mpsc::UnboundedReceiver<Frame>,
        events: &mpsc::UnboundedSender<TransportEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd, Error> {
        let handshake = self.config.handshake_timeout;
        let (ws_stream, _) = tokio::select! {
            result = timeout(handshake, connect_async(self.config.url.as_str())) => {
                result.map_err(|_| bus_error(BusErrorKind::Transport, "WebSocket connect timed out"))??
            }
            _ = shutdown.changed() => return Ok(SessionEnd::Shutdown),
        };
        let (mut write, mut read) = ws_stream.split();

        // Frames queued for a previous session are replaced by the replay below.
        while commands.try_recv().is_ok() {}

        let connect = Frame::connect(host_of(&self.config.url), &self.token, self.config.heartbeat);
        write.send(Message::Text(connect.encode())).await?;

        let connected = timeout(handshake, await_connected(&mut read))
            .await
            .map_err(|_| bus_error(BusErrorKind::Transport, "Timed out waiting for CONNECTED"))??;
        let heartbeat = HeartBeat::negotiate(self.config.heartbeat, connected.get("heart-beat"));
        debug!("STOMP session established, heart-beat {:?}", heartbeat);

        // Subscriptions made from here on are queued as frames as well as
        // recorded, so skip queued SUBSCRIBEs the replay already covered.
        self.connected.store(true, Ordering::SeqCst);
        let replay: Vec<(String, String)> = self
            .destinations
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        let mut replayed = HashSet::with_capacity(replay.len());
        for (id, destination) in replay {
            write
                .send(Message::Text(Frame::subscribe(&id, &destination).encode()))
                .await?;
            replayed.insert(id);
        }
        let _ = events.send(TransportEvent::Connected);

        let mut ping = interval(heartbeat.outgoing.unwrap_or(Duration::from_secs(3600)));
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let silence = heartbeat.incoming.map(|period| period * INCOMING_GRACE);
        let mut deadline = silence.map(|s| Instant::now() + s);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Shutdown requested, closing realtime bus connection");
                    let _ = write.send(Message::Text(Frame::disconnect().encode())).await;
                    let _ = write.close().await;
                    return Ok(SessionEnd::Shutdown);
                }

                Some(frame) = commands.recv() => {
                    if frame.command == Command::Subscribe
                        && frame.get("id").is_some_and(|id| replayed.remove(id))
                    {
                        continue;
                    }
                    trace!("Sending {} frame", frame.command);
                    write.send(Message::Text(frame.encode())).await?;
                }

                _ = ping.tick(), if heartbeat.outgoing.is_some() => {
                    write.send(Message::Text("\n".to_string())).await?;
                }

                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    return Err(bus_error(BusErrorKind::Transport, "Heart-beat timeout"));
                }

                msg = read.next() => {
                    if let Some(s) = silence {
                        deadline = Some(Instant::now() + s);
                    }
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            for frame in Frame::decode_all(&text)? {
                                self.handle_frame(frame, events)?;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Closed),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                    }
                }
            }
        }
    }

    fn handle_frame(
        &self,
        frame: Frame,
        events: &mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<(), Error> {
        match frame.command {
            Command::Message => {
                // Route by our own subscription id so server-side destination
                // rewrites still reach the subscribed topic.
                let destination = frame
                    .get("subscription")
                    .and_then(|id| self.destinations.get(id).map(|d| d.value().clone()))
                    .or_else(|| frame.get("destination").map(str::to_string));
                match destination {
                    Some(destination) => {
                        let _ = events.send(TransportEvent::Message {
                            destination,
                            body: frame.body,
                        });
                    }
                    None => warn!("Dropping MESSAGE frame without a destination"),
                }
                Ok(())
            }
            Command::Error => Err(protocol_error(&frame)),
            Command::Receipt => {
                debug!("Receipt {}", frame.get("receipt-id").unwrap_or("?"));
                Ok(())
            }
            other => {
                warn!("Ignoring unexpected {other} frame");
                Ok(())
            }
        }
    }
}

async fn await_connected<S>(read: &mut S) -> Result<Frame, Error>
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg) = read.next().await {
        let Message::Text(text) = msg? else {
            continue;
        };
        for frame in Frame::decode_all(&text)? {
            match frame.command {
                Command::Connected => return Ok(frame),
                Command::Error => return Err(protocol_error(&frame)),
                other => debug!("Ignoring {other} frame before CONNECTED"),
            }
        }
    }
    Err(bus_error(
        BusErrorKind::Transport,
        "Connection closed before CONNECTED",
    ))
}

fn protocol_error(frame: &Frame) -> Error {
    let message = frame.get("message").unwrap_or("no message");
    bus_error(
        BusErrorKind::Protocol,
        &format!("Server sent ERROR: {message} {}", frame.body.trim()),
    )
}

/// Host part of a `ws://` or `wss://` URL, for the STOMP `host` header.
fn host_of(url: &str) -> &str {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or(without_scheme);
    let authority = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    if authority.starts_with('[') {
        return authority
            .split_once(']')
            .map_or(authority, |(host, _)| host.trim_start_matches('['));
    }
    authority.split(':').next().unwrap_or(authority)
}
