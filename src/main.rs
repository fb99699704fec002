use std::sync::Arc;

use auth_gateway::{CredentialStore, Gateway};
use log::*;
use realtime::stomp::{StompConfig, StompTransportFactory};
use service::{config::Config, logging::Logger};

#[tokio::main]
async fn main() {
    let config = Config::new();
    if let Err(e) = Logger::init_logger(&config) {
        eprintln!("Failed to initialize logging: {e}");
    }

    info!(
        "Starting chat client [{}] against {}",
        config.runtime_env(),
        config.api_base_url
    );

    let credentials = match config.access_token() {
        Some(token) => CredentialStore::with_token(token),
        None => CredentialStore::new(),
    };

    let bus = realtime::Client::new(
        credentials.clone(),
        Arc::new(StompTransportFactory::new(StompConfig {
            url: config.bus_url.clone(),
            reconnect_delay: config.reconnect_delay(),
            heartbeat: config.heartbeat(),
            ..Default::default()
        })),
    );

    let session_bus = bus.clone();
    let gateway = match Gateway::builder(config.api_base_url.clone())
        .with_credentials(credentials.clone())
        .with_timeout(config.request_timeout())
        .with_max_refresh_attempts(config.max_refresh_attempts)
        .with_refresh_path(config.refresh_path.clone())
        .with_session_observer(Arc::new(move || {
            warn!("Session expired, please log in again");
            let bus = session_bus.clone();
            tokio::spawn(async move { bus.disconnect().await });
        }))
        .build()
    {
        Ok(gateway) => gateway,
        Err(e) => {
            error!("Failed to build the request gateway: {e}");
            std::process::exit(1);
        }
    };

    bus.on_connect(|| info!("Connected to the realtime bus"));
    bus.on_disconnect(|| warn!("Disconnected from the realtime bus"));
    bus.on_error(|detail| warn!("Realtime bus error: {detail}"));

    if let Some(path) = config.fetch.as_deref() {
        match gateway
            .send_json::<serde_json::Value>(gateway.get(path))
            .await
        {
            Ok(body) => info!("GET {path}: {body}"),
            Err(e) => error!("GET {path} failed: {e}"),
        }
    }

    if let Err(e) = bus.connect().await {
        error!("Failed to connect to the realtime bus: {e}");
        std::process::exit(1);
    }

    for topic in &config.topics {
        let name = topic.clone();
        if let Err(e) = bus
            .subscribe(topic, move |payload| info!("[{name}] {payload}"))
            .await
        {
            error!("Failed to subscribe to {topic}: {e}");
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {e}");
    }

    info!("Shutting down");
    bus.disconnect().await;
    gateway.logout().await;
}
