//! Gateway builder wiring the auth middleware into a reqwest client.

use std::sync::Arc;
use std::time::Duration;

use reqwest_middleware::ClientBuilder;

use super::{AuthMiddleware, Gateway};
use crate::credentials::CredentialStore;
use crate::error::Error;
use crate::refresh::{Coordinator, HttpTokenRefresher, SessionObserver, TokenRefresher};

/// Default refresh endpoint path, relative to the base URL.
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout.
    pub timeout: Duration,
    /// Maximum number of refresh-triggered replays per request.
    pub max_refresh_attempts: u32,
    /// Refresh endpoint path, relative to the base URL.
    pub refresh_path: String,
    /// User agent string.
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_refresh_attempts: 3,
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            user_agent: format!("auth-gateway/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Builder for creating a [`Gateway`].
///
/// Provides a fluent API for constructing the gateway with:
/// - A shared credential store (so the realtime client sees the same token)
/// - The refresh endpoint or a custom [`TokenRefresher`]
/// - A session-expired observer
/// - Timeout and user agent configuration
pub struct GatewayBuilder {
    base_url: String,
    config: HttpClientConfig,
    credentials: Option<CredentialStore>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    observer: Option<Arc<dyn SessionObserver>>,
}

impl GatewayBuilder {
    /// Create a new builder for requests relative to `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            config: HttpClientConfig::default(),
            credentials: None,
            refresher: None,
            observer: None,
        }
    }

    /// Share an existing credential store instead of creating an empty one.
    pub fn with_credentials(mut self, credentials: CredentialStore) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Replace the HTTP refresher with a custom one.
    pub fn with_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Set the observer notified when the session can no longer be refreshed.
    pub fn with_session_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the maximum number of refresh-triggered replays per request.
    pub fn with_max_refresh_attempts(mut self, max_refresh_attempts: u32) -> Self {
        self.config.max_refresh_attempts = max_refresh_attempts;
        self
    }

    /// Set the refresh endpoint path.
    pub fn with_refresh_path(mut self, refresh_path: impl Into<String>) -> Self {
        self.config.refresh_path = refresh_path.into();
        self
    }

    /// Set the user agent string.
    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.config.user_agent = user_agent;
        self
    }

    fn refresh_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url,
            self.config.refresh_path.trim_start_matches('/')
        )
    }

    /// Build the configured gateway.
    pub fn build(self) -> Result<Gateway, Error> {
        // One cookie store for both clients: the refresh call authenticates
        // with the cookie set at login.
        let client = reqwest::Client::builder()
            .timeout(self.config.timeout)
            .user_agent(self.config.user_agent.clone())
            .cookie_store(true)
            .build()?;

        let refresh_url = self.refresh_url();
        let credentials = self.credentials.unwrap_or_default();
        let refresher = self.refresher.unwrap_or_else(|| -> Arc<dyn TokenRefresher> {
            Arc::new(HttpTokenRefresher::new(client.clone(), refresh_url.clone()))
        });

        let mut coordinator = Coordinator::new(credentials.clone(), refresher);
        if let Some(observer) = self.observer {
            coordinator = coordinator.with_observer(observer);
        }
        let coordinator = Arc::new(coordinator);

        let middleware = AuthMiddleware::new(
            credentials.clone(),
            Arc::clone(&coordinator),
            self.config.max_refresh_attempts,
        )
        .with_refresh_url(refresh_url);

        let client_with_middleware = ClientBuilder::new(client).with(middleware).build();

        Ok(Gateway::new(
            client_with_middleware,
            self.base_url,
            credentials,
            coordinator,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_default() {
        let builder = GatewayBuilder::new("http://localhost:8080/api/");
        assert_eq!(builder.base_url, "http://localhost:8080/api");
        assert_eq!(builder.config.timeout, Duration::from_secs(30));
        assert_eq!(builder.config.max_refresh_attempts, 3);
    }

    #[test]
    fn test_refresh_url_joins_base_and_path() {
        let builder = GatewayBuilder::new("http://localhost:8080/api").with_refresh_path("/auth/refresh");
        assert_eq!(builder.refresh_url(), "http://localhost:8080/api/auth/refresh");
    }

    #[test]
    fn test_builder_with_max_refresh_attempts() {
        let builder = GatewayBuilder::new("http://localhost").with_max_refresh_attempts(5);
        assert_eq!(builder.config.max_refresh_attempts, 5);
    }

    #[tokio::test]
    async fn test_build_gateway() {
        let gateway = GatewayBuilder::new("http://localhost").build();
        assert!(gateway.is_ok());
    }
}
