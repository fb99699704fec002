//! The authenticated request gateway used by feature code.

use std::sync::Arc;

use log::debug;
use reqwest::{Method, Response};
use reqwest_middleware::{ClientWithMiddleware, RequestBuilder};
use secrecy::SecretString;
use serde::de::DeserializeOwned;

use super::GatewayBuilder;
use crate::credentials::CredentialStore;
use crate::error::{http_error, Error, HttpErrorKind};
use crate::refresh::Coordinator;

/// Issues HTTP calls against the backend with the current credential attached
/// and refresh handled transparently.
///
/// Construct once at startup with [`Gateway::builder`] and hand out clones.
#[derive(Clone)]
pub struct Gateway {
    client: ClientWithMiddleware,
    base_url: String,
    credentials: CredentialStore,
    coordinator: Arc<Coordinator>,
}

impl Gateway {
    pub(crate) fn new(
        client: ClientWithMiddleware,
        base_url: String,
        credentials: CredentialStore,
        coordinator: Arc<Coordinator>,
    ) -> Self {
        Self {
            client,
            base_url,
            credentials,
            coordinator,
        }
    }

    pub fn builder(base_url: impl Into<String>) -> GatewayBuilder {
        GatewayBuilder::new(base_url)
    }

    /// Absolute URL for a path relative to the base URL.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, self.url(path))
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.request(Method::POST, path)
    }

    pub fn put(&self, path: &str) -> RequestBuilder {
        self.request(Method::PUT, path)
    }

    pub fn delete(&self, path: &str) -> RequestBuilder {
        self.request(Method::DELETE, path)
    }

    /// Send a request built from this gateway.
    ///
    /// Statuses other than 401 and 403 come back as a normal response; the
    /// caller decides what a 404 or 500 means.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, Error> {
        Ok(request.send().await?)
    }

    /// Send a request and decode a JSON body, mapping non-success statuses to
    /// `HttpErrorKind::Status`.
    pub async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, Error> {
        let response = self.send(request).await?;
        let status = response.status();

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            debug!("Request failed with {status}: {body}");
            return Err(http_error(
                HttpErrorKind::Status(status.as_u16()),
                &format!("{status} - {body}"),
            ));
        }

        Ok(response.json::<T>().await?)
    }

    /// Store the credential handed out by the login flow.
    pub async fn login(&self, token: impl Into<String>) {
        self.credentials.set(SecretString::new(token.into())).await;
    }

    /// Forget the credential.
    pub async fn logout(&self) {
        self.credentials.clear().await;
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// True while a shared refresh is in flight.
    pub async fn is_refreshing(&self) -> bool {
        self.coordinator.is_refreshing().await
    }

    /// Requests currently queued on the in-flight refresh.
    pub async fn pending_refresh_waiters(&self) -> usize {
        self.coordinator.pending_waiters().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Room {
        id: u32,
        name: String,
    }

    #[test]
    fn test_url_joins_path() {
        let gateway = Gateway::builder("http://localhost:8080/api/").build().unwrap();
        assert_eq!(gateway.url("/rooms"), "http://localhost:8080/api/rooms");
        assert_eq!(gateway.url("rooms/1"), "http://localhost:8080/api/rooms/1");
    }

    #[tokio::test]
    async fn test_send_json_decodes_success_body() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/rooms/1")
            .match_header("authorization", "Bearer abc")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":1,"name":"general"}"#)
            .create_async()
            .await;

        let gateway = Gateway::builder(server.url())
            .with_credentials(CredentialStore::with_token("abc"))
            .build()
            .unwrap();
        let room: Room = gateway.send_json(gateway.get("/rooms/1")).await.unwrap();

        assert_eq!(
            room,
            Room {
                id: 1,
                name: "general".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_send_json_maps_error_status() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/rooms/9")
            .with_status(404)
            .with_body("missing")
            .create_async()
            .await;

        let gateway = Gateway::builder(server.url()).build().unwrap();
        let err = gateway
            .send_json::<Room>(gateway.get("/rooms/9"))
            .await
            .unwrap_err();

        assert_eq!(
            err.error_kind,
            crate::error::ErrorKind::Http(HttpErrorKind::Status(404))
        );
    }

    #[tokio::test]
    async fn test_login_and_logout_drive_the_credential() {
        let gateway = Gateway::builder("http://localhost").build().unwrap();
        assert!(!gateway.credentials().is_authenticated().await);

        gateway.login("abc").await;
        assert!(gateway.credentials().is_authenticated().await);

        gateway.logout().await;
        assert!(!gateway.credentials().is_authenticated().await);
    }
}
