//! Obtaining a fresh credential from the backend.

use async_trait::async_trait;
use http::header::AUTHORIZATION;
use log::debug;
use secrecy::SecretString;
use serde::Deserialize;

use crate::bearer::strip_bearer;
use crate::error::{http_error, Error, HttpErrorKind};

/// Source of new credentials.
///
/// The production implementation calls the refresh endpoint; tests substitute
/// their own to count or gate calls.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Obtain a new credential. Must not attach the current (stale) credential.
    async fn refresh(&self) -> Result<SecretString, Error>;
}

/// Body shapes the refresh endpoint may use when the header is absent.
#[derive(Debug, Deserialize)]
struct RefreshBody {
    #[serde(alias = "accessToken", alias = "access_token")]
    token: Option<String>,
}

/// Calls `POST <refresh_url>` with no body and no bearer header.
///
/// The endpoint authenticates through an out-of-band credential (the cookie set
/// by the login flow), so the client passed in should share the gateway's cookie
/// store. The new token is read from the `Authorization` response header, with
/// a JSON body `token` field as a fallback.
pub struct HttpTokenRefresher {
    client: reqwest::Client,
    url: String,
}

impl HttpTokenRefresher {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self) -> Result<SecretString, Error> {
        debug!("Requesting new credential from {}", self.url);

        let response = self.client.post(&self.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(http_error(
                HttpErrorKind::Status(status.as_u16()),
                &format!("Refresh endpoint answered {status}"),
            ));
        }

        let from_header = response
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(strip_bearer)
            .filter(|token| !token.is_empty())
            .map(str::to_string);

        let token = match from_header {
            Some(token) => token,
            None => {
                let body = response.text().await?;
                serde_json::from_str::<RefreshBody>(&body)
                    .ok()
                    .and_then(|body| body.token)
                    .filter(|token| !token.is_empty())
                    .ok_or_else(|| {
                        http_error(HttpErrorKind::Decode, "Refresh response carried no token")
                    })?
            }
        };

        Ok(SecretString::new(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use secrecy::ExposeSecret;

    #[tokio::test]
    async fn test_refresh_reads_token_from_authorization_header() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/refresh")
            .match_header("authorization", Matcher::Missing)
            .with_status(200)
            .with_header("authorization", "Bearer xyz")
            .create_async()
            .await;

        let refresher = HttpTokenRefresher::new(
            reqwest::Client::new(),
            format!("{}/auth/refresh", server.url()),
        );
        let token = refresher.refresh().await.unwrap();

        assert_eq!(token.expose_secret(), "xyz");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_falls_back_to_json_body() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/auth/refresh")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"accessToken":"from-body"}"#)
            .create_async()
            .await;

        let refresher = HttpTokenRefresher::new(
            reqwest::Client::new(),
            format!("{}/auth/refresh", server.url()),
        );
        let token = refresher.refresh().await.unwrap();
        assert_eq!(token.expose_secret(), "from-body");
    }

    #[tokio::test]
    async fn test_refresh_without_token_is_a_decode_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/auth/refresh")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let refresher = HttpTokenRefresher::new(
            reqwest::Client::new(),
            format!("{}/auth/refresh", server.url()),
        );
        let err = refresher.refresh().await.unwrap_err();
        assert_eq!(
            err.error_kind,
            crate::error::ErrorKind::Http(HttpErrorKind::Decode)
        );
    }

    #[tokio::test]
    async fn test_refresh_rejected_by_backend() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/auth/refresh")
            .with_status(401)
            .create_async()
            .await;

        let refresher = HttpTokenRefresher::new(
            reqwest::Client::new(),
            format!("{}/auth/refresh", server.url()),
        );
        let err = refresher.refresh().await.unwrap_err();
        assert_eq!(
            err.error_kind,
            crate::error::ErrorKind::Http(HttpErrorKind::Status(401))
        );
    }
}
