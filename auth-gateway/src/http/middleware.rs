//! Bearer credential middleware with refresh-and-replay on 401.

use std::sync::Arc;

use async_trait::async_trait;
use http::Extensions;
use log::{debug, warn};
use reqwest::{Request, Response, StatusCode};
use reqwest_middleware::{Middleware, Next};
use secrecy::SecretString;

use crate::bearer::apply_bearer;
use crate::credentials::CredentialStore;
use crate::error::{auth_error, AuthErrorKind, Error};
use crate::refresh::Coordinator;

/// Attaches the current credential to outgoing requests and handles
/// authentication failures.
///
/// * 403 is reported as `AuthorizationDenied` straight away.
/// * 401 joins (or starts) the shared refresh and replays the request with the
///   new credential, at most `max_refresh_attempts` times per request; after
///   that the request fails with `RefreshExhausted`.
/// * Every other response is passed through untouched.
pub struct AuthMiddleware {
    credentials: CredentialStore,
    coordinator: Arc<Coordinator>,
    max_refresh_attempts: u32,
    refresh_url: Option<String>,
}

impl AuthMiddleware {
    pub fn new(
        credentials: CredentialStore,
        coordinator: Arc<Coordinator>,
        max_refresh_attempts: u32,
    ) -> Self {
        Self {
            credentials,
            coordinator,
            max_refresh_attempts,
            refresh_url: None,
        }
    }

    /// URL of the refresh endpoint; requests to it are never given a credential
    /// and never trigger a refresh themselves.
    pub fn with_refresh_url(mut self, url: impl Into<String>) -> Self {
        self.refresh_url = Some(url.into());
        self
    }

    fn is_refresh_call(&self, request: &Request) -> bool {
        self.refresh_url
            .as_deref()
            .is_some_and(|url| request.url().as_str() == url)
    }

    /// Set the bearer header when a credential is held and the request is not
    /// the refresh call. Otherwise the request goes out unauthenticated.
    pub fn attach_credential(
        &self,
        request: &mut Request,
        token: Option<&SecretString>,
    ) -> Result<(), Error> {
        match token {
            Some(token) if !self.is_refresh_call(request) => apply_bearer(request, token),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Middleware for AuthMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        if self.is_refresh_call(&req) {
            return next.run(req, extensions).await;
        }

        let mut token = self.credentials.get().await;
        let mut attempts = 0u32;
        let mut request = req;

        loop {
            // Keep an untouched copy to replay; streaming bodies cannot be cloned.
            let replay = request.try_clone();
            let method = request.method().clone();
            let url = request.url().clone();

            self.attach_credential(&mut request, token.as_ref())?;
            let response = next.clone().run(request, extensions).await?;

            match response.status() {
                StatusCode::FORBIDDEN => {
                    debug!("{method} {url} denied (403)");
                    return Err(auth_error(
                        AuthErrorKind::AuthorizationDenied,
                        &format!("{method} {url} was denied"),
                    )
                    .into());
                }
                StatusCode::UNAUTHORIZED => {
                    if attempts >= self.max_refresh_attempts {
                        warn!("{method} {url} still unauthorized after {attempts} refresh(es)");
                        return Err(auth_error(
                            AuthErrorKind::RefreshExhausted,
                            &format!("{method} {url} still unauthorized after {attempts} refreshes"),
                        )
                        .into());
                    }
                    attempts += 1;

                    let fresh = self.coordinator.refresh(token.as_ref()).await?;
                    let Some(replay) = replay else {
                        warn!("{method} {url} got 401 and its body cannot be replayed");
                        return Err(auth_error(
                            AuthErrorKind::NotReplayable,
                            &format!("{method} {url} must be resent with the refreshed credential"),
                        )
                        .into());
                    };
                    debug!(
                        "Replaying {method} {url} (attempt {attempts}/{})",
                        self.max_refresh_attempts
                    );
                    token = Some(fresh);
                    request = replay;
                }
                _ => return Ok(response),
            }
        }
    }
}
