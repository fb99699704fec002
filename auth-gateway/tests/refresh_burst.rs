use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use auth_gateway::refresh::HttpTokenRefresher;
use auth_gateway::{AuthErrorKind, CredentialStore, Error, ErrorKind, Gateway, TokenRefresher};
use futures_util::future::join_all;
use mockito::{Matcher, Server, ServerGuard};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{mpsc, Notify};

/// Delegates to the real refresher once released, so a test can make sure
/// every request of a burst has queued before the refresh settles.
struct GatedRefresher {
    inner: HttpTokenRefresher,
    gate: Notify,
}

#[async_trait]
impl TokenRefresher for GatedRefresher {
    async fn refresh(&self) -> Result<SecretString, Error> {
        self.gate.notified().await;
        self.inner.refresh().await
    }
}

fn refresh_url(server: &ServerGuard) -> String {
    format!("{}/auth/refresh", server.url())
}

async fn wait_for_waiters(gateway: &Gateway, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while gateway.pending_refresh_waiters().await < expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("requests never queued on the refresh");
}

#[tokio::test]
async fn test_concurrent_401s_share_one_refresh_and_replay_with_new_token() {
    let mut server = Server::new_async().await;

    let stale = server
        .mock("GET", "/rooms")
        .match_header("authorization", "Bearer abc")
        .with_status(401)
        .expect(3)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/auth/refresh")
        .match_header("authorization", Matcher::Missing)
        .with_status(200)
        .with_header("authorization", "Bearer xyz")
        .expect(1)
        .create_async()
        .await;
    let fresh = server
        .mock("GET", "/rooms")
        .match_header("authorization", "Bearer xyz")
        .with_status(200)
        .with_body("[]")
        .expect(3)
        .create_async()
        .await;

    let refresher = Arc::new(GatedRefresher {
        inner: HttpTokenRefresher::new(reqwest::Client::new(), refresh_url(&server)),
        gate: Notify::new(),
    });
    let credentials = CredentialStore::with_token("abc");
    let gateway = Gateway::builder(server.url())
        .with_credentials(credentials.clone())
        .with_refresher(refresher.clone())
        .build()
        .unwrap();

    let requests = (0..3).map(|_| {
        let gateway = gateway.clone();
        tokio::spawn(async move { gateway.send(gateway.get("/rooms")).await })
    });
    let handles: Vec<_> = requests.collect();

    wait_for_waiters(&gateway, 3).await;
    refresher.gate.notify_one();

    for result in join_all(handles).await {
        let response = result.unwrap().unwrap();
        assert_eq!(response.status(), 200);
    }

    stale.assert_async().await;
    refresh.assert_async().await;
    fresh.assert_async().await;
    assert_eq!(credentials.get().await.unwrap().expose_secret(), "xyz");
}

#[tokio::test]
async fn test_request_is_not_replayed_a_fourth_time() {
    let mut server = Server::new_async().await;

    let rooms = server
        .mock("GET", "/rooms")
        .with_status(401)
        .expect(4)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/auth/refresh")
        .with_status(200)
        .with_header("authorization", "Bearer xyz")
        .expect(3)
        .create_async()
        .await;

    let gateway = Gateway::builder(server.url())
        .with_credentials(CredentialStore::with_token("abc"))
        .build()
        .unwrap();

    let err = gateway.send(gateway.get("/rooms")).await.unwrap_err();

    assert_eq!(err.error_kind, ErrorKind::Auth(AuthErrorKind::RefreshExhausted));
    rooms.assert_async().await;
    refresh.assert_async().await;
}

#[tokio::test]
async fn test_streaming_body_refreshes_then_asks_caller_to_resend() {
    let mut server = Server::new_async().await;

    let upload = server
        .mock("POST", "/upload")
        .match_header("authorization", "Bearer abc")
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/auth/refresh")
        .with_status(200)
        .with_header("authorization", "Bearer xyz")
        .expect(1)
        .create_async()
        .await;

    let credentials = CredentialStore::with_token("abc");
    let gateway = Gateway::builder(server.url())
        .with_credentials(credentials.clone())
        .build()
        .unwrap();

    let body = reqwest::Body::wrap_stream(futures_util::stream::once(async {
        Ok::<_, std::io::Error>("hello")
    }));
    let err = gateway
        .send(gateway.post("/upload").body(body))
        .await
        .unwrap_err();

    assert_eq!(err.error_kind, ErrorKind::Auth(AuthErrorKind::NotReplayable));
    assert_eq!(credentials.get().await.unwrap().expose_secret(), "xyz");
    upload.assert_async().await;
    refresh.assert_async().await;
}

#[tokio::test]
async fn test_forbidden_triggers_no_refresh_and_no_retry() {
    let mut server = Server::new_async().await;

    let rooms = server
        .mock("DELETE", "/rooms/1")
        .match_header("authorization", "Bearer abc")
        .with_status(403)
        .expect(1)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/auth/refresh")
        .expect(0)
        .create_async()
        .await;

    let gateway = Gateway::builder(server.url())
        .with_credentials(CredentialStore::with_token("abc"))
        .build()
        .unwrap();

    let err = gateway.send(gateway.delete("/rooms/1")).await.unwrap_err();

    assert_eq!(
        err.error_kind,
        ErrorKind::Auth(AuthErrorKind::AuthorizationDenied)
    );
    rooms.assert_async().await;
    refresh.assert_async().await;
}

#[tokio::test]
async fn test_401_without_credential_fails_fast() {
    let mut server = Server::new_async().await;

    let rooms = server
        .mock("GET", "/rooms")
        .match_header("authorization", Matcher::Missing)
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/auth/refresh")
        .expect(0)
        .create_async()
        .await;

    let gateway = Gateway::builder(server.url()).build().unwrap();
    let err = gateway.send(gateway.get("/rooms")).await.unwrap_err();

    assert_eq!(err.error_kind, ErrorKind::Auth(AuthErrorKind::Unauthenticated));
    rooms.assert_async().await;
    refresh.assert_async().await;
}

#[tokio::test]
async fn test_refresh_network_error_clears_credential_and_expires_session_once() {
    let mut server = Server::new_async().await;

    let _rooms = server
        .mock("GET", "/rooms")
        .with_status(401)
        .create_async()
        .await;

    let (expired_tx, mut expired_rx) = mpsc::unbounded_channel();
    let expired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&expired);

    // Nothing listens on port 1, so the refresh call fails at the network layer.
    let refresher = Arc::new(HttpTokenRefresher::new(
        reqwest::Client::new(),
        "http://127.0.0.1:1/auth/refresh",
    ));
    let credentials = CredentialStore::with_token("abc");
    let gateway = Gateway::builder(server.url())
        .with_credentials(credentials.clone())
        .with_refresher(refresher)
        .with_session_observer(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = expired_tx.send(());
        }))
        .build()
        .unwrap();

    let err = gateway.send(gateway.get("/rooms")).await.unwrap_err();
    assert_eq!(err.error_kind, ErrorKind::Auth(AuthErrorKind::RefreshFailed));
    assert!(err.is_session_ended());

    tokio::time::timeout(Duration::from_secs(5), expired_rx.recv())
        .await
        .expect("session-expired observer was never invoked");

    assert!(!credentials.is_authenticated().await);
    assert_eq!(expired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_caller_supplied_bearer_prefix_is_not_doubled() {
    let mut server = Server::new_async().await;

    let rooms = server
        .mock("GET", "/rooms")
        .match_header("authorization", "Bearer abc")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let gateway = Gateway::builder(server.url())
        .with_credentials(CredentialStore::with_token("Bearer abc"))
        .build()
        .unwrap();

    let response = gateway.send(gateway.get("/rooms")).await.unwrap();
    assert_eq!(response.status(), 200);
    rooms.assert_async().await;
}

#[tokio::test]
async fn test_other_error_statuses_pass_through_untouched() {
    let mut server = Server::new_async().await;

    let rooms = server
        .mock("GET", "/rooms")
        .with_status(500)
        .expect(1)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/auth/refresh")
        .expect(0)
        .create_async()
        .await;

    let gateway = Gateway::builder(server.url())
        .with_credentials(CredentialStore::with_token("abc"))
        .build()
        .unwrap();

    let response = gateway.send(gateway.get("/rooms")).await.unwrap();
    assert_eq!(response.status(), 500);
    rooms.assert_async().await;
    refresh.assert_async().await;
}
