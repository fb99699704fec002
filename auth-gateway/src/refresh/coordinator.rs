//! Refresh coordinator with a single in-flight slot.

use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, info, warn};
use secrecy::SecretString;
use tokio::sync::{oneshot, Mutex};

use super::{SessionObserver, TokenRefresher};
use crate::credentials::CredentialStore;
use crate::error::{auth_error, AuthErrorKind, Error};

/// Outcome broadcast to every waiter of one refresh burst.
type Outcome = Result<SecretString, String>;

/// In-flight flag plus the waiters queued behind it.
///
/// `waiters` is only non-empty while `in_flight` is set; it is drained exactly
/// once, front to back, when the refresh settles.
#[derive(Default)]
struct Slot {
    in_flight: bool,
    waiters: VecDeque<oneshot::Sender<Outcome>>,
}

/// Coordinates credential refresh so a burst of 401 responses results in a
/// single call to the refresh endpoint.
///
/// Without coordination every failing request would refresh on its own, and
/// with single-use refresh cookies all but the first would fail and log the
/// user out.
pub struct Coordinator {
    credentials: CredentialStore,
    refresher: Arc<dyn TokenRefresher>,
    observer: Option<Arc<dyn SessionObserver>>,
    slot: Arc<Mutex<Slot>>,
}

impl Coordinator {
    /// Create a coordinator writing refreshed credentials into `credentials`.
    pub fn new(credentials: CredentialStore, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            credentials,
            refresher,
            observer: None,
            slot: Arc::new(Mutex::new(Slot::default())),
        }
    }

    /// Register the observer notified when a refresh terminally fails.
    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Get a new credential, joining the refresh already in flight if there is one.
    ///
    /// `stale` is the credential the caller's failed request carried. When no
    /// refresh is running and the store already holds a different credential,
    /// another request refreshed in the meantime and that credential is handed
    /// back without calling the endpoint again.
    ///
    /// # Errors
    ///
    /// * `Unauthenticated` when no refresh is running and no credential is held.
    /// * `RefreshFailed` when the shared refresh fails; the credential has
    ///   already been cleared by the time this returns.
    pub async fn refresh(&self, stale: Option<&SecretString>) -> Result<SecretString, Error> {
        let (tx, rx) = oneshot::channel();

        {
            let mut slot = self.slot.lock().await;

            if !slot.in_flight {
                let Some(current) = self.credentials.get().await else {
                    return Err(auth_error(
                        AuthErrorKind::Unauthenticated,
                        "No credential held; refusing to refresh",
                    ));
                };

                if let Some(stale) = stale {
                    if self.credentials.differs_from(stale).await {
                        debug!("Credential already replaced by an earlier refresh");
                        return Ok(current);
                    }
                }

                slot.in_flight = true;
                self.spawn_refresh();
            }

            slot.waiters.push_back(tx);
            debug!("Queued behind refresh ({} waiting)", slot.waiters.len());
        }

        match rx.await {
            Ok(Ok(token)) => Ok(token),
            Ok(Err(message)) => Err(auth_error(AuthErrorKind::RefreshFailed, &message)),
            Err(_) => Err(auth_error(
                AuthErrorKind::RefreshFailed,
                "Refresh task ended before settling",
            )),
        }
    }

    /// True while a refresh is in flight.
    pub async fn is_refreshing(&self) -> bool {
        self.slot.lock().await.in_flight
    }

    /// Number of callers queued on the in-flight refresh.
    pub async fn pending_waiters(&self) -> usize {
        self.slot.lock().await.waiters.len()
    }

    // The refresh runs detached from any one caller so that a dropped request
    // future cannot leave the slot marked in flight with nobody to settle it.
    fn spawn_refresh(&self) {
        let credentials = self.credentials.clone();
        let refresher = Arc::clone(&self.refresher);
        let observer = self.observer.clone();
        let slot = Arc::clone(&self.slot);

        tokio::spawn(async move {
            info!("Refreshing credential");

            let outcome: Outcome = match refresher.refresh().await {
                Ok(token) => {
                    credentials.set(token.clone()).await;
                    info!("Credential refreshed");
                    Ok(token)
                }
                Err(e) => {
                    credentials.clear().await;
                    warn!("Credential refresh failed, session ended: {e}");
                    Err(e.to_string())
                }
            };

            let waiters = {
                let mut slot = slot.lock().await;
                slot.in_flight = false;
                std::mem::take(&mut slot.waiters)
            };

            debug!("Settling {} queued request(s)", waiters.len());
            for waiter in waiters {
                // A waiter whose request was dropped is simply skipped.
                let _ = waiter.send(outcome.clone());
            }

            if outcome.is_err() {
                if let Some(observer) = observer {
                    observer.session_expired();
                }
            }
        });
    }
}
