//! The single mutable credential cell shared by the gateway and the bus client.

use std::sync::Arc;

use log::debug;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::RwLock;

/// Holds the current bearer credential, if any.
///
/// Cloning is cheap and every clone observes the same cell. Only the login and
/// logout flows and the refresh coordinator write to it; everything else reads.
#[derive(Clone, Default)]
pub struct CredentialStore {
    token: Arc<RwLock<Option<SecretString>>>,
}

impl CredentialStore {
    /// Create an empty (unauthenticated) store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store already holding a credential.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Arc::new(RwLock::new(Some(SecretString::new(token.into())))),
        }
    }

    /// Current credential, if one is held.
    pub async fn get(&self) -> Option<SecretString> {
        self.token.read().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.token.read().await.is_some()
    }

    /// True when the held credential differs from `other`.
    pub(crate) async fn differs_from(&self, other: &SecretString) -> bool {
        match self.token.read().await.as_ref() {
            Some(current) => current.expose_secret() != other.expose_secret(),
            None => false,
        }
    }

    /// Replace the credential.
    pub async fn set(&self, token: SecretString) {
        *self.token.write().await = Some(token);
        debug!("Credential updated");
    }

    /// Drop the credential, leaving the store unauthenticated.
    pub async fn clear(&self) {
        *self.token.write().await = None;
        debug!("Credential cleared");
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_store_is_unauthenticated() {
        let store = CredentialStore::new();
        assert!(!store.is_authenticated().await);
        assert!(store.get().await.is_none());
    }

    #[tokio::test]
    async fn test_clones_share_the_same_cell() {
        let store = CredentialStore::new();
        let other = store.clone();

        store.set(SecretString::new("abc".to_string())).await;
        assert_eq!(
            other.get().await.map(|t| t.expose_secret().clone()),
            Some("abc".to_string())
        );

        other.clear().await;
        assert!(!store.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_differs_from() {
        let store = CredentialStore::with_token("xyz");
        assert!(store.differs_from(&SecretString::new("abc".to_string())).await);
        assert!(!store.differs_from(&SecretString::new("xyz".to_string())).await);

        store.clear().await;
        assert!(!store.differs_from(&SecretString::new("abc".to_string())).await);
    }
}
