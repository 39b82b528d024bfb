//! Secure Token Storage
//!
//! Durable holder of the current access/refresh credential pair, backed by the
//! platform's [`SecureStore`] (Keychain, Keystore, keyring).
//!
//! ## Slots
//!
//! The pair is stored as two independent secrets:
//!
//! | Key            | Value                  |
//! |----------------|------------------------|
//! | `roma.access`  | access credential      |
//! | `roma.refresh` | refresh credential     |
//!
//! ## Failure Model
//!
//! Reads and clears never fail: a backend error on read is logged and treated
//! as "absent", and a backend error on clear is logged and ignored. Writes do
//! fail, because a login that could not persist its session must say so.
//!
//! ## Security Features
//!
//! - Credential values are never logged or included in error messages
//! - Storage uses platform-specific secure stores (via `SecureStore` trait)
//!
//! ## Example
//!
//! ```no_run
//! use core_auth::{CredentialPair, TokenStore};
//! use std::sync::Arc;
//! # use bridge_traits::storage::SecureStore;
//! # async fn example(secure_store: Arc<dyn SecureStore>) -> core_auth::Result<()> {
//! let token_store = TokenStore::new(secure_store);
//!
//! token_store.set(&CredentialPair::new("A1", "R1")).await?;
//! assert_eq!(token_store.access().await.as_deref(), Some("A1"));
//!
//! token_store.clear().await;
//! assert!(token_store.get().await.is_none());
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, Result};
use crate::types::{is_usable, CredentialPair};
use bridge_traits::storage::SecureStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Storage key of the access credential.
pub const ACCESS_KEY: &str = "roma.access";
/// Storage key of the refresh credential.
pub const REFRESH_KEY: &str = "roma.refresh";

/// Secure storage for the credential pair.
///
/// Cloning yields another handle to the same backend, so every component
/// sees the most recent write.
#[derive(Clone)]
pub struct TokenStore {
    secure_store: Arc<dyn SecureStore>,
}

impl TokenStore {
    /// Create a new token store
    ///
    /// # Arguments
    ///
    /// * `secure_store` - Platform-specific secure storage implementation
    pub fn new(secure_store: Arc<dyn SecureStore>) -> Self {
        debug!("Initializing TokenStore");
        Self { secure_store }
    }

    /// Persist a credential pair, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::SecureStorageUnavailable`] if either slot could not
    /// be written. A partially written pair is cleared before returning so the
    /// store never holds an access credential from one pair and a refresh
    /// credential from another.
    pub async fn set(&self, pair: &CredentialPair) -> Result<()> {
        let written = match self.write_slot(ACCESS_KEY, &pair.access).await {
            Ok(()) => self.write_slot(REFRESH_KEY, &pair.refresh).await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            warn!(error = %e, "Failed to store credentials in secure storage");
            self.clear().await;
            return Err(AuthError::SecureStorageUnavailable(e.to_string()));
        }

        info!("Credentials stored securely");
        Ok(())
    }

    /// The stored pair, or `None` unless both slots hold a value.
    pub async fn get(&self) -> Option<CredentialPair> {
        let access = self.read_slot(ACCESS_KEY).await?;
        let refresh = self.read_slot(REFRESH_KEY).await?;
        Some(CredentialPair { access, refresh })
    }

    /// The stored access credential, if usable.
    pub async fn access(&self) -> Option<String> {
        self.read_slot(ACCESS_KEY)
            .await
            .filter(|value| is_usable(value))
    }

    /// The stored refresh credential, if usable.
    pub async fn refresh(&self) -> Option<String> {
        self.read_slot(REFRESH_KEY)
            .await
            .filter(|value| is_usable(value))
    }

    /// Whether either slot holds anything at all, usable or not.
    pub async fn has_any(&self) -> bool {
        self.read_slot(ACCESS_KEY).await.is_some() || self.read_slot(REFRESH_KEY).await.is_some()
    }

    /// Remove both slots. Idempotent and infallible.
    pub async fn clear(&self) {
        for key in [ACCESS_KEY, REFRESH_KEY] {
            if let Err(e) = self.secure_store.delete_secret(key).await {
                warn!(key = key, error = %e, "Failed to delete credential from secure storage");
            }
        }
        debug!("Credentials cleared");
    }

    async fn write_slot(&self, key: &str, value: &str) -> bridge_traits::error::Result<()> {
        self.secure_store.set_secret(key, value.as_bytes()).await
    }

    async fn read_slot(&self, key: &str) -> Option<String> {
        let bytes = match self.secure_store.get_secret(key).await {
            Ok(bytes) => bytes?,
            Err(e) => {
                warn!(key = key, error = %e, "Failed to read credential; treating as absent");
                return None;
            }
        };

        match String::from_utf8(bytes) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(key = key, "Stored credential is not valid UTF-8; treating as absent");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::BridgeError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Mutex;

    /// Mock implementation of SecureStore for testing
    #[derive(Clone, Default)]
    struct MockSecureStore {
        storage: Arc<Mutex<HashMap<String, Vec<u8>>>>,
        fail_reads: Arc<AtomicBool>,
        fail_refresh_writes: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl SecureStore for MockSecureStore {
        async fn set_secret(&self, key: &str, value: &[u8]) -> bridge_traits::error::Result<()> {
            if key == REFRESH_KEY && self.fail_refresh_writes.load(Ordering::SeqCst) {
                return Err(BridgeError::OperationFailed("keychain locked".into()));
            }
            let mut storage = self.storage.lock().await;
            storage.insert(key.to_string(), value.to_vec());
            Ok(())
        }

        async fn get_secret(&self, key: &str) -> bridge_traits::error::Result<Option<Vec<u8>>> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(BridgeError::OperationFailed("keychain locked".into()));
            }
            let storage = self.storage.lock().await;
            Ok(storage.get(key).cloned())
        }

        async fn delete_secret(&self, key: &str) -> bridge_traits::error::Result<()> {
            let mut storage = self.storage.lock().await;
            storage.remove(key);
            Ok(())
        }

        async fn list_keys(&self) -> bridge_traits::error::Result<Vec<String>> {
            let storage = self.storage.lock().await;
            Ok(storage.keys().cloned().collect())
        }

        async fn clear_all(&self) -> bridge_traits::error::Result<()> {
            let mut storage = self.storage.lock().await;
            storage.clear();
            Ok(())
        }
    }

    fn store() -> (TokenStore, MockSecureStore) {
        let backend = MockSecureStore::default();
        (TokenStore::new(Arc::new(backend.clone())), backend)
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let (token_store, backend) = store();

        token_store
            .set(&CredentialPair::new("A1", "R1"))
            .await
            .expect("Failed to store credentials");

        assert_eq!(
            token_store.get().await,
            Some(CredentialPair::new("A1", "R1"))
        );
        assert_eq!(token_store.access().await.as_deref(), Some("A1"));
        assert_eq!(token_store.refresh().await.as_deref(), Some("R1"));

        let raw = backend.storage.lock().await;
        assert_eq!(raw.get(ACCESS_KEY), Some(&b"A1".to_vec()));
        assert_eq!(raw.get(REFRESH_KEY), Some(&b"R1".to_vec()));
    }

    #[tokio::test]
    async fn test_set_overwrites_previous_pair() {
        let (token_store, _) = store();

        token_store.set(&CredentialPair::new("A1", "R1")).await.unwrap();
        token_store.set(&CredentialPair::new("A2", "R2")).await.unwrap();

        assert_eq!(
            token_store.get().await,
            Some(CredentialPair::new("A2", "R2"))
        );
    }

    #[tokio::test]
    async fn test_get_requires_both_slots() {
        let (token_store, backend) = store();
        backend
            .set_secret(ACCESS_KEY, b"A1")
            .await
            .unwrap();

        assert!(token_store.get().await.is_none());
        assert_eq!(token_store.access().await.as_deref(), Some("A1"));
        assert!(token_store.has_any().await);
    }

    #[tokio::test]
    async fn test_sentinel_values_are_not_usable() {
        let (token_store, backend) = store();
        backend.set_secret(ACCESS_KEY, b"undefined").await.unwrap();
        backend.set_secret(REFRESH_KEY, b"null").await.unwrap();

        assert!(token_store.access().await.is_none());
        assert!(token_store.refresh().await.is_none());
        // Present but unusable still counts as a session to end
        assert!(token_store.has_any().await);
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let (token_store, _) = store();
        token_store.set(&CredentialPair::new("A1", "R1")).await.unwrap();

        token_store.clear().await;
        token_store.clear().await;

        assert!(token_store.get().await.is_none());
        assert!(!token_store.has_any().await);
    }

    #[tokio::test]
    async fn test_read_failure_is_treated_as_absent() {
        let (token_store, backend) = store();
        token_store.set(&CredentialPair::new("A1", "R1")).await.unwrap();
        backend.fail_reads.store(true, Ordering::SeqCst);

        assert!(token_store.get().await.is_none());
        assert!(token_store.access().await.is_none());
    }

    #[tokio::test]
    async fn test_partial_write_is_rolled_back() {
        let (token_store, backend) = store();
        backend.fail_refresh_writes.store(true, Ordering::SeqCst);

        let result = token_store.set(&CredentialPair::new("A1", "R1")).await;

        assert!(matches!(result, Err(AuthError::SecureStorageUnavailable(_))));
        assert!(!token_store.has_any().await);
    }

    #[tokio::test]
    async fn test_shared_handles_see_latest_write() {
        let (token_store, _) = store();
        let other = token_store.clone();

        token_store.set(&CredentialPair::new("A1", "R1")).await.unwrap();
        assert_eq!(other.access().await.as_deref(), Some("A1"));
    }
}
