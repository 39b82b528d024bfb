//! Secure Credential Storage using OS Keychain

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::SecureStore,
};
use keyring::Entry;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error};

/// Keyring-based secure storage implementation
///
/// Uses platform-specific secure storage:
/// - macOS: Keychain
/// - Windows: Credential Manager (DPAPI)
/// - Linux: Secret Service (libsecret)
///
/// Keychain calls are blocking, so each one runs on the blocking thread pool.
#[derive(Clone)]
pub struct KeyringSecureStore {
    service_name: String,
    // The keychain cannot enumerate entries; remember what this handle wrote.
    known_keys: Arc<Mutex<BTreeSet<String>>>,
}

impl KeyringSecureStore {
    /// Create a new secure store with default service name
    pub fn new() -> Self {
        Self::with_service_name("roma-client")
    }

    /// Create a new secure store with custom service name
    pub fn with_service_name(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            known_keys: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    /// Convert keyring error to BridgeError
    fn map_keyring_error(e: keyring::Error) -> BridgeError {
        BridgeError::OperationFailed(format!("Keyring error: {}", e))
    }

    async fn with_entry<T, F>(&self, key: &str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Entry) -> Result<T> + Send + 'static,
    {
        let service = self.service_name.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            let entry = Entry::new(&service, &key).map_err(Self::map_keyring_error)?;
            op(entry)
        })
        .await
        .map_err(|e| BridgeError::OperationFailed(format!("Keyring task failed: {}", e)))?
    }

    fn remember(&self, key: &str) {
        self.known_keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string());
    }

    fn forget(&self, key: &str) {
        self.known_keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

impl Default for KeyringSecureStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecureStore for KeyringSecureStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        // Keyring only supports strings, so binary data is base64 encoded
        let encoded = base64::encode(value);

        self.with_entry(key, move |entry| {
            entry
                .set_password(&encoded)
                .map_err(Self::map_keyring_error)
        })
        .await?;

        self.remember(key);
        debug!(key = key, "Stored secret in keyring");
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let stored = self
            .with_entry(key, |entry| match entry.get_password() {
                Ok(encoded) => Ok(Some(encoded)),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(Self::map_keyring_error(e)),
            })
            .await?;

        let Some(encoded) = stored else {
            debug!(key = key, "Secret not found in keyring");
            return Ok(None);
        };

        let decoded = base64::decode(&encoded).map_err(|e| {
            error!(key = key, error = %e, "Failed to decode secret");
            BridgeError::OperationFailed(format!("Failed to decode secret: {}", e))
        })?;

        debug!(key = key, "Retrieved secret from keyring");
        Ok(Some(decoded))
    }

    async fn delete_secret(&self, key: &str) -> Result<()> {
        self.with_entry(key, |entry| match entry.delete_credential() {
            Ok(_) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(Self::map_keyring_error(e)),
        })
        .await?;

        self.forget(key);
        debug!(key = key, "Deleted secret from keyring");
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let keys = self
            .known_keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        Ok(keys)
    }

    async fn clear_all(&self) -> Result<()> {
        for key in self.list_keys().await? {
            self.delete_secret(&key).await?;
        }
        Ok(())
    }
}

mod base64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    pub fn encode(data: &[u8]) -> String {
        STANDARD.encode(data)
    }

    pub fn decode(data: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(data)
    }
}
