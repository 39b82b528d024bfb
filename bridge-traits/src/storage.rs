//! Secure Storage Abstraction
//!
//! Provides a platform-agnostic trait for durable credential storage.

use async_trait::async_trait;

use crate::error::Result;

/// Secure credential storage trait
///
/// Abstracts secure storage mechanisms:
/// - macOS/iOS: Keychain
/// - Android: Keystore (hardware-backed when available)
/// - Windows: DPAPI
/// - Linux: Secret Service / libsecret
/// - Web: WebCrypto + encrypted localStorage/IndexedDB
///
/// # Security Requirements
///
/// Implementations MUST:
/// - Encrypt data at rest
/// - Use platform-provided secure storage when available
/// - Never log or expose sensitive data
///
/// Reads must observe the most recent write made through any handle to the
/// same store within the process.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SecureStore;
///
/// async fn store_token(store: &dyn SecureStore, token: &str) -> Result<()> {
///     store.set_secret("roma.access", token.as_bytes()).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Store a secret value
    ///
    /// # Arguments
    ///
    /// * `key` - Unique identifier for the secret
    /// * `value` - Secret data to store
    ///
    /// # Security
    ///
    /// - Value is encrypted before storage
    /// - Previous value is securely erased if it exists
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Retrieve a secret value
    ///
    /// # Returns
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete a secret
    ///
    /// Deleting a key that does not exist is not an error.
    async fn delete_secret(&self, key: &str) -> Result<()>;

    /// Check if a secret exists without retrieving it
    async fn has_secret(&self, key: &str) -> Result<bool> {
        Ok(self.get_secret(key).await?.is_some())
    }

    /// List all secret keys (without values)
    ///
    /// Useful for debugging or migration scenarios.
    async fn list_keys(&self) -> Result<Vec<String>>;

    /// Clear all secrets
    ///
    /// Use with caution! This will delete all stored secrets.
    async fn clear_all(&self) -> Result<()>;
}
