//! Session termination.
//!
//! Every path that ends a session (a terminal 401, a failed refresh, a
//! user-initiated logout) goes through [`SessionTerminator`], so that any
//! number of concurrent terminal failures produce exactly one `auth:logout`.
//!
//! An unauthorized termination always publishes the first time it happens
//! after a session was established, whether or not anything was stored; a
//! caller with no credentials still needs to be sent to the login screen.
//! Repeats are silent until [`establish`](SessionTerminator::establish) is
//! called again by a login or a successful refresh. A user-initiated logout
//! only publishes when there was something stored to sign out of.

use crate::token_store::TokenStore;
use core_runtime::events::{AuthEvent, EventBus, LogoutReason};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Clears stored credentials and announces the end of the session once.
pub struct SessionTerminator {
    token_store: TokenStore,
    event_bus: EventBus,
    // Serialises check-clear-publish; holds whether the session already ended
    ended: Mutex<bool>,
}

impl SessionTerminator {
    pub fn new(token_store: TokenStore, event_bus: EventBus) -> Self {
        Self {
            token_store,
            event_bus,
            ended: Mutex::new(false),
        }
    }

    /// Start a new session episode, re-arming the logout announcement.
    pub async fn establish(&self) {
        *self.ended.lock().await = false;
    }

    /// End the current session.
    ///
    /// Always clears the credential store. Publishes `auth:logout` with
    /// `reason` at most once per session episode and returns whether it did.
    pub async fn terminate(&self, reason: LogoutReason) -> bool {
        let mut ended = self.ended.lock().await;

        let had_session = self.token_store.has_any().await;
        self.token_store.clear().await;

        let publish = match reason {
            LogoutReason::Unauthorized => !*ended,
            LogoutReason::UserInitiated => had_session,
        };
        *ended = true;

        if !publish {
            debug!(reason = %reason, had_session, "Session already ended");
            return false;
        }

        info!(reason = %reason, had_session, "Session terminated");
        let _ = self.event_bus.emit(AuthEvent::Logout { reason });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CredentialPair;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::storage::SecureStore;
    use core_runtime::events::LOGOUT;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct MemoryStore {
        storage: Mutex<HashMap<String, Vec<u8>>>,
    }

    #[async_trait::async_trait]
    impl SecureStore for MemoryStore {
        async fn set_secret(&self, key: &str, value: &[u8]) -> BridgeResult<()> {
            self.storage.lock().await.insert(key.to_string(), value.to_vec());
            Ok(())
        }

        async fn get_secret(&self, key: &str) -> BridgeResult<Option<Vec<u8>>> {
            Ok(self.storage.lock().await.get(key).cloned())
        }

        async fn delete_secret(&self, key: &str) -> BridgeResult<()> {
            self.storage.lock().await.remove(key);
            Ok(())
        }

        async fn list_keys(&self) -> BridgeResult<Vec<String>> {
            Ok(self.storage.lock().await.keys().cloned().collect())
        }

        async fn clear_all(&self) -> BridgeResult<()> {
            self.storage.lock().await.clear();
            Ok(())
        }
    }

    fn counting_bus() -> (EventBus, Arc<AtomicUsize>, core_runtime::Subscription) {
        let bus = EventBus::new(16);
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let subscription = bus.on(LOGOUT, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (bus, count, subscription)
    }

    #[tokio::test]
    async fn test_terminate_clears_and_publishes_once() {
        let token_store = TokenStore::new(Arc::new(MemoryStore::default()));
        token_store.set(&CredentialPair::new("A1", "R1")).await.unwrap();
        let (bus, logouts, _subscription) = counting_bus();
        let mut stream = bus.subscribe();
        let terminator = SessionTerminator::new(token_store.clone(), bus);

        assert!(terminator.terminate(LogoutReason::Unauthorized).await);
        assert!(!terminator.terminate(LogoutReason::Unauthorized).await);

        assert_eq!(logouts.load(Ordering::SeqCst), 1);
        assert!(token_store.get().await.is_none());
        assert_eq!(
            stream.recv().await.unwrap(),
            AuthEvent::Logout {
                reason: LogoutReason::Unauthorized
            }
        );
    }

    #[tokio::test]
    async fn test_user_logout_without_session_is_silent() {
        let token_store = TokenStore::new(Arc::new(MemoryStore::default()));
        let (bus, logouts, _subscription) = counting_bus();
        let terminator = SessionTerminator::new(token_store, bus);

        assert!(!terminator.terminate(LogoutReason::UserInitiated).await);
        assert_eq!(logouts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unauthorized_without_session_still_publishes_once() {
        let token_store = TokenStore::new(Arc::new(MemoryStore::default()));
        let (bus, logouts, _subscription) = counting_bus();
        let terminator = SessionTerminator::new(token_store, bus);

        assert!(terminator.terminate(LogoutReason::Unauthorized).await);
        assert!(!terminator.terminate(LogoutReason::Unauthorized).await);
        assert_eq!(logouts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_establish_rearms_logout() {
        let token_store = TokenStore::new(Arc::new(MemoryStore::default()));
        let (bus, logouts, _subscription) = counting_bus();
        let terminator = SessionTerminator::new(token_store.clone(), bus);

        assert!(terminator.terminate(LogoutReason::Unauthorized).await);

        token_store.set(&CredentialPair::new("A1", "R1")).await.unwrap();
        terminator.establish().await;

        assert!(terminator.terminate(LogoutReason::Unauthorized).await);
        assert_eq!(logouts.load(Ordering::SeqCst), 2);
        assert!(!token_store.has_any().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_terminations_publish_one_logout() {
        let token_store = TokenStore::new(Arc::new(MemoryStore::default()));
        token_store.set(&CredentialPair::new("A1", "R1")).await.unwrap();
        let (bus, logouts, _subscription) = counting_bus();
        let terminator = Arc::new(SessionTerminator::new(token_store, bus));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let terminator = Arc::clone(&terminator);
                tokio::spawn(async move { terminator.terminate(LogoutReason::Unauthorized).await })
            })
            .collect();

        let mut published = 0;
        for handle in handles {
            if handle.await.unwrap() {
                published += 1;
            }
        }

        assert_eq!(published, 1);
        assert_eq!(logouts.load(Ordering::SeqCst), 1);
    }
}
