//! # Single-Flight Credential Refresh
//!
//! The [`RefreshCoordinator`] guarantees that at most one refresh call is in
//! flight at any time, however many requests fail with 401 around the same
//! moment.
//!
//! ## State Machine
//!
//! ```text
//!            ensure_refreshed()                 refresh settles
//!   ┌──────┐ ─────────────────> ┌────────────┐ ────────────────> ┌──────┐
//!   │ Idle │                    │ Refreshing │  drain waiters    │ Idle │
//!   └──────┘                    └────────────┘  front-to-back    └──────┘
//!                                 │      ▲
//!                                 └──────┘
//!                       ensure_refreshed(): enqueue waiter
//! ```
//!
//! The first caller (the leader) performs the refresh. Callers arriving while
//! it runs become waiters: each gets a one-shot channel and is settled with the
//! leader's outcome, in arrival order, when the episode ends.
//!
//! ## Locking
//!
//! The flag and the waiter queue live together behind one `std::sync::Mutex`.
//! "Check flag, set flag or enqueue" is a single critical section, and so is
//! "drain queue, clear flag". Neither section contains an `.await`.
//!
//! ## Failure
//!
//! When a refresh fails the coordinator publishes `auth:refresh:failed` and
//! ends the session (store cleared, one `auth:logout`) before any waiter learns
//! of the failure. If the leader is cancelled mid-refresh, every waiter is
//! settled with [`RefreshError::Abandoned`] and the coordinator returns to idle.

use crate::api::TokenRefresher;
use crate::error::RefreshError;
use crate::session::SessionTerminator;
use crate::token_store::TokenStore;
use core_runtime::events::{AuthEvent, EventBus, LogoutReason};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};

type RefreshOutcome = Result<(), RefreshError>;

#[derive(Default)]
struct RefreshState {
    refreshing: bool,
    // Non-empty only while `refreshing` is set
    waiters: VecDeque<oneshot::Sender<RefreshOutcome>>,
}

enum Role {
    Leader,
    Waiter(oneshot::Receiver<RefreshOutcome>),
}

/// Owns the single-flight refresh protocol.
///
/// Construct one per process and share it (behind an `Arc`) with every
/// [`RequestPipeline`](crate::pipeline::RequestPipeline).
pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
    token_store: TokenStore,
    refresher: Arc<dyn TokenRefresher>,
    terminator: Arc<SessionTerminator>,
    event_bus: EventBus,
}

impl RefreshCoordinator {
    pub fn new(
        token_store: TokenStore,
        refresher: Arc<dyn TokenRefresher>,
        terminator: Arc<SessionTerminator>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            state: Mutex::new(RefreshState::default()),
            token_store,
            refresher,
            terminator,
            event_bus,
        }
    }

    /// Make sure the stored credentials have been refreshed since this call began.
    ///
    /// Starts a refresh if none is running, otherwise waits for the running one.
    /// Every caller of one episode observes the same outcome.
    ///
    /// # Errors
    ///
    /// Returns the episode's [`RefreshError`]. By the time it is returned the
    /// session has already been ended, except for [`RefreshError::Abandoned`].
    pub async fn ensure_refreshed(&self) -> RefreshOutcome {
        let role = {
            let mut state = self.lock_state();
            if state.refreshing {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                Role::Waiter(rx)
            } else {
                state.refreshing = true;
                Role::Leader
            }
        };

        match role {
            Role::Waiter(rx) => {
                debug!("Refresh already in flight; waiting for it");
                rx.await.unwrap_or(Err(RefreshError::Abandoned))
            }
            Role::Leader => self.lead().await,
        }
    }

    /// Whether a refresh episode is in progress.
    pub fn is_refreshing(&self) -> bool {
        self.lock_state().refreshing
    }

    /// Number of callers waiting on the current episode.
    pub fn pending_waiters(&self) -> usize {
        self.lock_state().waiters.len()
    }

    #[instrument(skip(self))]
    async fn lead(&self) -> RefreshOutcome {
        let episode = Episode {
            coordinator: self,
            open: true,
        };

        let outcome = self.refresh_credentials().await;

        if let Err(error) = &outcome {
            warn!(error = %error, "Credential refresh failed; ending session");
            let _ = self.event_bus.emit(AuthEvent::RefreshFailed);
            self.terminator.terminate(LogoutReason::Unauthorized).await;
        }

        episode.close(outcome.clone());
        outcome
    }

    async fn refresh_credentials(&self) -> RefreshOutcome {
        let Some(refresh_token) = self.token_store.refresh().await else {
            debug!("No usable refresh credential; skipping network call");
            return Err(RefreshError::NoRefreshToken);
        };

        let pair = self.refresher.refresh(&refresh_token).await?;

        self.token_store
            .set(&pair)
            .await
            .map_err(|e| RefreshError::Storage(e.to_string()))?;
        self.terminator.establish().await;

        info!("Refresh episode succeeded");
        Ok(())
    }

    /// Drain every waiter front-to-back and return to idle.
    fn settle(&self, outcome: RefreshOutcome) {
        let mut state = self.lock_state();
        let waiters = std::mem::take(&mut state.waiters);
        debug!(waiters = waiters.len(), ok = outcome.is_ok(), "Settling refresh waiters");
        for waiter in waiters {
            // A waiter whose caller went away is simply skipped
            let _ = waiter.send(outcome.clone());
        }
        state.refreshing = false;
    }

    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Settles the episode with `Abandoned` if the leader's future is dropped.
struct Episode<'a> {
    coordinator: &'a RefreshCoordinator,
    open: bool,
}

impl Episode<'_> {
    fn close(mut self, outcome: RefreshOutcome) {
        self.open = false;
        self.coordinator.settle(outcome);
    }
}

impl Drop for Episode<'_> {
    fn drop(&mut self) {
        if self.open {
            warn!("Refresh leader dropped mid-episode; releasing waiters");
            self.coordinator.settle(Err(RefreshError::Abandoned));
        }
    }
}
