//! # Authentication Manager
//!
//! Session facade wiring together the credential store, the refresh
//! coordinator, the request pipeline and the event bus.
//!
//! ## Overview
//!
//! The `AuthManager` is what application code holds on to. It signs users in
//! and out, answers "who am I", and hands out the shared
//! [`RequestPipeline`] for every other API call.
//!
//! ## Events
//!
//! | Operation                    | Event published                        |
//! |------------------------------|----------------------------------------|
//! | `login` / `register`         | `auth:login`                           |
//! | `logout` with a session      | `auth:logout` `{reason: "user"}`       |
//! | refresh failure              | `auth:refresh:failed`, then `auth:logout` `{reason: "unauthorized"}` |
//! | terminal 401                 | `auth:logout` `{reason: "unauthorized"}`, once until the next sign-in |
//!
//! ## Usage
//!
//! ```no_run
//! use core_auth::{AuthManager, LoginRequest};
//! use core_runtime::config::CoreConfig;
//! use core_runtime::events::{EventBus, LOGOUT};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CoreConfig::builder()
//!     .base_url("https://api.example.com")
//!     .build()?;
//! let manager = AuthManager::new(&config, EventBus::new(config.event_buffer));
//!
//! let _on_logout = manager.events().on(LOGOUT, |event| {
//!     println!("signed out: {}", event.description());
//! });
//!
//! let session = manager.login(LoginRequest::new("a@b.com", "x")).await?;
//! let me = manager.current_user().await?;
//! manager.logout().await;
//! # Ok(())
//! # }
//! ```

use crate::api::AuthApi;
use crate::error::{AuthError, RefreshError, Result};
use crate::pipeline::RequestPipeline;
use crate::refresh::RefreshCoordinator;
use crate::session::SessionTerminator;
use crate::token_store::TokenStore;
use crate::types::{AuthSession, LoginRequest, RegisterRequest, TokenResponse, UserProfile};
use core_runtime::config::CoreConfig;
use core_runtime::events::{AuthEvent, EventBus, LogoutReason};
use core_runtime::logging::redact_if_sensitive;
use std::sync::Arc;
use tracing::{info, instrument};

/// Session facade for the authenticated API client.
pub struct AuthManager {
    api: Arc<AuthApi>,
    token_store: TokenStore,
    event_bus: EventBus,
    terminator: Arc<SessionTerminator>,
    coordinator: Arc<RefreshCoordinator>,
    pipeline: Arc<RequestPipeline>,
    me_path: String,
}

impl AuthManager {
    /// Creates a manager publishing on `event_bus`.
    ///
    /// # Arguments
    ///
    /// * `config` - Validated client configuration (bridges, endpoints, timeouts)
    /// * `event_bus` - Bus on which `auth:*` events are published
    pub fn new(config: &CoreConfig, event_bus: EventBus) -> Self {
        let token_store = TokenStore::new(Arc::clone(&config.secure_store));
        let api = Arc::new(AuthApi::new(config));
        let terminator = Arc::new(SessionTerminator::new(
            token_store.clone(),
            event_bus.clone(),
        ));
        let coordinator = Arc::new(RefreshCoordinator::new(
            token_store.clone(),
            api.clone(),
            Arc::clone(&terminator),
            event_bus.clone(),
        ));
        let pipeline = Arc::new(RequestPipeline::new(
            config,
            token_store.clone(),
            Arc::clone(&coordinator),
            Arc::clone(&terminator),
        ));

        Self {
            api,
            token_store,
            event_bus,
            terminator,
            coordinator,
            pipeline,
            me_path: config.me_path.clone(),
        }
    }

    /// Creates a manager with its own event bus sized from the configuration.
    pub fn from_config(config: &CoreConfig) -> Self {
        Self::new(config, EventBus::new(config.event_buffer))
    }

    /// Sign in with email and password.
    ///
    /// The request is sent directly, so a 401 here means wrong credentials
    /// and never starts a refresh.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Http`] if the server rejected the credentials
    /// - [`AuthError::UnrecognizedTokenResponse`] if the response lacks a usable pair
    /// - [`AuthError::SecureStorageUnavailable`] if the pair could not be persisted
    #[instrument(skip(self, request), fields(email = %redact_if_sensitive("email", &request.email)))]
    pub async fn login(&self, request: LoginRequest) -> Result<AuthSession> {
        let issued = self.api.login(&request).await?;
        self.establish(issued).await
    }

    /// Create an account and sign in with it.
    ///
    /// Same contract as [`login`](Self::login).
    #[instrument(skip(self, request), fields(email = %redact_if_sensitive("email", &request.email)))]
    pub async fn register(&self, request: RegisterRequest) -> Result<AuthSession> {
        let issued = self.api.register(&request).await?;
        self.establish(issued).await
    }

    async fn establish(&self, issued: TokenResponse) -> Result<AuthSession> {
        self.token_store.set(&issued.credentials).await?;
        self.terminator.establish().await;

        info!("Signed in");
        let _ = self.event_bus.emit(AuthEvent::Login);

        Ok(AuthSession {
            credentials: issued.credentials,
            user: issued.user,
        })
    }

    /// Sign out. Safe to call repeatedly; only the first call with an active
    /// session publishes `auth:logout`.
    pub async fn logout(&self) -> bool {
        self.terminator.terminate(LogoutReason::UserInitiated).await
    }

    /// Profile of the signed-in user, fetched through the pipeline.
    ///
    /// # Errors
    ///
    /// Any error of [`RequestPipeline::send`], or [`AuthError::Serialization`]
    /// if the profile could not be decoded.
    pub async fn current_user(&self) -> Result<UserProfile> {
        self.pipeline.get_json(&self.me_path).await
    }

    /// Whether a usable access credential is stored.
    ///
    /// Says nothing about whether the server still accepts it.
    pub async fn is_authenticated(&self) -> bool {
        self.token_store.access().await.is_some()
    }

    /// Refresh the credentials now, joining an in-flight refresh if one is running.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NotAuthenticated`] when no refresh credential is
    /// stored, and [`AuthError::SessionExpired`] for any other refresh failure.
    pub async fn refresh_session(&self) -> Result<()> {
        match self.coordinator.ensure_refreshed().await {
            Ok(()) => Ok(()),
            Err(RefreshError::NoRefreshToken) => Err(AuthError::NotAuthenticated),
            Err(cause) => Err(AuthError::SessionExpired {
                original: Box::new(AuthError::NotAuthenticated),
                cause,
            }),
        }
    }

    /// The shared pipeline for application API calls.
    pub fn pipeline(&self) -> Arc<RequestPipeline> {
        Arc::clone(&self.pipeline)
    }

    /// The bus on which `auth:*` events are published.
    pub fn events(&self) -> &EventBus {
        &self.event_bus
    }

    /// The underlying credential store.
    pub fn token_store(&self) -> &TokenStore {
        &self.token_store
    }
}
