//! # Authentication Module
//!
//! Credential lifecycle for the authenticated API client.
//!
//! ## Overview
//!
//! This crate attaches bearer credentials to outbound requests, recovers from
//! expired access credentials with a single shared refresh, and ends the
//! session cleanly when recovery is impossible.
//!
//! ## Features
//!
//! - Bearer attachment for every request sent through the [`RequestPipeline`]
//! - Single-flight refresh with FIFO fan-out to waiting requests
//! - At-most-once replay of a request after a 401
//! - Secure credential storage via platform-specific secure stores
//! - `auth:login`, `auth:logout` and `auth:refresh:failed` events

pub mod api;
pub mod error;
pub mod manager;
pub mod pipeline;
pub mod refresh;
pub mod session;
pub mod token_store;
pub mod types;

pub use api::{AuthApi, TokenRefresher};
pub use error::{AuthError, RefreshError, Result};
pub use manager::AuthManager;
pub use pipeline::{OutboundRequest, RequestPipeline};
pub use refresh::RefreshCoordinator;
pub use session::SessionTerminator;
pub use token_store::TokenStore;
pub use types::{
    is_usable, AuthSession, CredentialPair, LoginRequest, RegisterRequest, TokenResponse,
    TokenResponseShape, UserProfile,
};
