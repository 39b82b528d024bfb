//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! This crate provides production-ready implementations of the bridge traits
//! using desktop-appropriate libraries:
//! - `HttpClient` using `reqwest`
//! - `SecureStore` using the `keyring` crate
//!
//! ## Feature Flags
//!
//! - `secure-store`: Enable OS keychain integration (default)
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{KeyringSecureStore, ReqwestHttpClient};
//!
//! #[tokio::main]
//! async fn main() {
//!     let http_client = ReqwestHttpClient::new()?;
//!     let secure_store = KeyringSecureStore::new();
//!
//!     // Use in core configuration
//! }
//! ```

mod http;

#[cfg(feature = "secure-store")]
mod secure_store;

pub use http::ReqwestHttpClient;

#[cfg(feature = "secure-store")]
pub use secure_store::KeyringSecureStore;
