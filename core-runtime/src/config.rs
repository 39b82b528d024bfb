//! # Core Configuration Module
//!
//! Provides configuration management for the authenticated API client.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds all necessary dependencies and settings for the client.
//! It enforces fail-fast validation to ensure all required bridges are provided
//! and every endpoint is well formed before anything talks to the network.
//!
//! ## Required Dependencies
//!
//! - `HttpClient` - Single-attempt transport for all API calls
//! - `SecureStore` - Durable storage for the credential pair
//!
//! When the `desktop-shims` feature is enabled, desktop-ready defaults
//! (`ReqwestHttpClient`, `KeyringSecureStore`) are injected automatically if
//! not provided.
//!
//! ## Settings
//!
//! | Setting                | Default                                   |
//! |------------------------|-------------------------------------------|
//! | `base_url`             | `$ROMA_API_BASE`, else `http://localhost:8080` |
//! | `request_timeout`      | 15 s                                      |
//! | `login_path`           | `/auth/login`                             |
//! | `register_path`        | `/auth/register`                          |
//! | `refresh_path`         | `/auth/refresh`                           |
//! | `me_path`              | `/me`                                     |
//! | `token_response_shape` | `Nested` (`{"tokens":{"access","refresh"}}`) |
//! | `event_buffer`         | 100                                       |
//!
//! ## Usage
//!
//! ### Basic Configuration with Desktop Defaults
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .base_url("https://api.example.com")
//!     .build()
//!     .expect("Failed to build config");
//! ```
//!
//! ### Configuration with Custom Bridges
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, TokenResponseShape};
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .base_url("https://api.example.com")
//!     .http_client(Arc::new(MyHttpClient))
//!     .secure_store(Arc::new(MySecureStore))
//!     .token_response_shape(TokenResponseShape::Flat)
//!     .build()?;
//! ```
//!
//! ## Error Handling
//!
//! Missing bridges produce [`Error::CapabilityMissing`] with an actionable
//! message; invalid values produce [`Error::Config`].

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{HttpClient, SecureStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Environment variable consulted for the default API base URL.
pub const BASE_URL_ENV: &str = "ROMA_API_BASE";

/// Base URL used when neither the builder nor the environment provides one.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Default overall timeout for a single request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub const DEFAULT_LOGIN_PATH: &str = "/auth/login";
pub const DEFAULT_REGISTER_PATH: &str = "/auth/register";
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";
pub const DEFAULT_ME_PATH: &str = "/me";

/// Layout of the credential pair in login, register and refresh responses.
///
/// Exactly one layout is accepted per configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenResponseShape {
    /// `{"tokens": {"access": "...", "refresh": "..."}}`
    #[default]
    Nested,
    /// `{"access": "...", "refresh": "..."}`
    Flat,
}

/// Core configuration for the authenticated API client.
///
/// This struct holds all dependencies and settings required to initialize
/// the client. Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Root of the API; endpoint paths are appended to it
    pub base_url: Url,

    /// Overall timeout applied to every request
    pub request_timeout: Duration,

    /// Path of the credential-issuing login call
    pub login_path: String,

    /// Path of the account registration call
    pub register_path: String,

    /// Path of the refresh call; a 401 from this path is always terminal
    pub refresh_path: String,

    /// Path of the current-user call
    pub me_path: String,

    /// Accepted layout of credential responses
    pub token_response_shape: TokenResponseShape,

    /// Buffer size for event stream subscribers
    pub event_buffer: usize,

    /// HTTP transport
    pub http_client: Arc<dyn HttpClient>,

    /// Durable credential storage
    pub secure_store: Arc<dyn SecureStore>,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("base_url", &self.base_url.as_str())
            .field("request_timeout", &self.request_timeout)
            .field("login_path", &self.login_path)
            .field("register_path", &self.register_path)
            .field("refresh_path", &self.refresh_path)
            .field("me_path", &self.me_path)
            .field("token_response_shape", &self.token_response_shape)
            .field("event_buffer", &self.event_buffer)
            .field("http_client", &"<HttpClient>")
            .field("secure_store", &"<SecureStore>")
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder();
    /// ```
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Absolute URL for an endpoint path such as `/me`.
    ///
    /// A path prefix on the base URL is kept: with a base of
    /// `https://host/api`, `/me` resolves to `https://host/api/me`.
    pub fn endpoint(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - The base URL is http(s) with a host
    /// - The timeout is non-zero
    /// - Every endpoint path starts with `/`
    /// - The event buffer is non-zero
    pub fn validate(&self) -> Result<()> {
        validate_base_url(&self.base_url)?;

        if self.request_timeout.is_zero() {
            return Err(Error::Config(
                "Request timeout must be greater than zero".to_string(),
            ));
        }

        for (name, path) in [
            ("login_path", &self.login_path),
            ("register_path", &self.register_path),
            ("refresh_path", &self.refresh_path),
            ("me_path", &self.me_path),
        ] {
            if !path.starts_with('/') {
                return Err(Error::Config(format!(
                    "{} must start with '/', got {:?}",
                    name, path
                )));
            }
        }

        if self.event_buffer == 0 {
            return Err(Error::Config(
                "Event buffer must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

fn join_url(base: &Url, path: &str) -> String {
    format!("{}{}", base.as_str().trim_end_matches('/'), path)
}

fn validate_base_url(url: &Url) -> Result<()> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::Config(format!(
            "Base URL must use http or https, got {:?}",
            url.scheme()
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(Error::Config("Base URL must include a host".to_string()));
    }
    Ok(())
}

fn parse_base_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| Error::Config(format!("Invalid base URL {:?}: {}", raw, e)))?;
    validate_base_url(&url)?;
    Ok(url)
}

/// Picks the base URL: explicit value, then environment, then the built-in default.
fn resolve_base_url(explicit: Option<String>, env: Option<String>) -> String {
    explicit
        .or_else(|| env.filter(|value| !value.trim().is_empty()))
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
}

#[cfg(not(feature = "desktop-shims"))]
fn http_client_missing_error() -> Error {
    Error::capability_missing(
        "HttpClient",
        "every API call needs a transport. Enable the 'desktop-shims' feature to use \
         ReqwestHttpClient, or inject the host's HTTP stack with `http_client(..)`.",
    )
}

#[cfg(not(feature = "desktop-shims"))]
fn secure_store_missing_error() -> Error {
    Error::capability_missing(
        "SecureStore",
        "the access/refresh credential pair must be persisted. Enable the 'desktop-shims' \
         feature to use the OS keychain (KeyringSecureStore), or inject a Keychain/Keystore \
         backed store with `secure_store(..)`.",
    )
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client(timeout: Duration) -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client = ReqwestHttpClient::with_timeout(timeout).map_err(|e| {
        Error::BridgeInit {
            capability: "HttpClient".to_string(),
            message: e.to_string(),
        }
    })?;
    let client: Arc<dyn HttpClient> = Arc::new(client);
    Ok(client)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client(_timeout: Duration) -> Result<Arc<dyn HttpClient>> {
    Err(http_client_missing_error())
}

#[cfg(feature = "desktop-shims")]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    use bridge_desktop::KeyringSecureStore;

    let store: Arc<dyn SecureStore> = Arc::new(KeyringSecureStore::new());
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    Err(secure_store_missing_error())
}

/// Builder for constructing [`CoreConfig`] instances.
///
/// Use this builder to incrementally set configuration options and then
/// call [`build()`](CoreConfigBuilder::build) to create the final config.
#[derive(Default)]
pub struct CoreConfigBuilder {
    base_url: Option<String>,
    request_timeout: Option<Duration>,
    login_path: Option<String>,
    register_path: Option<String>,
    refresh_path: Option<String>,
    me_path: Option<String>,
    token_response_shape: Option<TokenResponseShape>,
    event_buffer: Option<usize>,
    http_client: Option<Arc<dyn HttpClient>>,
    secure_store: Option<Arc<dyn SecureStore>>,
}

impl CoreConfigBuilder {
    /// Sets the API base URL.
    ///
    /// # Arguments
    ///
    /// * `url` - Absolute http(s) URL, optionally with a path prefix
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder()
    ///     .base_url("https://api.example.com");
    /// ```
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the overall timeout for a single request.
    ///
    /// Default: 15 seconds
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the login endpoint path.
    pub fn login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = Some(path.into());
        self
    }

    /// Sets the registration endpoint path.
    pub fn register_path(mut self, path: impl Into<String>) -> Self {
        self.register_path = Some(path.into());
        self
    }

    /// Sets the refresh endpoint path.
    pub fn refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = Some(path.into());
        self
    }

    /// Sets the current-user endpoint path.
    pub fn me_path(mut self, path: impl Into<String>) -> Self {
        self.me_path = Some(path.into());
        self
    }

    /// Sets which credential response layout the backend uses.
    ///
    /// Default: [`TokenResponseShape::Nested`]
    pub fn token_response_shape(mut self, shape: TokenResponseShape) -> Self {
        self.token_response_shape = Some(shape);
        self
    }

    /// Sets the buffer size for event stream subscribers.
    ///
    /// Default: 100
    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = Some(capacity);
        self
    }

    /// Sets the HTTP client implementation.
    ///
    /// If not provided, the desktop default (reqwest-based) will be used when
    /// the `desktop-shims` feature is enabled.
    ///
    /// # Arguments
    ///
    /// * `client` - HTTP client implementation
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the secure store implementation.
    ///
    /// The secure store persists the credential pair. It must provide
    /// platform-appropriate security (Keychain on macOS/iOS, Keystore on
    /// Android, etc.). If not provided, the desktop keyring is used when the
    /// `desktop-shims` feature is enabled.
    ///
    /// # Arguments
    ///
    /// * `store` - Secure store implementation
    pub fn secure_store(mut self, store: Arc<dyn SecureStore>) -> Self {
        self.secure_store = Some(store);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Returns
    ///
    /// Returns `Ok(CoreConfig)` on success, or an error if:
    /// - Required bridges are missing and no platform default is available
    /// - The base URL does not parse or is not http(s)
    /// - Any other value is out of range
    ///
    /// # Examples
    ///
    /// ```ignore
    /// use core_runtime::config::CoreConfig;
    /// let config = CoreConfig::builder()
    ///     .base_url("https://api.example.com")
    ///     .build()?;
    /// # Ok::<(), core_runtime::Error>(())
    /// ```
    pub fn build(self) -> Result<CoreConfig> {
        let raw_base = resolve_base_url(self.base_url, std::env::var(BASE_URL_ENV).ok());
        let base_url = parse_base_url(&raw_base)?;

        let request_timeout = self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client(request_timeout)?,
        };

        let secure_store = match self.secure_store {
            Some(store) => store,
            None => provide_default_secure_store()?,
        };

        let config = CoreConfig {
            base_url,
            request_timeout,
            login_path: self
                .login_path
                .unwrap_or_else(|| DEFAULT_LOGIN_PATH.to_string()),
            register_path: self
                .register_path
                .unwrap_or_else(|| DEFAULT_REGISTER_PATH.to_string()),
            refresh_path: self
                .refresh_path
                .unwrap_or_else(|| DEFAULT_REFRESH_PATH.to_string()),
            me_path: self.me_path.unwrap_or_else(|| DEFAULT_ME_PATH.to_string()),
            token_response_shape: self.token_response_shape.unwrap_or_default(),
            event_buffer: self.event_buffer.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            http_client,
            secure_store,
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::{BridgeError, HttpRequest, HttpResponse};

    struct MockHttpClient;

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn execute(
            &self,
            _request: HttpRequest,
        ) -> std::result::Result<HttpResponse, BridgeError> {
            Ok(HttpResponse::new(200, "{}"))
        }
    }

    struct MockSecureStore;

    #[async_trait]
    impl SecureStore for MockSecureStore {
        async fn set_secret(
            &self,
            _key: &str,
            _value: &[u8],
        ) -> std::result::Result<(), BridgeError> {
            Ok(())
        }

        async fn get_secret(
            &self,
            _key: &str,
        ) -> std::result::Result<Option<Vec<u8>>, BridgeError> {
            Ok(None)
        }

        async fn delete_secret(&self, _key: &str) -> std::result::Result<(), BridgeError> {
            Ok(())
        }

        async fn list_keys(&self) -> std::result::Result<Vec<String>, BridgeError> {
            Ok(Vec::new())
        }

        async fn clear_all(&self) -> std::result::Result<(), BridgeError> {
            Ok(())
        }
    }

    fn builder() -> CoreConfigBuilder {
        CoreConfig::builder()
            .base_url("https://api.example.com")
            .http_client(Arc::new(MockHttpClient))
            .secure_store(Arc::new(MockSecureStore))
    }

    #[test]
    fn test_builder_defaults() {
        let config = builder().build().unwrap();

        assert_eq!(config.base_url.as_str(), "https://api.example.com/");
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(config.login_path, "/auth/login");
        assert_eq!(config.register_path, "/auth/register");
        assert_eq!(config.refresh_path, "/auth/refresh");
        assert_eq!(config.me_path, "/me");
        assert_eq!(config.token_response_shape, TokenResponseShape::Nested);
        assert_eq!(config.event_buffer, 100);
    }

    #[test]
    fn test_builder_overrides() {
        let config = builder()
            .request_timeout(Duration::from_secs(3))
            .refresh_path("/v2/token")
            .token_response_shape(TokenResponseShape::Flat)
            .event_buffer(8)
            .build()
            .unwrap();

        assert_eq!(config.request_timeout, Duration::from_secs(3));
        assert_eq!(config.refresh_path, "/v2/token");
        assert_eq!(config.token_response_shape, TokenResponseShape::Flat);
        assert_eq!(config.event_buffer, 8);
    }

    #[test]
    fn test_endpoint_joins_paths() {
        let config = builder().build().unwrap();
        assert_eq!(config.endpoint("/me"), "https://api.example.com/me");

        let prefixed = builder().base_url("https://host.example/api/").build().unwrap();
        assert_eq!(
            prefixed.endpoint("/auth/refresh"),
            "https://host.example/api/auth/refresh"
        );
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        assert!(matches!(
            builder().base_url("not a url").build(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            builder().base_url("ftp://files.example.com").build(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = builder().request_timeout(Duration::ZERO).build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_relative_path_rejected() {
        let result = builder().me_path("me").build();
        match result {
            Err(Error::Config(message)) => assert!(message.contains("me_path")),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_event_buffer_rejected() {
        assert!(matches!(
            builder().event_buffer(0).build(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_resolve_base_url_precedence() {
        assert_eq!(
            resolve_base_url(Some("https://a.example".into()), Some("https://b.example".into())),
            "https://a.example"
        );
        assert_eq!(
            resolve_base_url(None, Some("https://b.example".into())),
            "https://b.example"
        );
        assert_eq!(resolve_base_url(None, Some("  ".into())), DEFAULT_BASE_URL);
        assert_eq!(resolve_base_url(None, None), DEFAULT_BASE_URL);
    }

    #[test]
    fn test_token_response_shape_serde() {
        let shape: TokenResponseShape = serde_json::from_str("\"flat\"").unwrap();
        assert_eq!(shape, TokenResponseShape::Flat);
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_missing_bridges_report_capability() {
        let result = CoreConfig::builder()
            .base_url("https://api.example.com")
            .secure_store(Arc::new(MockSecureStore))
            .build();

        match result {
            Err(Error::CapabilityMissing { capability, .. }) => {
                assert_eq!(capability, "HttpClient")
            }
            other => panic!("expected capability error, got {:?}", other),
        }

        let result = CoreConfig::builder()
            .base_url("https://api.example.com")
            .http_client(Arc::new(MockHttpClient))
            .build();

        assert!(matches!(
            result,
            Err(Error::CapabilityMissing { ref capability, .. }) if capability == "SecureStore"
        ));
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_desktop_defaults_injected() {
        let config = CoreConfig::builder()
            .base_url("https://api.example.com")
            .build()
            .unwrap();

        assert_eq!(config.base_url.host_str(), Some("api.example.com"));
    }
}
