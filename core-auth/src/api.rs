//! Credential-issuing endpoints.
//!
//! Login, registration and refresh are sent straight to the transport, never
//! through the [`RequestPipeline`](crate::pipeline::RequestPipeline): they carry
//! no bearer credential, and a 401 from them means "wrong credentials", which
//! must not trigger a refresh.
//!
//! # Example
//!
//! ```no_run
//! use core_auth::{AuthApi, LoginRequest};
//! # async fn example(config: core_runtime::CoreConfig) -> core_auth::Result<()> {
//! let api = AuthApi::new(&config);
//! let issued = api.login(&LoginRequest::new("a@b.com", "x")).await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, RefreshError, Result};
use crate::types::{
    CredentialPair, LoginRequest, RegisterRequest, TokenResponse, TokenResponseShape,
};
use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use core_runtime::config::CoreConfig;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Exchanges a refresh credential for a new credential pair.
///
/// Implemented by [`AuthApi`]; the refresh coordinator only depends on this
/// trait.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Issue exactly one refresh call.
    async fn refresh(&self, refresh_token: &str) -> std::result::Result<CredentialPair, RefreshError>;
}

#[derive(Serialize)]
struct RefreshBody<'a> {
    refresh: &'a str,
}

/// Wire client for `/auth/login`, `/auth/register` and `/auth/refresh`.
pub struct AuthApi {
    http_client: Arc<dyn HttpClient>,
    login_url: String,
    register_url: String,
    refresh_url: String,
    timeout: Duration,
    shape: TokenResponseShape,
}

impl AuthApi {
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            http_client: Arc::clone(&config.http_client),
            login_url: config.endpoint(&config.login_path),
            register_url: config.endpoint(&config.register_path),
            refresh_url: config.endpoint(&config.refresh_path),
            timeout: config.request_timeout,
            shape: config.token_response_shape,
        }
    }

    /// Exchange email and password for a credential pair.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Transport`] if no response was received
    /// - [`AuthError::Http`] for any non-success status, including 401 for bad credentials
    /// - [`AuthError::UnrecognizedTokenResponse`] if the body is not in the configured shape
    #[instrument(skip(self, request))]
    pub async fn login(&self, request: &LoginRequest) -> Result<TokenResponse> {
        debug!("Sending login request");
        self.issue(&self.login_url, request).await
    }

    /// Create an account and receive its first credential pair.
    ///
    /// Same contract as [`login`](Self::login).
    #[instrument(skip(self, request))]
    pub async fn register(&self, request: &RegisterRequest) -> Result<TokenResponse> {
        debug!("Sending registration request");
        self.issue(&self.register_url, request).await
    }

    async fn issue<B: Serialize>(&self, url: &str, body: &B) -> Result<TokenResponse> {
        let response = self.post(url, body).await?;

        if !response.is_success() {
            let error = AuthError::from_response(&response);
            warn!(status = response.status, error = %error, "Credential request rejected");
            return Err(error);
        }

        TokenResponse::parse(&response.body, self.shape).map_err(|reason| {
            warn!(reason = %reason, "Credential response not recognized");
            AuthError::UnrecognizedTokenResponse(reason)
        })
    }

    async fn post<B: Serialize>(&self, url: &str, body: &B) -> Result<HttpResponse> {
        let request = HttpRequest::new(HttpMethod::Post, url)
            .timeout(self.timeout)
            .json(body)
            .map_err(|e| AuthError::Serialization(e.to_string()))?;

        Ok(self.http_client.execute(request).await?)
    }
}

#[async_trait]
impl TokenRefresher for AuthApi {
    #[instrument(skip(self, refresh_token))]
    async fn refresh(&self, refresh_token: &str) -> std::result::Result<CredentialPair, RefreshError> {
        debug!("Refreshing credentials");

        let response = self
            .post(&self.refresh_url, &RefreshBody { refresh: refresh_token })
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        if !response.is_success() {
            warn!(status = response.status, "Refresh rejected by server");
            return Err(RefreshError::Rejected {
                status: response.status,
            });
        }

        let issued = TokenResponse::parse(&response.body, self.shape)
            .map_err(RefreshError::InvalidResponse)?;

        info!("Credentials refreshed");
        Ok(issued.credentials)
    }
}
