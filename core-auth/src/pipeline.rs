//! # Authenticated Request Pipeline
//!
//! Every outbound API call goes through [`RequestPipeline::send`].
//!
//! ## Overview
//!
//! For each request the pipeline:
//!
//! 1. Attaches the stored access credential as a bearer header when one is
//!    usable. Requests without a credential are still sent.
//! 2. Returns any non-401 outcome to the caller unchanged (2xx as `Ok`,
//!    everything else as [`AuthError::Http`], transport failures as
//!    [`AuthError::Transport`]).
//! 3. On a 401, either ends the session (the refresh call itself failed, or
//!    the request was already replayed once) or has the
//!    [`RefreshCoordinator`] refresh the credentials and replays the request
//!    exactly once with the new access credential.
//!
//! A request whose 401 arrives after another request already rotated the
//! credentials is replayed straight away without starting a new refresh.
//!
//! ## Usage
//!
//! ```no_run
//! use core_auth::{RequestPipeline, UserProfile};
//! # async fn example(pipeline: &RequestPipeline) -> core_auth::Result<()> {
//! let me: UserProfile = pipeline.get_json("/me").await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, RefreshError, Result};
use crate::refresh::RefreshCoordinator;
use crate::session::SessionTerminator;
use crate::token_store::TokenStore;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, AUTHORIZATION};
use core_runtime::config::CoreConfig;
use core_runtime::events::LogoutReason;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info_span, warn, Instrument};
use url::Url;
use uuid::Uuid;

/// A request on its way through the pipeline.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub request: HttpRequest,
    /// Set once the request has been replayed after a 401.
    pub retried: bool,
    /// Access credential attached on the most recent send.
    pub sent_with: Option<String>,
}

impl OutboundRequest {
    pub fn new(request: HttpRequest) -> Self {
        Self {
            request,
            retried: false,
            sent_with: None,
        }
    }

    /// Set the retry marker. Returns `false` if it was already set.
    pub fn mark_retried(&mut self) -> bool {
        if self.retried {
            return false;
        }
        self.retried = true;
        true
    }

    /// Attach `access` as the bearer credential, or drop the header when `None`.
    pub fn attach(&mut self, access: Option<String>) {
        match &access {
            Some(token) => self.request.set_bearer_token(token),
            None => {
                self.request.remove_header(AUTHORIZATION);
            }
        }
        self.sent_with = access;
    }
}

/// Sends requests with the current credentials and recovers from expired ones.
pub struct RequestPipeline {
    config: CoreConfig,
    http_client: Arc<dyn HttpClient>,
    token_store: TokenStore,
    coordinator: Arc<RefreshCoordinator>,
    terminator: Arc<SessionTerminator>,
    refresh_path: String,
}

impl RequestPipeline {
    pub fn new(
        config: &CoreConfig,
        token_store: TokenStore,
        coordinator: Arc<RefreshCoordinator>,
        terminator: Arc<SessionTerminator>,
    ) -> Self {
        let refresh_url = config.endpoint(&config.refresh_path);
        let refresh_path = path_of(&refresh_url);

        Self {
            config: config.clone(),
            http_client: Arc::clone(&config.http_client),
            token_store,
            coordinator,
            terminator,
            refresh_path,
        }
    }

    /// Send a request with credential attachment and 401 recovery.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Transport`] if no response was received
    /// - [`AuthError::Http`] for a non-2xx response, including a terminal 401
    /// - [`AuthError::SessionExpired`] if a 401 could not be recovered because
    ///   the refresh failed; the session has already been ended
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let span = info_span!(
            "api_request",
            request_id = %Uuid::new_v4(),
            method = %request.method,
            path = %path_of(&request.url),
        );

        self.dispatch(OutboundRequest::new(request))
            .instrument(span)
            .await
    }

    async fn dispatch(&self, mut outbound: OutboundRequest) -> Result<HttpResponse> {
        if outbound.request.timeout.is_none() {
            outbound.request.timeout = Some(self.config.request_timeout);
        }

        loop {
            outbound.attach(self.token_store.access().await);

            let response = self.http_client.execute(outbound.request.clone()).await?;

            if !response.is_unauthorized() {
                if response.is_success() {
                    debug!(status = response.status, "Request succeeded");
                    return Ok(response);
                }
                debug!(status = response.status, "Request failed");
                return Err(AuthError::from_response(&response));
            }

            let original = AuthError::from_response(&response);

            if self.is_refresh_call(&outbound.request.url) || outbound.retried {
                warn!(
                    retried = outbound.retried,
                    "Unauthorized response is terminal; ending session"
                );
                self.terminator.terminate(LogoutReason::Unauthorized).await;
                return Err(original);
            }

            let current = self.token_store.access().await;
            if current.is_some() && current != outbound.sent_with {
                debug!("Credentials rotated since this request was sent; replaying");
                outbound.mark_retried();
                continue;
            }

            match self.coordinator.ensure_refreshed().await {
                Ok(()) => {
                    debug!("Credentials refreshed; replaying request");
                    outbound.mark_retried();
                }
                Err(RefreshError::Abandoned) => {
                    warn!("Refresh abandoned; returning original response");
                    return Err(original);
                }
                Err(cause) => {
                    return Err(AuthError::SessionExpired {
                        original: Box::new(original),
                        cause,
                    });
                }
            }
        }
    }

    /// Whether `url` targets the configured refresh endpoint.
    pub fn is_refresh_call(&self, url: &str) -> bool {
        path_of(url) == self.refresh_path
    }

    /// `GET` a JSON resource.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(self.json_request(HttpMethod::Get, path)).await?;
        decode(&response)
    }

    /// `POST` a JSON body and decode the JSON response.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(HttpMethod::Post, path, body).await
    }

    /// `PUT` a JSON body and decode the JSON response.
    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(HttpMethod::Put, path, body).await
    }

    /// `PATCH` a JSON body and decode the JSON response.
    pub async fn patch_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(HttpMethod::Patch, path, body).await
    }

    /// `DELETE` a resource. The raw response is returned since bodies vary.
    pub async fn delete(&self, path: &str) -> Result<HttpResponse> {
        self.send(self.json_request(HttpMethod::Delete, path)).await
    }

    async fn send_json<B, T>(&self, method: HttpMethod, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self
            .json_request(method, path)
            .json(body)
            .map_err(|e| AuthError::Serialization(e.to_string()))?;
        let response = self.send(request).await?;
        decode(&response)
    }

    fn json_request(&self, method: HttpMethod, path: &str) -> HttpRequest {
        HttpRequest::new(method, self.resolve(path)).header("Accept", "application/json")
    }

    /// Absolute URLs pass through; anything else is relative to the base URL.
    fn resolve(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if path.starts_with('/') {
            self.config.endpoint(path)
        } else {
            self.config.endpoint(&format!("/{}", path))
        }
    }
}

fn decode<T: DeserializeOwned>(response: &HttpResponse) -> Result<T> {
    // An empty body decodes as `null` so `()` and `Option<T>` work
    let body: &[u8] = if response.body.is_empty() {
        b"null"
    } else {
        &response.body
    };
    serde_json::from_slice(body).map_err(|e| AuthError::Serialization(e.to_string()))
}

fn path_of(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    }
}
