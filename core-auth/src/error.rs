use bridge_traits::{BridgeError, HttpResponse};
use thiserror::Error;

/// Why a credential refresh could not complete.
///
/// Cloned once per waiter when an episode fans out its result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("No usable refresh credential is stored")]
    NoRefreshToken,

    #[error("Refresh rejected by server with status {status}")]
    Rejected { status: u16 },

    #[error("Refresh request failed: {0}")]
    Transport(String),

    #[error("Refresh response not recognized: {0}")]
    InvalidResponse(String),

    #[error("Failed to persist refreshed credentials: {0}")]
    Storage(String),

    #[error("Refresh was abandoned before it completed")]
    Abandoned,
}

#[derive(Error, Debug)]
pub enum AuthError {
    /// No response was received.
    #[error("Transport error: {0}")]
    Transport(#[from] BridgeError),

    /// A response with a non-success status.
    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        body: String,
    },

    /// A 401 could not be recovered because the refresh failed.
    #[error("Session expired: {cause}")]
    SessionExpired {
        original: Box<AuthError>,
        #[source]
        cause: RefreshError,
    },

    #[error("Unrecognized token response: {0}")]
    UnrecognizedTokenResponse(String),

    #[error("Secure storage unavailable: {0}")]
    SecureStorageUnavailable(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),
}

impl AuthError {
    /// Builds an [`AuthError::Http`] from a non-success response.
    ///
    /// The message comes from the JSON error body (`message`, then `error`,
    /// then `detail`) and falls back to the status code.
    pub fn from_response(response: &HttpResponse) -> Self {
        let body = String::from_utf8_lossy(&response.body).into_owned();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|value| {
                ["message", "error", "detail"].iter().find_map(|key| {
                    value
                        .get(*key)
                        .and_then(|v| v.as_str())
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                })
            })
            .unwrap_or_else(|| format!("request failed with status {}", response.status));

        AuthError::Http {
            status: response.status,
            message,
            body,
        }
    }

    /// HTTP status behind this error, if a response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            AuthError::Http { status, .. } => Some(*status),
            AuthError::SessionExpired { original, .. } => original.status(),
            _ => None,
        }
    }

    /// Whether the server rejected the credential.
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
