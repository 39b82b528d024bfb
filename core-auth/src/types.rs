//! Authentication data types.

use serde::{Deserialize, Serialize};
use std::fmt;

pub use core_runtime::config::TokenResponseShape;

/// Literal values that mean "no credential" when they show up in storage.
pub const ABSENT_SENTINELS: [&str; 2] = ["undefined", "null"];

/// Whether a stored credential string can be sent to the server.
///
/// # Examples
///
/// ```
/// use core_auth::types::is_usable;
///
/// assert!(is_usable("A1"));
/// assert!(!is_usable(""));
/// assert!(!is_usable("null"));
/// ```
pub fn is_usable(value: &str) -> bool {
    !value.is_empty() && !ABSENT_SENTINELS.contains(&value)
}

/// Access and refresh credentials issued together by the server.
///
/// The Debug implementation never prints the credential values.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub access: String,
    pub refresh: String,
}

impl CredentialPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }
}

impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access", &"[REDACTED]")
            .field("refresh", &"[REDACTED]")
            .finish()
    }
}

/// Body of `POST /auth/login`.
#[derive(Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl LoginRequest {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Body of `POST /auth/register`.
#[derive(Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl RegisterRequest {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for RegisterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// The signed-in account as reported by the server.
///
/// `role` is only present on `GET /me`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Outcome of a successful login or registration.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub credentials: CredentialPair,
    pub user: Option<UserProfile>,
}

/// Credentials plus the optional profile carried by login, register and
/// refresh responses.
#[derive(Debug, Clone)]
pub struct TokenResponse {
    pub credentials: CredentialPair,
    pub user: Option<UserProfile>,
}

#[derive(Deserialize)]
struct WirePair {
    #[serde(default)]
    access: Option<String>,
    #[serde(default)]
    refresh: Option<String>,
}

#[derive(Deserialize)]
struct NestedBody {
    tokens: Option<WirePair>,
    #[serde(default)]
    user: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct FlatBody {
    #[serde(flatten)]
    pair: WirePair,
    #[serde(default)]
    user: Option<serde_json::Value>,
}

impl TokenResponse {
    /// Extracts the credential pair from a response body laid out as `shape`.
    ///
    /// Only the configured layout is accepted. The error string describes what
    /// was missing and never contains credential values.
    pub fn parse(body: &[u8], shape: TokenResponseShape) -> std::result::Result<Self, String> {
        let (pair, user) = match shape {
            TokenResponseShape::Nested => {
                let parsed: NestedBody = serde_json::from_slice(body)
                    .map_err(|e| format!("expected a JSON object: {}", e))?;
                let pair = parsed
                    .tokens
                    .ok_or_else(|| "missing \"tokens\" object".to_string())?;
                (pair, parsed.user)
            }
            TokenResponseShape::Flat => {
                let parsed: FlatBody = serde_json::from_slice(body)
                    .map_err(|e| format!("expected a JSON object: {}", e))?;
                (parsed.pair, parsed.user)
            }
        };

        let access = pair
            .access
            .filter(|value| is_usable(value))
            .ok_or_else(|| "missing or unusable \"access\" credential".to_string())?;
        let refresh = pair
            .refresh
            .filter(|value| is_usable(value))
            .ok_or_else(|| "missing or unusable \"refresh\" credential".to_string())?;

        // A malformed profile does not invalidate the credentials.
        let user = user.and_then(|value| serde_json::from_value(value).ok());

        Ok(Self {
            credentials: CredentialPair::new(access, refresh),
            user,
        })
    }
}
