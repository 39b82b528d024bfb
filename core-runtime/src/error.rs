//! Errors raised while assembling the client runtime.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A setting is malformed or out of range.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A host bridge was not injected and no platform default is compiled in.
    #[error("Missing {capability} bridge: {message}")]
    CapabilityMissing { capability: String, message: String },

    /// A platform default bridge exists but could not be constructed.
    #[error("Failed to initialize default {capability}: {message}")]
    BridgeInit { capability: String, message: String },
}

impl Error {
    /// Shorthand for [`Error::CapabilityMissing`].
    pub fn capability_missing(capability: &str, message: impl Into<String>) -> Self {
        Error::CapabilityMissing {
            capability: capability.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
