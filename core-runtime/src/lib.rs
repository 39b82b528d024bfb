//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the authenticated API client:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus for session lifecycle notifications
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that `core-auth` depends on.
//! It establishes the logging conventions, configuration validation and event
//! broadcasting mechanisms used throughout the client.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{CoreConfig, CoreConfigBuilder, TokenResponseShape};
pub use error::{Error, Result};
pub use events::{AuthEvent, EventBus, LogoutReason, Subscription};
