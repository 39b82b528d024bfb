//! Workspace facade crate.
//!
//! Host applications can depend on `roma-client` and enable `desktop-shims` to
//! get the authenticated API client wired with the desktop bridges, without
//! depending on each workspace crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_auth as auth;
#[cfg(feature = "desktop-shims")]
pub use core_runtime as runtime;
