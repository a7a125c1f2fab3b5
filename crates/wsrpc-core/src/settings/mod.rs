//! Connection settings with layered sources.
//!
//! Settings are resolved from three layers (in priority order):
//! 1. **Compiled defaults**: [`ConnectionSettings::default()`]
//! 2. **Settings file**: a JSON document deep-merged over the defaults
//! 3. **Environment variables**: `WSRPC_*` overrides (highest priority)
//!
//! Nothing here is global: callers load a [`ConnectionSettings`] value and
//! hand it to whatever builds the connection.

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, apply_overrides_from, deep_merge, load_settings_from_path};
pub use types::{ConnectionSettings, ProxyAuthSettings, TransportSettings};
