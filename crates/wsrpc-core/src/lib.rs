//! # wsrpc-core
//!
//! Ambient pieces shared by the wsrpc crates:
//! - [`logging`]: `tracing` subscriber setup and in-memory log capture for tests
//! - [`settings`]: layered connection settings (defaults, JSON file, `WSRPC_*` env vars)

#![deny(unsafe_code)]

pub mod logging;
pub mod settings;

pub use settings::types::DEFAULT_CONNECTION_NAME;
pub use settings::{
    ConnectionSettings, ProxyAuthSettings, SettingsError, TransportSettings, deep_merge,
    load_settings_from_path,
};
