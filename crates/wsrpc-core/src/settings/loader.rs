//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::Path;

use serde_json::Value;
use tracing::{debug, warn};

use super::errors::Result;
use super::types::ConnectionSettings;

/// Load settings from a JSON file, then apply `WSRPC_*` env var overrides.
///
/// A missing file yields the compiled defaults; a file with invalid JSON is
/// an error.
pub fn load_settings_from_path(path: &Path) -> Result<ConnectionSettings> {
    let defaults = serde_json::to_value(ConnectionSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading connection settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: ConnectionSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `WSRPC_*` environment variable overrides.
pub fn apply_env_overrides(settings: &mut ConnectionSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup` (an env-like key/value source).
///
/// Invalid values are ignored with a warning, leaving the file/default value.
pub fn apply_overrides_from(
    settings: &mut ConnectionSettings,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let read_string = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let read_parsed = |name: &str, parse: fn(&str) -> Option<u64>| {
        let val = lookup(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid numeric env var, ignoring");
        }
        result
    };

    if let Some(v) = read_string("WSRPC_URL") {
        settings.url = v;
    }
    if let Some(v) = read_string("WSRPC_IDENTITY") {
        settings.identity = Some(v);
    }
    if let Some(v) = read_string("WSRPC_NAME") {
        settings.name = v;
    }
    if let Some(val) = lookup("WSRPC_DEBUG") {
        match parse_bool(&val) {
            Some(v) => settings.debug = v,
            None => warn!(key = "WSRPC_DEBUG", value = %val, "invalid boolean env var, ignoring"),
        }
    }
    if let Some(val) = lookup("WSRPC_FAIL_ERROR_FRAMES") {
        match parse_bool(&val) {
            Some(v) => settings.fail_error_frames = v,
            None => warn!(
                key = "WSRPC_FAIL_ERROR_FRAMES",
                value = %val,
                "invalid boolean env var, ignoring"
            ),
        }
    }

    let transport = &mut settings.transport;
    if let Some(v) = read_parsed("WSRPC_TIMEOUT_MS", |s| parse_u64_range(s, 1, 3_600_000)) {
        transport.timeout_ms = v;
    }
    // 0 disables the optional timers
    if let Some(v) = read_parsed("WSRPC_HEARTBEAT_MS", |s| parse_u64_range(s, 0, 3_600_000)) {
        transport.heartbeat_ms = (v > 0).then_some(v);
    }
    if let Some(v) = read_parsed("WSRPC_RECEIVE_TIMEOUT_MS", |s| {
        parse_u64_range(s, 0, 86_400_000)
    }) {
        transport.receive_timeout_ms = (v > 0).then_some(v);
    }
    if let Some(v) = read_parsed("WSRPC_MAX_MSG_SIZE", |s| {
        parse_u64_range(s, 1024, 1 << 30)
    }) {
        transport.max_msg_size = usize::try_from(v).unwrap_or(transport.max_msg_size);
    }
    if let Some(v) = read_string("WSRPC_PROXY") {
        transport.proxy = Some(v);
    }
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
