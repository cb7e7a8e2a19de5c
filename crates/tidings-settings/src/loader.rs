//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::TidingsSettings;

/// Resolve the settings file path: `TIDINGS_SETTINGS` if set, else
/// `~/.tidings/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(p) = read_env_string("TIDINGS_SETTINGS") {
        return PathBuf::from(p);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tidings").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TidingsSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<TidingsSettings> {
    let mut settings = read_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn read_file_layer(path: &Path) -> Result<TidingsSettings> {
    let defaults = serde_json::to_value(TidingsSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
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

/// Apply `TIDINGS_*` environment overrides. Invalid values are ignored
/// with a warning.
pub fn apply_env_overrides(settings: &mut TidingsSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Override logic over an arbitrary variable source (testable without
/// touching the process environment).
fn apply_overrides(settings: &mut TidingsSettings, var: impl Fn(&str) -> Option<String>) {
    let string = |name: &str| var(name).filter(|v| !v.is_empty());

    if let Some(v) = string("TIDINGS_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = parsed(&var, "TIDINGS_PORT", |s| parse_range::<u16>(s, 0, 65535)) {
        settings.server.port = v;
    }
    if let Some(v) = parsed(&var, "TIDINGS_REPLAY_RETENTION_MS", |s| {
        parse_range::<u64>(s, 1_000, 86_400_000)
    }) {
        settings.broadcast.replay_retention_ms = v;
    }
    if let Some(v) = parsed(&var, "TIDINGS_GC_INTERVAL_MS", |s| {
        parse_range::<u64>(s, 100, 86_400_000)
    }) {
        settings.broadcast.gc_interval_ms = v;
    }
    if let Some(v) = parsed(&var, "TIDINGS_SUBSCRIBER_QUEUE", |s| {
        parse_range::<usize>(s, 1, 1_000_000)
    }) {
        settings.broadcast.subscriber_queue_capacity = v;
    }
    if let Some(v) = string("TIDINGS_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = parsed(&var, "TIDINGS_LOG_JSON", parse_bool) {
        settings.logging.json = v;
    }
}

fn parsed<T>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let val = var(name)?;
    let result = parse(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid env var, ignoring");
    }
    result
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

/// Parse a number and keep it only if it lies within `[min, max]`.
pub fn parse_range<T: std::str::FromStr + PartialOrd>(val: &str, min: T, max: T) -> Option<T> {
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
