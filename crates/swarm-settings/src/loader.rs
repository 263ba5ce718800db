//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`SwarmSettings::default()`]
//! 2. If `$SWARM_HOME/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `SWARM_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::SwarmSettings;

/// Resolve the settings file path.
///
/// `$SWARM_HOME/settings.json` when `SWARM_HOME` is set, otherwise
/// `~/.swarm/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(home) = read_env_string("SWARM_HOME") {
        return PathBuf::from(home).join("settings.json");
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".swarm").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<SwarmSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<SwarmSettings> {
    let defaults = serde_json::to_value(SwarmSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: SwarmSettings = serde_json::from_value(merged)?;
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

/// Apply environment variable overrides to loaded settings.
///
/// Integers must parse and fall within range. Booleans accept
/// `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`. Invalid values are
/// logged and ignored.
pub fn apply_env_overrides(settings: &mut SwarmSettings) {
    // ── Coordinator ─────────────────────────────────────────────────
    if let Some(v) = read_env_string("SWARM_HOST") {
        settings.coordinator.host = v;
    }
    if let Some(v) = read_env_u16("SWARM_PORT", 0, 65535) {
        settings.coordinator.port = v;
    }
    if let Some(v) = read_env_usize("SWARM_MAX_CONNECTIONS", 1, 1_000_000) {
        settings.coordinator.max_connections = v;
    }
    if let Some(v) = read_env_u64("SWARM_HEARTBEAT_INTERVAL_MS", 10, 3_600_000) {
        settings.coordinator.heartbeat_interval_ms = v;
    }
    if let Some(v) = read_env_u64("SWARM_HEARTBEAT_TIMEOUT_MS", 10, 3_600_000) {
        settings.coordinator.heartbeat_timeout_ms = v;
    }
    if let Some(v) = read_env_bool("SWARM_COMPRESSION") {
        settings.coordinator.compression_enabled = v;
    }
    if let Some(v) = read_env_bool("SWARM_BROADCAST_INCLUDES_SENDER") {
        settings.coordinator.broadcast_includes_sender = v;
    }

    // ── Client ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("SWARM_URL") {
        settings.client.url = v;
    }
    if let Some(v) = read_env_string("SWARM_AGENT_ID") {
        settings.client.agent_id = v;
    }
    if let Some(v) = read_env_usize("SWARM_QUEUE_SIZE", 0, 1_000_000) {
        settings.client.queue_size = v;
    }
    if let Some(v) = read_env_bool("SWARM_RECONNECTION") {
        settings.client.reconnection = v;
    }
    if let Some(v) = read_env_u64("SWARM_REQUEST_TIMEOUT_MS", 1, 3_600_000) {
        settings.client.request_timeout_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("SWARM_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("SWARM_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

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

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers ─────────────────────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use serde_json::json;

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = json!({"coordinator": {"port": 8080, "host": "localhost"}});
        let source = json!({"coordinator": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["coordinator"]["port"], 9090);
        assert_eq!(merged["coordinator"]["host"], "localhost");
    }

    #[test]
    fn merge_array_replace() {
        let target = json!({"capabilities": ["a", "b", "c"]});
        let source = json!({"capabilities": ["d"]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["capabilities"], json!(["d"]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(json!({"a": 1, "b": 2}), json!({"a": null}));
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_new_keys_added() {
        let merged = deep_merge(json!({"a": 1}), json!({"b": 2}));
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let merged = deep_merge(json!({"a": {"nested": true}}), json!({"a": 42}));
        assert_eq!(merged["a"], 42);
    }

    #[test]
    fn merge_empty_source() {
        let target = json!({"a": 1, "b": {"c": 2}});
        let merged = deep_merge(target.clone(), json!({}));
        assert_eq!(merged, target);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_settings_from_path(Path::new("/nonexistent/settings.json")).unwrap();
        let defaults = SwarmSettings::default();
        assert_eq!(
            settings.coordinator.max_connections,
            defaults.coordinator.max_connections
        );
        assert_eq!(settings.client.queue_size, defaults.client.queue_size);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"coordinator": {"maxConnections": 3}, "client": {"queueSize": 7}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.coordinator.max_connections, 3);
        assert_eq!(settings.client.queue_size, 7);
        assert_eq!(settings.coordinator.heartbeat_timeout_ms, 90_000);
        assert!(settings.client.reconnection);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result, Err(SettingsError::Json(_))));
    }

    #[test]
    fn load_wrong_type_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"coordinator": {"port": "eighty"}}"#).unwrap();

        assert!(load_settings_from_path(&path).is_err());
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "TRUE", "1", "yes", "on"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "0", "No", "off"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn parse_u16_range_bounds() {
        assert_eq!(parse_u16_range("8080", 1, 65535), Some(8080));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("70000", 1, 65535), None);
        assert_eq!(parse_u16_range("abc", 1, 65535), None);
    }

    #[test]
    fn parse_u64_range_bounds() {
        assert_eq!(parse_u64_range("5000", 10, 3_600_000), Some(5000));
        assert_eq!(parse_u64_range("5", 10, 3_600_000), None);
        assert_eq!(parse_u64_range("-1", 10, 3_600_000), None);
    }

    #[test]
    fn parse_usize_range_bounds() {
        assert_eq!(parse_usize_range("0", 0, 10), Some(0));
        assert_eq!(parse_usize_range("11", 0, 10), None);
    }

    #[test]
    fn settings_path_ends_with_settings_json() {
        assert!(settings_path().ends_with("settings.json"));
    }
}
