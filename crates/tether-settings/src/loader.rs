//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`TetherSettings::default()`]
//! 2. If `~/.tether/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `TETHER_*` environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::TetherSettings;

/// Resolve the path to the settings file (`~/.tether/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tether").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TetherSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or out-of-range values are
/// errors.
pub fn load_settings_from_path(path: &Path) -> Result<TetherSettings> {
    let defaults = serde_json::to_value(TetherSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: TetherSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
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

/// Apply `TETHER_*` environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning and the file/default value is
/// kept.
pub fn apply_env_overrides(settings: &mut TetherSettings) {
    // ── Connection ──────────────────────────────────────────────────
    if let Some(v) = read_env_string("TETHER_BASE_URL") {
        settings.connection.base_url = v;
    }
    if let Some(v) = read_env_string("TETHER_WS_PATH") {
        settings.connection.path = v;
    }

    // ── Retry ───────────────────────────────────────────────────────
    if let Some(v) = read_env_u32("TETHER_MAX_RETRIES", 0, 1_000) {
        settings.retry.max_retries = v;
    }
    if let Some(v) = read_env_u64("TETHER_BASE_DELAY_MS", 10, 600_000) {
        settings.retry.base_delay_ms = v;
    }

    // ── Heartbeat ───────────────────────────────────────────────────
    if let Some(v) = read_env_u64("TETHER_HEARTBEAT_INTERVAL_MS", 1_000, 600_000) {
        settings.heartbeat.interval_ms = v;
    }
    if let Some(v) = read_env_u64("TETHER_HEARTBEAT_TIMEOUT_MS", 100, 600_000) {
        settings.heartbeat.timeout_ms = v;
    }

    // ── Requests / queue ────────────────────────────────────────────
    if let Some(v) = read_env_u64("TETHER_REQUEST_TIMEOUT_MS", 100, 3_600_000) {
        settings.requests.timeout_ms = v;
    }
    if let Some(v) = read_env_usize("TETHER_MAX_QUEUED", 1, 100_000) {
        settings.queue.max_queued = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("TETHER_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("TETHER_LOG_JSON") {
        settings.logging.json = v;
    }
}

/// Reject settings the client cannot run with.
pub fn validate(settings: &TetherSettings) -> Result<()> {
    let w = settings.heartbeat.ema_weight;
    if !(w > 0.0 && w <= 1.0) {
        return Err(SettingsError::InvalidValue(format!(
            "heartbeat.emaWeight must be in (0, 1], got {w}"
        )));
    }
    if settings.connection.path.is_empty() {
        return Err(SettingsError::InvalidValue(
            "connection.path must not be empty".to_string(),
        ));
    }
    let _ = settings.connection.ws_url()?;
    if settings.router.broadcast_capacity == 0 {
        return Err(SettingsError::InvalidValue(
            "router.broadcastCapacity must be positive".to_string(),
        ));
    }
    if settings.retry.max_delay_ms < settings.retry.base_delay_ms {
        return Err(SettingsError::InvalidValue(format!(
            "retry.maxDelayMs ({}) is below retry.baseDelayMs ({})",
            settings.retry.max_delay_ms, settings.retry.base_delay_ms
        )));
    }
    if let Some(attempt) = settings.retry.capped_from() {
        tracing::warn!(
            attempt,
            max_retries = settings.retry.max_retries,
            max_delay_ms = settings.retry.max_delay_ms,
            "retry.maxDelayMs caps the backoff schedule before the retry budget runs out"
        );
    }
    Ok(())
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

/// Parse a string as a `u32` within a range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
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

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

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

fn read_env_u32(name: &str, min: u32, max: u32) -> Option<u32> {
    let val = std::env::var(name).ok()?;
    let result = parse_u32_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u32 env var, ignoring");
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
    use crate::types::OverflowPolicy;
    use assert_matches::assert_matches;

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({
            "heartbeat": {"intervalMs": 30000, "timeoutMs": 5000}
        });
        let source = serde_json::json!({"heartbeat": {"intervalMs": 15000}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["heartbeat"]["intervalMs"], 15000);
        assert_eq!(merged["heartbeat"]["timeoutMs"], 5000);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"cleanCloseCodes": [1000]});
        let source = serde_json::json!({"cleanCloseCodes": [1000, 1001]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["cleanCloseCodes"], serde_json::json!([1000, 1001]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_new_keys_added() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"b": 2}));
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let merged = deep_merge(target, serde_json::json!({"a": 42}));
        assert_eq!(merged["a"], 42);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("absent.json")).unwrap();
        let defaults = TetherSettings::default();
        assert_eq!(settings.queue, defaults.queue);
        assert_eq!(settings.requests, defaults.requests);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"retry": {"maxRetries": 8}, "queue": {"overflow": "rejectNew"}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.retry.max_retries, 8);
        assert_eq!(settings.retry.base_delay_ms, 1000);
        assert_eq!(settings.queue.overflow, OverflowPolicy::RejectNew);
        assert_eq!(settings.queue.max_queued, 500);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        assert_matches!(load_settings_from_path(&path), Err(SettingsError::Json(_)));
    }

    #[test]
    fn load_rejects_bad_ema_weight() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"heartbeat": {"emaWeight": 1.5}}"#).unwrap();

        assert_matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(msg)) if msg.contains("emaWeight")
        );
    }

    #[test]
    fn validate_rejects_inverted_delays() {
        let mut settings = TetherSettings::default();
        settings.retry.max_delay_ms = 10;
        assert_matches!(validate(&settings), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn validate_rejects_malformed_base_url() {
        for base in ["", "https://", "app example.com", "ftp://files.example.com"] {
            let mut settings = TetherSettings::default();
            settings.connection.base_url = base.to_string();
            assert_matches!(
                validate(&settings),
                Err(SettingsError::InvalidValue(msg)) if msg.contains("baseUrl"),
                "accepted {base:?}"
            );
        }
    }

    #[test]
    fn load_rejects_malformed_base_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"connection": {"baseUrl": "https://app example.com"}}"#)
            .unwrap();

        assert_matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(msg)) if msg.contains("baseUrl")
        );
    }

    #[test]
    fn long_retry_budget_past_the_cap_still_validates() {
        let mut settings = TetherSettings::default();
        settings.retry.max_retries = 8;
        assert_eq!(settings.retry.capped_from(), Some(7));
        validate(&settings).unwrap();
    }

    #[test]
    fn defaults_validate() {
        validate(&TetherSettings::default()).unwrap();
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for val in &["true", "1", "yes", "on", "TRUE", "On"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in &["false", "0", "no", "off", "NO"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_u32_bounds() {
        assert_eq!(parse_u32_range("0", 0, 1000), Some(0));
        assert_eq!(parse_u32_range("1001", 0, 1000), None);
        assert_eq!(parse_u32_range("-1", 0, 1000), None);
    }

    #[test]
    fn parse_u64_bounds() {
        assert_eq!(parse_u64_range("30000", 1000, 600_000), Some(30_000));
        assert_eq!(parse_u64_range("500", 1000, 600_000), None);
        assert_eq!(parse_u64_range("abc", 1000, 600_000), None);
    }

    #[test]
    fn parse_usize_bounds() {
        assert_eq!(parse_usize_range("50", 1, 100_000), Some(50));
        assert_eq!(parse_usize_range("0", 1, 100_000), None);
    }
}
