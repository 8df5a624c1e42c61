//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`SwitchboardSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::SwitchboardSettings;

/// Resolve the path to the settings file (`~/.switchboard/settings.json`).
pub fn settings_path() -> PathBuf {
    data_dir().join("settings.json")
}

/// Resolve the data directory (`~/.switchboard`).
pub fn data_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".switchboard")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<SwitchboardSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<SwitchboardSettings> {
    let mut settings = load_file_layers(path)?;
    apply_overrides(&mut settings, |name| std::env::var(name).ok());
    Ok(settings)
}

/// Defaults merged with the settings file, without environment overrides.
fn load_file_layers(path: &Path) -> Result<SwitchboardSettings> {
    let defaults = serde_json::to_value(SwitchboardSettings::default())?;

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

/// Apply `SWITCHBOARD_*` overrides read through `lookup`.
///
/// Values that fail to parse or fall outside their range are ignored with a
/// warning, leaving the file/default value in place.
pub fn apply_overrides(settings: &mut SwitchboardSettings, lookup: impl Fn(&str) -> Option<String>) {
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = string("SWITCHBOARD_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = string("SWITCHBOARD_PORT") {
        match parse_u16_range(&v, 0, 65535) {
            Some(port) => settings.server.port = port,
            None => warn!(key = "SWITCHBOARD_PORT", value = %v, "invalid port, ignoring"),
        }
    }
    if let Some(v) = string("SWITCHBOARD_DB_PATH") {
        settings.storage.db_path = Some(v);
    }
    // AUTH_TOKEN is the name older deployments used
    if let Some(v) = string("SWITCHBOARD_AUTH_TOKEN").or_else(|| string("AUTH_TOKEN")) {
        settings.admin.auth_token = Some(v);
    }
    if let Some(v) = string("SWITCHBOARD_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = string("SWITCHBOARD_LOG_JSON") {
        match parse_bool(&v) {
            Some(b) => settings.logging.json = b,
            None => warn!(key = "SWITCHBOARD_LOG_JSON", value = %v, "invalid boolean, ignoring"),
        }
    }
    if let Some(v) = string("SWITCHBOARD_KEEPALIVE_ENABLED") {
        match parse_bool(&v) {
            Some(b) => settings.keepalive.enabled = b,
            None => {
                warn!(key = "SWITCHBOARD_KEEPALIVE_ENABLED", value = %v, "invalid boolean, ignoring");
            }
        }
    }
    if let Some(v) = string("SWITCHBOARD_KEEPALIVE_INTERVAL_SECS") {
        match parse_u64_range(&v, 1, 86_400) {
            Some(secs) => settings.keepalive.interval_secs = secs,
            None => {
                warn!(key = "SWITCHBOARD_KEEPALIVE_INTERVAL_SECS", value = %v, "invalid interval, ignoring");
            }
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8080, "host": "localhost"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "localhost");
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4]));
    }

    // ── file layers ─────────────────────────────────────────────────

    #[test]
    fn missing_file_returns_defaults() {
        let settings = load_file_layers(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.server.port, 8787);
    }

    #[test]
    fn partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 9100}, "keepalive": {"intervalSecs": 15}}"#,
        )
        .unwrap();

        let settings = load_file_layers(&path).unwrap();
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.keepalive.interval_secs, 15);
        assert!(settings.keepalive.enabled);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_file_layers(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn overrides_apply() {
        let mut s = SwitchboardSettings::default();
        apply_overrides(
            &mut s,
            env(&[
                ("SWITCHBOARD_HOST", "127.0.0.1"),
                ("SWITCHBOARD_PORT", "9000"),
                ("SWITCHBOARD_DB_PATH", "/var/lib/sb.db"),
                ("SWITCHBOARD_LOG_JSON", "yes"),
                ("SWITCHBOARD_KEEPALIVE_ENABLED", "off"),
                ("SWITCHBOARD_KEEPALIVE_INTERVAL_SECS", "120"),
            ]),
        );
        assert_eq!(s.server.host, "127.0.0.1");
        assert_eq!(s.server.port, 9000);
        assert_eq!(s.storage.db_path.as_deref(), Some("/var/lib/sb.db"));
        assert!(s.logging.json);
        assert!(!s.keepalive.enabled);
        assert_eq!(s.keepalive.interval_secs, 120);
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let mut s = SwitchboardSettings::default();
        apply_overrides(
            &mut s,
            env(&[
                ("SWITCHBOARD_PORT", "99999"),
                ("SWITCHBOARD_LOG_JSON", "maybe"),
                ("SWITCHBOARD_KEEPALIVE_INTERVAL_SECS", "0"),
            ]),
        );
        assert_eq!(s.server.port, 8787);
        assert!(!s.logging.json);
        assert_eq!(s.keepalive.interval_secs, 60);
    }

    #[test]
    fn empty_override_is_ignored() {
        let mut s = SwitchboardSettings::default();
        apply_overrides(&mut s, env(&[("SWITCHBOARD_HOST", "")]));
        assert_eq!(s.server.host, "0.0.0.0");
    }

    #[test]
    fn legacy_auth_token_name() {
        let mut s = SwitchboardSettings::default();
        apply_overrides(&mut s, env(&[("AUTH_TOKEN", "secret")]));
        assert_eq!(s.admin.auth_token.as_deref(), Some("secret"));
    }

    #[test]
    fn prefixed_auth_token_wins() {
        let mut s = SwitchboardSettings::default();
        apply_overrides(
            &mut s,
            env(&[("AUTH_TOKEN", "old"), ("SWITCHBOARD_AUTH_TOKEN", "new")]),
        );
        assert_eq!(s.admin.auth_token.as_deref(), Some("new"));
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_values() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("on"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("nah"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("8080", 1, 65535), Some(8080));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u64_range("abc", 0, 10), None);
        assert_eq!(parse_u64_range("10", 0, 10), Some(10));
    }
}
