//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::PairlineSettings;

/// `~/.pairline/settings.json`
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".pairline").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<PairlineSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<PairlineSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    validate(&settings)?;
    Ok(settings)
}

/// Reject values the server cannot run with.
pub fn validate(settings: &PairlineSettings) -> Result<()> {
    // A new subscriber is replayed up to two events before it reads anything.
    if settings.server.max_send_queue < 2 {
        return Err(SettingsError::InvalidValue(format!(
            "server.maxSendQueue must be at least 2, got {}",
            settings.server.max_send_queue
        )));
    }
    if settings.session.notification_buffer == 0 {
        return Err(SettingsError::InvalidValue(
            "session.notificationBuffer must be positive".to_string(),
        ));
    }
    if settings.session.default_identity.trim().is_empty() {
        return Err(SettingsError::InvalidValue(
            "session.defaultIdentity must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn load_file_layer(path: &Path) -> Result<PairlineSettings> {
    let defaults = serde_json::to_value(PairlineSettings::default())?;

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

/// Apply environment overrides, reading variables through `lookup`.
///
/// Invalid values are logged and ignored (fall back to file/default).
/// `PAIRLINE_PORT` wins over the generic `PORT`.
pub fn apply_env_overrides<F>(settings: &mut PairlineSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("PORT").and_then(|v| parse_port("PORT", &v)) {
        settings.server.port = v;
    }
    if let Some(v) = read("PAIRLINE_PORT").and_then(|v| parse_port("PAIRLINE_PORT", &v)) {
        settings.server.port = v;
    }
    if let Some(v) = read("PAIRLINE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("PAIRLINE_DEFAULT_IDENTITY") {
        settings.session.default_identity = v;
    }
    if let Some(v) =
        read("PAIRLINE_AUTOSTART").and_then(|v| parse_bool_logged("PAIRLINE_AUTOSTART", &v))
    {
        settings.session.autostart = v;
    }
    if let Some(v) = read("PAIRLINE_BRIDGE_COMMAND") {
        settings.bridge.command = Some(v);
    }
    if let Some(v) = read("PAIRLINE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) =
        read("PAIRLINE_LOG_JSON").and_then(|v| parse_bool_logged("PAIRLINE_LOG_JSON", &v))
    {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

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

fn parse_port(name: &str, val: &str) -> Option<u16> {
    let result = parse_u16_range(val, 1, 65535);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid port env var, ignoring");
    }
    result
}

fn parse_bool_logged(name: &str, val: &str) -> Option<bool> {
    let result = parse_bool(val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
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
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4, 5]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["items"], serde_json::json!([4, 5]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
    }

    // ── file layer ──────────────────────────────────────────────────

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_file_layer(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings.server.port, 3001);
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"session": {"defaultIdentity": "shop-01"}, "bridge": {"command": "node", "args": ["bridge.js"]}}"#,
        )
        .unwrap();

        let settings = load_file_layer(&path).unwrap();
        assert_eq!(settings.session.default_identity, "shop-01");
        assert!(settings.session.autostart);
        assert_eq!(settings.bridge.command.as_deref(), Some("node"));
        assert_eq!(settings.bridge.args, vec!["bridge.js".to_string()]);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load_file_layer(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn generic_port_applies() {
        let mut settings = PairlineSettings::default();
        apply_env_overrides(&mut settings, env(&[("PORT", "4000")]));
        assert_eq!(settings.server.port, 4000);
    }

    #[test]
    fn pairline_port_wins_over_port() {
        let mut settings = PairlineSettings::default();
        apply_env_overrides(
            &mut settings,
            env(&[("PORT", "4000"), ("PAIRLINE_PORT", "5000")]),
        );
        assert_eq!(settings.server.port, 5000);
    }

    #[test]
    fn invalid_values_are_ignored() {
        let mut settings = PairlineSettings::default();
        apply_env_overrides(
            &mut settings,
            env(&[("PORT", "99999"), ("PAIRLINE_AUTOSTART", "maybe")]),
        );
        assert_eq!(settings.server.port, 3001);
        assert!(settings.session.autostart);
    }

    #[test]
    fn empty_values_are_ignored() {
        let mut settings = PairlineSettings::default();
        apply_env_overrides(&mut settings, env(&[("PAIRLINE_HOST", "")]));
        assert_eq!(settings.server.host, "0.0.0.0");
    }

    #[test]
    fn string_and_bool_overrides() {
        let mut settings = PairlineSettings::default();
        apply_env_overrides(
            &mut settings,
            env(&[
                ("PAIRLINE_HOST", "127.0.0.1"),
                ("PAIRLINE_DEFAULT_IDENTITY", "kiosk"),
                ("PAIRLINE_AUTOSTART", "off"),
                ("PAIRLINE_BRIDGE_COMMAND", "/usr/bin/node"),
                ("PAIRLINE_LOG_LEVEL", "debug"),
                ("PAIRLINE_LOG_JSON", "yes"),
            ]),
        );
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.session.default_identity, "kiosk");
        assert!(!settings.session.autostart);
        assert_eq!(settings.bridge.command.as_deref(), Some("/usr/bin/node"));
        assert_eq!(settings.logging.level, "debug");
        assert!(settings.logging.json);
    }

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("nah"), None);
    }

    #[test]
    fn parse_u16_bounds() {
        assert_eq!(parse_u16_range("1", 1, 65535), Some(1));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("70000", 1, 65535), None);
    }

    // ── validation ──────────────────────────────────────────────────

    #[test]
    fn defaults_validate() {
        assert!(validate(&PairlineSettings::default()).is_ok());
    }

    #[test]
    fn tiny_send_queue_is_rejected() {
        let mut settings = PairlineSettings::default();
        settings.server.max_send_queue = 1;
        let err = validate(&settings).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(ref m) if m.contains("maxSendQueue")));
    }

    #[test]
    fn invalid_file_values_fail_loading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"session": {"notificationBuffer": 0}}"#).unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        ));
    }
}
