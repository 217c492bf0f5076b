//! Layered settings loading: defaults, JSON file, environment.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;

use crate::errors::{Result, SettingsError};
use crate::types::TetherSettings;

/// Directory under `$HOME` holding the settings file.
const SETTINGS_DIR: &str = ".tether";

/// Settings file name.
const SETTINGS_FILE: &str = "settings.json";

/// Default settings file location: `~/.tether/settings.json`.
///
/// Falls back to the current directory when `$HOME` is unset.
pub fn settings_path() -> PathBuf {
    let home = std::env::var_os("HOME").map_or_else(|| PathBuf::from("."), PathBuf::from);
    home.join(SETTINGS_DIR).join(SETTINGS_FILE)
}

/// Load settings from the default path with environment overrides.
pub fn load_settings() -> Result<TetherSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path`, deep-merged over defaults, then apply
/// `TETHER_*` environment overrides and validate.
///
/// A missing file is not an error; the defaults are used.
pub fn load_settings_from_path(path: &Path) -> Result<TetherSettings> {
    let defaults = serde_json::to_value(TetherSettings::default()).map_err(|source| {
        SettingsError::Json {
            path: path.to_path_buf(),
            source,
        }
    })?;

    let merged = match std::fs::read_to_string(path) {
        Ok(text) => {
            let user: Value = serde_json::from_str(&text).map_err(|source| SettingsError::Json {
                path: path.to_path_buf(),
                source,
            })?;
            deep_merge(defaults, user)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(?path, "no settings file, using defaults");
            defaults
        }
        Err(source) => {
            return Err(SettingsError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let mut settings: TetherSettings =
        serde_json::from_value(merged).map_err(|source| SettingsError::Json {
            path: path.to_path_buf(),
            source,
        })?;
    apply_env_overrides(&mut settings, |var| std::env::var(var).ok())?;
    settings.validate();
    Ok(settings)
}

/// Recursively merge `overlay` into `base`. Objects merge key by key; any
/// other overlay value replaces the base value.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                let _ = base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, overlay) => overlay,
    }
}

/// Apply `TETHER_*` overrides read through `lookup`.
///
/// | Variable | Field |
/// |----------|-------|
/// | `TETHER_WS_URL` | `endpoint.baseUrl` |
/// | `TETHER_CHANNEL` | `endpoint.channel` |
/// | `TETHER_CALL_TIMEOUT_MS` | `rpc.callTimeoutMs` |
/// | `TETHER_HEARTBEAT_INTERVAL_MS` | `heartbeat.intervalMs` |
/// | `TETHER_RECONNECT_MAX_ATTEMPTS` | `reconnect.maxAttempts` |
/// | `TETHER_LOG_LEVEL` | `logging.level` |
pub fn apply_env_overrides(
    settings: &mut TetherSettings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(url) = lookup("TETHER_WS_URL") {
        settings.endpoint.base_url = url;
    }
    if let Some(channel) = lookup("TETHER_CHANNEL") {
        settings.endpoint.channel = channel;
    }
    if let Some(ms) = parse_var(&lookup, "TETHER_CALL_TIMEOUT_MS")? {
        settings.rpc.call_timeout_ms = ms;
    }
    if let Some(ms) = parse_var(&lookup, "TETHER_HEARTBEAT_INTERVAL_MS")? {
        settings.heartbeat.interval_ms = ms;
    }
    if let Some(n) = parse_var(&lookup, "TETHER_RECONNECT_MAX_ATTEMPTS")? {
        settings.reconnect.max_attempts = n;
    }
    if let Some(level) = lookup("TETHER_LOG_LEVEL") {
        settings.logging.level = level;
    }
    Ok(())
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Result<Option<T>> {
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| SettingsError::EnvOverride {
                var: var.to_string(),
                value: raw,
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn deep_merge_nested_objects() {
        let base = serde_json::json!({"a": {"b": 1, "c": 2}, "d": 3});
        let overlay = serde_json::json!({"a": {"c": 20}, "e": 5});
        let merged = deep_merge(base, overlay);
        assert_eq!(merged, serde_json::json!({"a": {"b": 1, "c": 20}, "d": 3, "e": 5}));
    }

    #[test]
    fn deep_merge_scalar_replaces_object() {
        let merged = deep_merge(serde_json::json!({"a": {"b": 1}}), serde_json::json!({"a": 7}));
        assert_eq!(merged["a"], 7);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings.rpc.call_timeout_ms, 20_000);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Json { .. }));
    }

    #[test]
    fn file_values_are_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"reconnect": {"baseDelayMs": 0}}"#).unwrap();
        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.reconnect.base_delay_ms, 3_000);
    }

    #[test]
    fn env_overrides_apply() {
        let mut settings = TetherSettings::default();
        apply_env_overrides(
            &mut settings,
            env(&[
                ("TETHER_WS_URL", "wss://prod.test/ws"),
                ("TETHER_CHANNEL", "notifications"),
                ("TETHER_CALL_TIMEOUT_MS", "1500"),
                ("TETHER_HEARTBEAT_INTERVAL_MS", " 4000 "),
                ("TETHER_RECONNECT_MAX_ATTEMPTS", "2"),
                ("TETHER_LOG_LEVEL", "debug"),
            ]),
        )
        .unwrap();
        assert_eq!(settings.endpoint.base_url, "wss://prod.test/ws");
        assert_eq!(settings.endpoint.channel, "notifications");
        assert_eq!(settings.rpc.call_timeout_ms, 1500);
        assert_eq!(settings.heartbeat.interval_ms, 4000);
        assert_eq!(settings.reconnect.max_attempts, 2);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn env_override_parse_failure() {
        let mut settings = TetherSettings::default();
        let err =
            apply_env_overrides(&mut settings, env(&[("TETHER_CALL_TIMEOUT_MS", "soon")]))
                .unwrap_err();
        assert!(matches!(err, SettingsError::EnvOverride { ref var, .. } if var == "TETHER_CALL_TIMEOUT_MS"));
    }

    #[test]
    fn no_overrides_leave_defaults() {
        let mut settings = TetherSettings::default();
        apply_env_overrides(&mut settings, env(&[])).unwrap();
        assert_eq!(settings.endpoint.channel, "chat");
    }

    #[test]
    fn settings_path_ends_with_file_name() {
        let path = settings_path();
        assert!(path.ends_with(".tether/settings.json"));
    }
}
