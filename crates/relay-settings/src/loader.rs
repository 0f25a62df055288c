use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::errors::{Result, SettingsError};
use crate::types::RelaySettings;

const SETTINGS_ENV: &str = "OTP_RELAY_SETTINGS";
const DEFAULT_SETTINGS_FILE: &str = "relay.json";

/// Resolve the settings file path (`$OTP_RELAY_SETTINGS` or `./relay.json`).
pub fn settings_path() -> PathBuf {
    std::env::var_os(SETTINGS_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE))
}

/// Load settings from the default path with env overrides applied.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path`, deep-merged over the defaults, then apply
/// `OTP_RELAY_*` environment overrides and validate.
///
/// A missing file yields the defaults.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = match std::fs::read_to_string(path) {
        Ok(raw) => {
            let user: Value = serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
            tracing::debug!(path = %path.display(), "settings file loaded");
            deep_merge(defaults, user)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no settings file, using defaults");
            defaults
        }
        Err(source) => {
            return Err(SettingsError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let mut settings: RelaySettings =
        serde_json::from_value(merged).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings.validate();
    Ok(settings)
}

/// Recursively merge `overlay` into `base`. Objects merge key by key; any
/// other overlay value replaces the base value. `null` in the overlay is
/// ignored so explicit nulls don't wipe defaults.
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
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

/// Apply `OTP_RELAY_*` overrides using `lookup` to read variables.
pub fn apply_env_overrides(settings: &mut RelaySettings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(port) = lookup("OTP_RELAY_PORT") {
        match port.trim().parse() {
            Ok(p) => settings.server.port = p,
            Err(_) => tracing::warn!(value = %port, "ignoring invalid OTP_RELAY_PORT"),
        }
    }
    if let Some(url) = lookup("OTP_RELAY_GATEWAY_URL") {
        settings.gateway.url = url;
    }
    if let Some(dir) = lookup("OTP_RELAY_AUTH_DIR") {
        settings.gateway.auth_dir = dir;
    }
    if let Some(level) = lookup("OTP_RELAY_LOG_LEVEL") {
        settings.logging.level = level;
    }
}
