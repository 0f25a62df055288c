//! # relay-settings
//!
//! Layered configuration for the OTP relay.
//!
//! Settings are resolved from three layers (in priority order):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **Settings file**: JSON, deep-merged over the defaults
//! 3. **Environment variables**: `OTP_RELAY_*` overrides (highest priority)
//!
//! The file path is `$OTP_RELAY_SETTINGS` when set, else `./relay.json`.
//! A missing file is not an error; a malformed one is.

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path,
};
pub use types::*;
