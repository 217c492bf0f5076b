//! # tether-settings
//!
//! Configuration management with layered sources for the tether session manager.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`TetherSettings::default()`]
//! 2. **User file**: `~/.tether/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `TETHER_*` overrides (highest priority)
//!
//! There is no global instance. The composition root loads settings once and
//! passes the relevant sections to the session it builds.
//!
//! # Usage
//!
//! ```no_run
//! use tether_settings::load_settings;
//!
//! let settings = load_settings().unwrap_or_default();
//! println!("endpoint: {}", settings.endpoint.base_url);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path,
};
pub use types::*;
