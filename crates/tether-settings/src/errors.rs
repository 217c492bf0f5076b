//! Settings loading errors.

use std::path::PathBuf;

/// Result alias for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

/// Errors raised while loading settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("failed to read settings at {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The settings file is not valid JSON or does not match the schema.
    #[error("invalid settings JSON at {path}: {source}")]
    Json {
        /// File path.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
    /// An environment override could not be parsed.
    #[error("invalid value for {var}: {value}")]
    EnvOverride {
        /// Variable name.
        var: String,
        /// Offending value.
        value: String,
    },
}
