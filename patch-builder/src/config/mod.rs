//! Configuration.
//!
//! [`EngineConfig`] holds the knobs of a run. [`ConfigFile`] is the persisted
//! INI file; the CLI layers its flags on top, so the precedence is
//! CLI > config file > defaults.

mod engine;
mod file;
mod keys;

pub use engine::EngineConfig;
pub use file::{
    config_directory, config_file_path, CatalogSettings, ConfigFile, EngineSettings,
    LoggingSettings, OutputSettings,
};
pub use keys::ConfigKey;

use std::path::PathBuf;

use thiserror::Error;

/// Errors reading, writing or interpreting configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("failed to access {}: {reason}", .path.display())]
    Io { path: PathBuf, reason: String },

    #[error("failed to parse {}: {reason}", .path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("unknown configuration key '{0}'")]
    UnknownKey(String),
}
