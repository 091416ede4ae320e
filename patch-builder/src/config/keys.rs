//! Addressable configuration keys (`section.key`).

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::{ConfigError, ConfigFile};
use crate::assembler::EdgeMode;

/// A single setting of [`ConfigFile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    CatalogUrl,
    CatalogAccessToken,
    EngineWorkers,
    EngineRetries,
    EngineRetryDelay,
    EngineTimeout,
    EngineEdge,
    EngineBestEffortMin,
    EngineResolution,
    OutputDirectory,
    OutputAssetDir,
    OutputOverwrite,
    LoggingLevel,
    LoggingFile,
}

const ALL_KEYS: [ConfigKey; 14] = [
    ConfigKey::CatalogUrl,
    ConfigKey::CatalogAccessToken,
    ConfigKey::EngineWorkers,
    ConfigKey::EngineRetries,
    ConfigKey::EngineRetryDelay,
    ConfigKey::EngineTimeout,
    ConfigKey::EngineEdge,
    ConfigKey::EngineBestEffortMin,
    ConfigKey::EngineResolution,
    ConfigKey::OutputDirectory,
    ConfigKey::OutputAssetDir,
    ConfigKey::OutputOverwrite,
    ConfigKey::LoggingLevel,
    ConfigKey::LoggingFile,
];

impl ConfigKey {
    /// Every key, grouped by section.
    pub fn all() -> &'static [ConfigKey] {
        &ALL_KEYS
    }

    pub fn section(&self) -> &'static str {
        match self {
            Self::CatalogUrl | Self::CatalogAccessToken => "catalog",
            Self::EngineWorkers
            | Self::EngineRetries
            | Self::EngineRetryDelay
            | Self::EngineTimeout
            | Self::EngineEdge
            | Self::EngineBestEffortMin
            | Self::EngineResolution => "engine",
            Self::OutputDirectory | Self::OutputAssetDir | Self::OutputOverwrite => "output",
            Self::LoggingLevel | Self::LoggingFile => "logging",
        }
    }

    pub fn key_name(&self) -> &'static str {
        match self {
            Self::CatalogUrl => "url",
            Self::CatalogAccessToken => "access_token",
            Self::EngineWorkers => "workers",
            Self::EngineRetries => "retries",
            Self::EngineRetryDelay => "retry_delay",
            Self::EngineTimeout => "timeout",
            Self::EngineEdge => "edge",
            Self::EngineBestEffortMin => "best_effort_min",
            Self::EngineResolution => "resolution",
            Self::OutputDirectory => "directory",
            Self::OutputAssetDir => "asset_dir",
            Self::OutputOverwrite => "overwrite",
            Self::LoggingLevel => "level",
            Self::LoggingFile => "file",
        }
    }

    /// Full `section.key` name.
    pub fn name(&self) -> String {
        format!("{}.{}", self.section(), self.key_name())
    }

    /// Current value as written to the file; empty when unset.
    pub fn get(&self, config: &ConfigFile) -> String {
        fn opt<T: ToString>(value: &Option<T>) -> String {
            value.as_ref().map(ToString::to_string).unwrap_or_default()
        }
        fn path(value: &Option<PathBuf>) -> String {
            value
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        }

        match self {
            Self::CatalogUrl => config.catalog.url.clone(),
            Self::CatalogAccessToken => opt(&config.catalog.access_token),
            Self::EngineWorkers => opt(&config.engine.workers),
            Self::EngineRetries => config.engine.retries.to_string(),
            Self::EngineRetryDelay => config.engine.retry_delay.as_secs().to_string(),
            Self::EngineTimeout => config.engine.timeout.as_secs().to_string(),
            Self::EngineEdge => config.engine.edge.to_string(),
            Self::EngineBestEffortMin => opt(&config.engine.best_effort_min),
            Self::EngineResolution => opt(&config.engine.resolution),
            Self::OutputDirectory => config.output.directory.display().to_string(),
            Self::OutputAssetDir => path(&config.output.asset_dir),
            Self::OutputOverwrite => config.output.overwrite.to_string(),
            Self::LoggingLevel => config.logging.level.clone(),
            Self::LoggingFile => path(&config.logging.file),
        }
    }

    /// Parses and stores `value`. An empty value clears optional keys.
    pub fn set(&self, config: &mut ConfigFile, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        match self {
            Self::CatalogUrl => config.catalog.url = self.required(value)?.to_string(),
            Self::CatalogAccessToken => {
                config.catalog.access_token = (!value.is_empty()).then(|| value.to_string())
            }
            Self::EngineWorkers => config.engine.workers = self.parse_optional(value)?,
            Self::EngineRetries => config.engine.retries = self.parse(value)?,
            Self::EngineRetryDelay => {
                config.engine.retry_delay = Duration::from_secs(self.parse(value)?)
            }
            Self::EngineTimeout => {
                let secs: u64 = self.parse(value)?;
                if secs == 0 {
                    return Err(self.invalid(value, "must be greater than 0"));
                }
                config.engine.timeout = Duration::from_secs(secs);
            }
            Self::EngineEdge => {
                config.engine.edge = value
                    .parse::<EdgeMode>()
                    .map_err(|reason| self.invalid(value, &reason))?
            }
            Self::EngineBestEffortMin => {
                let min: Option<usize> = self.parse_optional(value)?;
                if min == Some(0) {
                    return Err(self.invalid(value, "must be at least 1"));
                }
                config.engine.best_effort_min = min;
            }
            Self::EngineResolution => {
                let resolution: Option<f64> = self.parse_optional(value)?;
                if resolution.is_some_and(|r| !r.is_finite() || r <= 0.0) {
                    return Err(self.invalid(value, "must be a positive number"));
                }
                config.engine.resolution = resolution;
            }
            Self::OutputDirectory => {
                config.output.directory = PathBuf::from(self.required(value)?)
            }
            Self::OutputAssetDir => {
                config.output.asset_dir = (!value.is_empty()).then(|| PathBuf::from(value))
            }
            Self::OutputOverwrite => config.output.overwrite = self.parse_bool(value)?,
            Self::LoggingLevel => config.logging.level = self.required(value)?.to_lowercase(),
            Self::LoggingFile => {
                config.logging.file = (!value.is_empty()).then(|| PathBuf::from(value))
            }
        }
        Ok(())
    }

    fn invalid(&self, value: &str, reason: &str) -> ConfigError {
        ConfigError::InvalidValue {
            key: self.name(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    fn required<'v>(&self, value: &'v str) -> Result<&'v str, ConfigError> {
        if value.is_empty() {
            Err(self.invalid(value, "must not be empty"))
        } else {
            Ok(value)
        }
    }

    fn parse<T>(&self, value: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        value
            .parse::<T>()
            .map_err(|e| self.invalid(value, &e.to_string()))
    }

    fn parse_optional<T>(&self, value: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        if value.is_empty() {
            Ok(None)
        } else {
            self.parse(value).map(Some)
        }
    }

    fn parse_bool(&self, value: &str) -> Result<bool, ConfigError> {
        match value.to_lowercase().as_str() {
            "true" | "yes" | "1" | "on" => Ok(true),
            "false" | "no" | "0" | "off" => Ok(false),
            _ => Err(self.invalid(value, "expected true or false")),
        }
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        ALL_KEYS
            .iter()
            .copied()
            .find(|key| key.name() == wanted)
            .ok_or(ConfigError::UnknownKey(wanted))
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.section(), self.key_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_names() {
        assert_eq!("engine.workers".parse::<ConfigKey>().unwrap(), ConfigKey::EngineWorkers);
        assert_eq!(" Output.Overwrite ".parse::<ConfigKey>().unwrap(), ConfigKey::OutputOverwrite);
        assert!(matches!(
            "engine.nothing".parse::<ConfigKey>(),
            Err(ConfigError::UnknownKey(_))
        ));
    }

    #[test]
    fn test_every_key_round_trips_through_get_set() {
        let defaults = ConfigFile::default();
        for key in ConfigKey::all() {
            let mut config = ConfigFile::default();
            let value = key.get(&defaults);
            key.set(&mut config, &value).unwrap();
            assert_eq!(config, defaults, "key {}", key);
        }
    }

    #[test]
    fn test_empty_clears_optional() {
        let mut config = ConfigFile::default();
        ConfigKey::EngineWorkers.set(&mut config, "8").unwrap();
        assert_eq!(config.engine.workers, Some(8));
        ConfigKey::EngineWorkers.set(&mut config, "").unwrap();
        assert_eq!(config.engine.workers, None);
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = ConfigFile::default();
        assert!(ConfigKey::EngineTimeout.set(&mut config, "0").is_err());
        assert!(ConfigKey::EngineEdge.set(&mut config, "wrap").is_err());
        assert!(ConfigKey::EngineResolution.set(&mut config, "-10").is_err());
        assert!(ConfigKey::EngineBestEffortMin.set(&mut config, "0").is_err());
        assert!(ConfigKey::OutputOverwrite.set(&mut config, "maybe").is_err());
        assert!(ConfigKey::CatalogUrl.set(&mut config, "").is_err());
    }

    #[test]
    fn test_sections_are_contiguous() {
        let sections: Vec<&str> = ConfigKey::all().iter().map(|k| k.section()).collect();
        let mut seen = Vec::new();
        for section in sections {
            if seen.last() != Some(&section) {
                assert!(!seen.contains(&section), "section {} split", section);
                seen.push(section);
            }
        }
        assert_eq!(seen, vec!["catalog", "engine", "output", "logging"]);
    }
}
