//! INI configuration file.
//!
//! Lives at `~/.config/patch-builder/config.ini` (platform config dir):
//!
//! ```ini
//! [catalog]
//! url = https://brazildatacube.dpi.inpe.br/stac/
//! access_token =
//!
//! [engine]
//! workers =
//! retries = 3
//! retry_delay = 2
//! timeout = 120
//! edge = drop
//! best_effort_min =
//! resolution =
//!
//! [output]
//! directory = patches
//! asset_dir =
//! overwrite = false
//!
//! [logging]
//! level = info
//! file =
//! ```
//!
//! Empty values mean "not set". Missing keys fall back to defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::{Ini, Properties};

use super::{ConfigError, EngineConfig};
use crate::assembler::{BandPolicy, EdgeMode};
use crate::catalog::DEFAULT_STAC_URL;
use crate::scheduler::{RetryPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY_SECS, DEFAULT_TASK_TIMEOUT};

/// Directory name under the platform config dir.
const APP_DIR: &str = "patch-builder";
const FILE_NAME: &str = "config.ini";

/// Platform configuration directory for the tool.
pub fn config_directory() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Default configuration file path.
pub fn config_file_path() -> PathBuf {
    config_directory().join(FILE_NAME)
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogSettings {
    pub url: String,
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// `None` sizes the pool from the available cores.
    pub workers: Option<usize>,
    /// Retries after the first attempt.
    pub retries: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
    pub edge: EdgeMode,
    /// Set to enable best-effort assembly.
    pub best_effort_min: Option<usize>,
    pub resolution: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputSettings {
    pub directory: PathBuf,
    /// Where `local` mode finds downloaded assets.
    pub asset_dir: Option<PathBuf>,
    pub overwrite: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
    pub file: Option<PathBuf>,
}

/// Contents of the configuration file.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    pub catalog: CatalogSettings,
    pub engine: EngineSettings,
    pub output: OutputSettings,
    pub logging: LoggingSettings,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            catalog: CatalogSettings {
                url: DEFAULT_STAC_URL.to_string(),
                access_token: None,
            },
            engine: EngineSettings {
                workers: None,
                retries: DEFAULT_MAX_ATTEMPTS - 1,
                retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
                timeout: DEFAULT_TASK_TIMEOUT,
                edge: EdgeMode::default(),
                best_effort_min: None,
                resolution: None,
            },
            output: OutputSettings {
                directory: PathBuf::from("patches"),
                asset_dir: None,
                overwrite: false,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
                file: None,
            },
        }
    }
}

impl ConfigFile {
    /// Loads the default file. A missing file yields the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path())
    }

    /// Loads `path`. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    /// Parses INI text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<string>"),
            reason: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    /// Writes the default file, creating its directory.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&config_file_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                reason: e.to_string(),
            })?;
        }
        self.to_ini().write_to_file(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Engine settings as an [`EngineConfig`].
    pub fn engine_config(&self) -> EngineConfig {
        let engine = &self.engine;
        let retry = if engine.retries == 0 {
            RetryPolicy::None
        } else {
            RetryPolicy::fixed(engine.retries.saturating_add(1), engine.retry_delay)
        };
        let band_policy = match engine.best_effort_min {
            Some(min_bands) => BandPolicy::BestEffort { min_bands },
            None => BandPolicy::Strict,
        };

        let mut config = EngineConfig::default()
            .with_retry_policy(retry)
            .with_task_timeout(engine.timeout)
            .with_edge_mode(engine.edge)
            .with_band_policy(band_policy)
            .with_target_resolution(engine.resolution);
        if let Some(workers) = engine.workers {
            config = config.with_pool_size(workers);
        }
        config
    }

    // ========================================================================
    // INI mapping
    // ========================================================================

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for key in super::ConfigKey::all() {
            let value = ini
                .section(Some(key.section()))
                .and_then(|props: &Properties| props.get(key.key_name()));
            if let Some(value) = value {
                key.set(&mut config, value)?;
            }
        }
        Ok(config)
    }

    fn to_ini(&self) -> Ini {
        let mut ini = Ini::new();
        for key in super::ConfigKey::all() {
            ini.with_section(Some(key.section()))
                .set(key.key_name(), key.get(self));
        }
        ini
    }
}
