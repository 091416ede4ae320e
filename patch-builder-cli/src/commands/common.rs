//! Common types and utilities shared across CLI commands.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use patch_builder::assembler::{BandPolicy, EdgeMode};
use patch_builder::config::{ConfigFile, EngineConfig};
use patch_builder::request::SourceMode;

use crate::error::CliError;

/// Where asset bytes are read from.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum SourceArg {
    /// Stream every asset over HTTP
    Cloud,
    /// Memory-map assets already downloaded to --asset-dir
    Local,
}

impl From<SourceArg> for SourceMode {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Cloud => SourceMode::Remote,
            SourceArg::Local => SourceMode::Local,
        }
    }
}

/// Edge handling for windows crossing the raster border.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum EdgeArg {
    /// Discard partial windows
    Drop,
    /// Keep partial windows, padded with nodata
    Pad,
}

impl From<EdgeArg> for EdgeMode {
    fn from(arg: EdgeArg) -> Self {
        match arg {
            EdgeArg::Drop => EdgeMode::Drop,
            EdgeArg::Pad => EdgeMode::Pad,
        }
    }
}

/// Engine overrides taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct EngineOverrides {
    pub workers: Option<usize>,
    pub retries: Option<u32>,
    pub timeout: Option<u64>,
    pub edge: Option<EdgeArg>,
    pub best_effort_min: Option<usize>,
    pub resolution: Option<f64>,
}

/// Load the config file: `--config` if given, else the default location.
pub fn load_config(path: Option<&Path>) -> Result<ConfigFile, CliError> {
    match path {
        Some(path) => {
            if !path.exists() {
                return Err(CliError::Config(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
            Ok(ConfigFile::load_from(path)?)
        }
        None => Ok(ConfigFile::load()?),
    }
}

/// Resolve engine settings: CLI > config file > defaults.
pub fn resolve_engine_config(overrides: &EngineOverrides, config: &ConfigFile) -> EngineConfig {
    let mut engine = config.engine_config();

    if let Some(workers) = overrides.workers {
        engine = engine.with_pool_size(workers);
    }
    if let Some(retries) = overrides.retries {
        let retry = engine.retry_policy().clone().with_retries(retries);
        engine = engine.with_retry_policy(retry);
    }
    if let Some(timeout) = overrides.timeout {
        engine = engine.with_task_timeout(Duration::from_secs(timeout));
    }
    if let Some(edge) = overrides.edge {
        engine = engine.with_edge_mode(edge.into());
    }
    if let Some(min_bands) = overrides.best_effort_min {
        engine = engine.with_band_policy(BandPolicy::BestEffort { min_bands });
    }
    if overrides.resolution.is_some() {
        engine = engine.with_target_resolution(overrides.resolution);
    }
    engine
}

/// Resolve the access token: CLI (or environment) > config.
pub fn resolve_access_token(cli_token: Option<String>, config: &ConfigFile) -> Option<String> {
    cli_token
        .filter(|t| !t.trim().is_empty())
        .or_else(|| config.catalog.access_token.clone())
}

/// Resolve the asset directory, required in local mode.
pub fn resolve_asset_dir(
    mode: SourceMode,
    cli_dir: Option<PathBuf>,
    config: &ConfigFile,
) -> Result<Option<PathBuf>, CliError> {
    let dir = cli_dir.or_else(|| config.output.asset_dir.clone());
    match (mode, dir) {
        (SourceMode::Local, None) => Err(CliError::Config(
            "Local source requires an asset directory. \
             Set output.asset_dir in config.ini or use --asset-dir"
                .to_string(),
        )),
        (_, dir) => Ok(dir),
    }
}

/// Log level from -v/-q, falling back to the config file.
pub fn resolve_log_level(verbose: u8, quiet: bool, config: &ConfigFile) -> String {
    if quiet {
        return "warn".to_string();
    }
    match verbose {
        0 => config.logging.level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}
