//! patch-builder CLI - command-line interface
//!
//! Extracts training patches from satellite image time series through the
//! patch-builder library.

mod commands;
mod error;

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use patch_builder::report::ExitStatus;

use commands::common::{load_config, resolve_log_level, EdgeArg, EngineOverrides, SourceArg};
use commands::config::ConfigCommands;
use commands::download::DownloadArgs;
use commands::patch_create::PatchCreateArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "patch-builder", version, about = "Build training patches from satellite image time series")]
struct Cli {
    /// Configuration file (default: platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only warnings and errors; no progress bar
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Extract patches for tiles, dates and bands of a collection
    PatchCreate(PatchCreateCli),

    /// Download assets to a local directory for --source local runs
    Download(DownloadCli),

    /// Create or refresh the configuration file
    Init,

    /// View or modify configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Debug, Args)]
struct PatchCreateCli {
    /// STAC API URL
    #[arg(long)]
    url: Option<String>,

    /// Catalog access token
    #[arg(long, env = "PATCH_BUILDER_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Collection identifier (e.g., S2-16D-2)
    #[arg(long = "collection-id")]
    collection_id: String,

    /// Comma-separated tile identifiers (e.g., 081094,082094)
    #[arg(long)]
    tiles: String,

    /// Date or start/end range (e.g., 2017-01-01/2017-01-31)
    #[arg(long)]
    datetime: String,

    /// Comma-separated band names (e.g., red,nir)
    #[arg(long)]
    bands: String,

    /// Patch size as WIDTHxHEIGHT
    #[arg(long)]
    size: String,

    /// Step between patch origins as WIDTHxHEIGHT (default: patch size)
    #[arg(long)]
    stride: Option<String>,

    /// Read assets from the cloud or from local files
    #[arg(long, value_enum, default_value_t = SourceArg::Cloud)]
    source: SourceArg,

    /// Directory of downloaded assets (local source)
    #[arg(long)]
    asset_dir: Option<PathBuf>,

    /// JSON asset manifest used instead of the STAC catalog
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Output root directory
    #[arg(long = "path-output")]
    path_output: Option<PathBuf>,

    /// Edge handling for partial windows
    #[arg(long, value_enum)]
    edge: Option<EdgeArg>,

    /// Assemble groups with at least N bands, filling the rest with nodata
    #[arg(long, value_name = "N")]
    best_effort_min: Option<usize>,

    /// Resample every band to this pixel size
    #[arg(long)]
    resolution: Option<f64>,

    /// Concurrent workers (default: 90% of cores)
    #[arg(long)]
    workers: Option<usize>,

    /// Retries per asset after the first attempt
    #[arg(long)]
    retries: Option<u32>,

    /// Per-read timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Rewrite patches that already exist
    #[arg(long)]
    overwrite: bool,
}

#[derive(Debug, Args)]
struct DownloadCli {
    /// STAC API URL
    #[arg(long)]
    url: Option<String>,

    /// Catalog access token
    #[arg(long, env = "PATCH_BUILDER_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Collection identifier (e.g., S2-16D-2)
    #[arg(long = "collection-id")]
    collection_id: String,

    /// Comma-separated tile identifiers (e.g., 081094,082094)
    #[arg(long)]
    tiles: String,

    /// Date or start/end range (e.g., 2017-01-01/2017-01-31)
    #[arg(long)]
    datetime: String,

    /// Comma-separated band names (e.g., red,nir)
    #[arg(long)]
    bands: String,

    /// Directory to download into (default: output.asset_dir)
    #[arg(long)]
    asset_dir: Option<PathBuf>,

    /// JSON asset manifest used instead of the STAC catalog
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Concurrent downloads (default: 90% of cores)
    #[arg(long)]
    workers: Option<usize>,

    /// Retries per asset after the first attempt
    #[arg(long)]
    retries: Option<u32>,

    /// Per-download timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Download files that already exist
    #[arg(long)]
    overwrite: bool,
}

impl DownloadCli {
    fn into_args(self, show_progress: bool) -> DownloadArgs {
        DownloadArgs {
            url: self.url,
            access_token: self.access_token,
            collection: self.collection_id,
            tiles: self.tiles,
            datetime: self.datetime,
            bands: self.bands,
            asset_dir: self.asset_dir,
            manifest: self.manifest,
            overwrite: self.overwrite,
            engine: EngineOverrides {
                workers: self.workers,
                retries: self.retries,
                timeout: self.timeout,
                ..Default::default()
            },
            show_progress,
        }
    }
}

impl PatchCreateCli {
    fn into_args(self, show_progress: bool) -> PatchCreateArgs {
        PatchCreateArgs {
            url: self.url,
            access_token: self.access_token,
            collection: self.collection_id,
            tiles: self.tiles,
            datetime: self.datetime,
            bands: self.bands,
            size: self.size,
            stride: self.stride,
            source: self.source,
            asset_dir: self.asset_dir,
            manifest: self.manifest,
            path_output: self.path_output,
            overwrite: self.overwrite,
            engine: EngineOverrides {
                workers: self.workers,
                retries: self.retries,
                timeout: self.timeout,
                edge: self.edge,
                best_effort_min: self.best_effort_min,
                resolution: self.resolution,
            },
            show_progress,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let status = match run(cli) {
        Ok(status) => status,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_status()
        }
    };
    std::process::exit(status.code());
}

fn run(cli: Cli) -> Result<ExitStatus, CliError> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::PatchCreate(args) => {
            let config = load_config(config_path)?;
            let level = resolve_log_level(cli.verbose, cli.quiet, &config);
            let _guard = patch_builder::logging::init(&level, config.logging.file.as_deref())?;
            commands::patch_create::run(args.into_args(!cli.quiet), &config)
        }
        Commands::Download(args) => {
            let config = load_config(config_path)?;
            let level = resolve_log_level(cli.verbose, cli.quiet, &config);
            let _guard = patch_builder::logging::init(&level, config.logging.file.as_deref())?;
            commands::download::run(args.into_args(!cli.quiet), &config)
        }
        Commands::Init => commands::init::run(config_path).map(|_| ExitStatus::Success),
        Commands::Config(command) => {
            commands::config::run(command, config_path).map(|_| ExitStatus::Success)
        }
    }
}
