//! patch-create command - extract training patches for a collection.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use patch_builder::asset::{AssetRef, GroupKey};
use patch_builder::catalog::{CatalogClient, StacCatalog, StaticCatalog};
use patch_builder::config::ConfigFile;
use patch_builder::engine::PatchEngine;
use patch_builder::reader::{AssetSource, FileSource, HttpSource, ReadErrorKind};
use patch_builder::report::{ExitStatus, GroupReport, GroupStatus, RunSummary};
use patch_builder::request::{PatchRequest, SourceMode};
use patch_builder::sink::GeoTiffSink;
use patch_builder::telemetry::RunObserver;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::common::{
    resolve_access_token, resolve_asset_dir, resolve_engine_config, EngineOverrides, SourceArg,
};
use crate::error::CliError;

/// Arguments for the patch-create command.
pub struct PatchCreateArgs {
    pub url: Option<String>,
    pub access_token: Option<String>,
    pub collection: String,
    pub tiles: String,
    pub datetime: String,
    pub bands: String,
    pub size: String,
    pub stride: Option<String>,
    pub source: SourceArg,
    pub asset_dir: Option<PathBuf>,
    pub manifest: Option<PathBuf>,
    pub path_output: Option<PathBuf>,
    pub overwrite: bool,
    pub engine: EngineOverrides,
    pub show_progress: bool,
}

/// Run the patch-create command.
pub fn run(args: PatchCreateArgs, config: &ConfigFile) -> Result<ExitStatus, CliError> {
    let mode = SourceMode::from(args.source);

    let mut builder = PatchRequest::builder(args.collection.as_str())
        .tiles_csv(&args.tiles)
        .bands_csv(&args.bands)
        .datetime(&args.datetime)
        .size(&args.size)
        .source_mode(mode);
    if let Some(ref stride) = args.stride {
        builder = builder.stride(stride);
    }
    let request = builder.build()?;

    let engine_config = resolve_engine_config(&args.engine, config);
    let token = resolve_access_token(args.access_token, config);
    let asset_dir = resolve_asset_dir(mode, args.asset_dir, config)?;
    let url = args.url.unwrap_or_else(|| config.catalog.url.clone());
    let output = args
        .path_output
        .unwrap_or_else(|| config.output.directory.clone());
    let overwrite = args.overwrite || config.output.overwrite;

    let catalog: Arc<dyn CatalogClient> = match args.manifest {
        Some(ref manifest) => Arc::new(
            StaticCatalog::from_manifest(manifest).map_err(|e| CliError::Config(e.to_string()))?,
        ),
        None => {
            let mut stac = StacCatalog::new(url.clone(), token.clone())
                .map_err(|e| CliError::Config(e.to_string()))?;
            if let Some(ref dir) = asset_dir {
                stac = stac.with_asset_dir(dir.clone());
            }
            Arc::new(stac)
        }
    };

    let source: Arc<dyn AssetSource> = match mode {
        SourceMode::Local => Arc::new(local_source(args.manifest.as_deref(), asset_dir.as_deref())),
        SourceMode::Remote => Arc::new(
            HttpSource::new(token)
                .map_err(|e| CliError::Config(e.to_string()))?
                .with_timeout(engine_config.task_timeout()),
        ),
    };

    let sink = Arc::new(GeoTiffSink::new(output.clone(), request.collection()).with_overwrite(overwrite));

    // Print banner
    println!("Patch Builder v{}", patch_builder::VERSION);
    println!("==================");
    println!();
    match args.manifest {
        Some(ref manifest) => println!("Catalog:    {} (manifest)", manifest.display()),
        None => println!("Catalog:    {}", url),
    }
    println!("Collection: {}", request.collection());
    println!("Tiles:      {}", request.tiles().join(","));
    println!("Bands:      {}", request.bands().join(","));
    println!("Dates:      {}", request.date_range());
    println!("Patch:      {} (stride {})", request.size(), request.stride());
    println!("Source:     {}", mode);
    println!("Output:     {}", output.display());
    println!("Workers:    {}", engine_config.pool_size());
    println!();

    let progress = if args.show_progress {
        ProgressBar::new(0)
    } else {
        ProgressBar::hidden()
    };
    progress.set_style(
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} groups {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let engine = PatchEngine::new(catalog, source, sink, engine_config)
        .with_observer(Arc::new(ProgressObserver::new(progress.clone())));

    // Set up signal handler for graceful cancellation
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    ctrlc::set_handler(move || {
        if !cancel_clone.is_cancelled() {
            eprintln!();
            eprintln!("Received interrupt, finishing in-flight reads...");
            cancel_clone.cancel();
        }
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::Runtime(e.to_string()))?;

    let result = runtime.block_on(engine.run(&request, cancel));
    progress.finish_and_clear();
    let summary = result?;

    print_summary(&summary);
    Ok(summary.exit_status())
}

/// File source for local runs.
///
/// Relative manifest hrefs resolve against the asset directory. STAC hrefs
/// already carry it.
fn local_source(manifest: Option<&Path>, asset_dir: Option<&Path>) -> FileSource {
    match (manifest, asset_dir) {
        (Some(_), Some(dir)) => FileSource::with_base_dir(dir),
        _ => FileSource::new(),
    }
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("Run Summary");
    println!("───────────");
    println!("{}", summary);
    if summary.was_cancelled {
        println!();
        println!("Run was cancelled; rerun to complete the remaining groups.");
    }
    println!();
    println!(
        "Throughput: {:.1} MB/s decoded",
        summary.metrics.bytes_per_second / 1_000_000.0
    );
}

/// Drives the progress bar from run events.
struct ProgressObserver {
    bar: ProgressBar,
}

impl ProgressObserver {
    fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl RunObserver for ProgressObserver {
    fn on_plan(&self, groups: usize, tasks: usize) {
        self.bar.set_length(groups as u64);
        self.bar.set_message(format!("({} reads)", tasks));
    }

    fn on_task_finished(&self, asset: &AssetRef, error: Option<ReadErrorKind>) {
        if let Some(kind) = error {
            debug!(asset = %asset, error = %kind, "Read failed");
        }
    }

    fn on_task_retry(&self, asset: &AssetRef, attempt: u32) {
        self.bar.set_message(format!("retrying {} (attempt {})", asset.band, attempt + 1));
    }

    fn on_group_finished(&self, key: &GroupKey, report: &GroupReport) {
        self.bar.inc(1);
        match report.status {
            GroupStatus::Succeeded => {
                self.bar.set_message(format!("{}: {} patches", key, report.patches_written))
            }
            GroupStatus::Dropped(ref reason) => {
                self.bar.println(format!("  dropped {}: {}", key, reason))
            }
            GroupStatus::Cancelled => self.bar.set_message(format!("{}: cancelled", key)),
        }
    }
}
