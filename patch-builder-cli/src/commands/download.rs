//! download command - fetch the assets of a request for later local runs.

use std::path::PathBuf;
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use patch_builder::asset::AssetRef;
use patch_builder::catalog::{CatalogClient, StacCatalog, StaticCatalog};
use patch_builder::config::ConfigFile;
use patch_builder::download::{AssetDownloader, DownloadStatus, DownloadSummary};
use patch_builder::engine::EngineError;
use patch_builder::reader::{HttpSource, ReadErrorKind};
use patch_builder::report::ExitStatus;
use patch_builder::request::{PatchRequest, PatchSize, SourceMode};
use patch_builder::scheduler::PoolSize;
use patch_builder::telemetry::RunObserver;
use tokio_util::sync::CancellationToken;

use super::common::{resolve_access_token, resolve_asset_dir, resolve_engine_config, EngineOverrides};
use crate::error::CliError;

/// Arguments for the download command.
pub struct DownloadArgs {
    pub url: Option<String>,
    pub access_token: Option<String>,
    pub collection: String,
    pub tiles: String,
    pub datetime: String,
    pub bands: String,
    pub asset_dir: Option<PathBuf>,
    pub manifest: Option<PathBuf>,
    pub overwrite: bool,
    pub engine: EngineOverrides,
    pub show_progress: bool,
}

/// Run the download command.
pub fn run(args: DownloadArgs, config: &ConfigFile) -> Result<ExitStatus, CliError> {
    // Patch geometry does not affect which assets the catalog resolves.
    let request = PatchRequest::builder(args.collection.as_str())
        .tiles_csv(&args.tiles)
        .bands_csv(&args.bands)
        .datetime(&args.datetime)
        .patch_size(PatchSize::new(1, 1))
        .source_mode(SourceMode::Remote)
        .build()?;

    let engine_config = resolve_engine_config(&args.engine, config);
    let token = resolve_access_token(args.access_token, config);
    let asset_dir = resolve_asset_dir(SourceMode::Local, args.asset_dir, config)?
        .ok_or_else(|| CliError::Config("an asset directory is required".to_string()))?;
    let url = args.url.unwrap_or_else(|| config.catalog.url.clone());
    let overwrite = args.overwrite || config.output.overwrite;

    let catalog: Arc<dyn CatalogClient> = match args.manifest {
        Some(ref manifest) => Arc::new(
            StaticCatalog::from_manifest(manifest).map_err(|e| CliError::Config(e.to_string()))?,
        ),
        None => Arc::new(
            StacCatalog::new(url.clone(), token.clone()).map_err(|e| CliError::Config(e.to_string()))?,
        ),
    };
    let source = HttpSource::new(token)
        .map_err(|e| CliError::Config(e.to_string()))?
        .with_timeout(engine_config.task_timeout());
    let pool_size = PoolSize::new(engine_config.pool_size())
        .ok_or_else(|| CliError::Config("workers must be at least 1".to_string()))?;

    println!("Patch Builder v{} - download", patch_builder::VERSION);
    println!("=============================");
    println!();
    println!("Collection: {}", request.collection());
    println!("Tiles:      {}", request.tiles().join(","));
    println!("Bands:      {}", request.bands().join(","));
    println!("Dates:      {}", request.date_range());
    println!("Directory:  {}", asset_dir.display());
    println!("Workers:    {}", pool_size);
    println!();

    let progress = if args.show_progress {
        ProgressBar::new(0)
    } else {
        ProgressBar::hidden()
    };
    progress.set_style(
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} assets {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let downloader = AssetDownloader::new(Arc::new(source), asset_dir, pool_size)
        .with_retry_policy(engine_config.retry_policy().clone())
        .with_overwrite(overwrite)
        .with_observer(Arc::new(DownloadObserver {
            bar: progress.clone(),
        }));

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    ctrlc::set_handler(move || {
        if !cancel_clone.is_cancelled() {
            eprintln!();
            eprintln!("Received interrupt, stopping downloads...");
            cancel_clone.cancel();
        }
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::Runtime(e.to_string()))?;

    let summary = runtime.block_on(async {
        let assets = catalog.resolve(&request).await.map_err(EngineError::from)?;
        Ok::<_, CliError>(downloader.run(assets, cancel).await)
    });
    progress.finish_and_clear();
    let summary = summary?;

    print_summary(&summary);
    Ok(summary.exit_status())
}

fn print_summary(summary: &DownloadSummary) {
    println!();
    println!("Download Summary");
    println!("────────────────");
    println!("Downloaded: {} ({:.1} MB)", summary.downloaded(), summary.bytes() as f64 / 1_000_000.0);
    println!("Skipped:    {} (already present)", summary.skipped());
    println!("Failed:     {}", summary.failed());
    for report in &summary.reports {
        if let DownloadStatus::Failed(ref err) = report.status {
            println!("  {}: {}", report.asset, err);
        }
    }
    if summary.was_cancelled {
        println!();
        println!("Download was cancelled; rerun to fetch the remaining assets.");
    }
}

/// Advances the progress bar per finished asset.
struct DownloadObserver {
    bar: ProgressBar,
}

impl RunObserver for DownloadObserver {
    fn on_plan(&self, _groups: usize, tasks: usize) {
        self.bar.set_length(tasks as u64);
    }

    fn on_task_finished(&self, asset: &AssetRef, error: Option<ReadErrorKind>) {
        self.bar.inc(1);
        if let Some(kind) = error {
            self.bar.println(format!("  failed {}: {}", asset, kind));
        }
    }

    fn on_task_retry(&self, asset: &AssetRef, attempt: u32) {
        self.bar.set_message(format!("retrying {} (attempt {})", asset, attempt + 1));
    }
}
