//! Run orchestration.
//!
//! [`PatchEngine`] wires the collaborators together for one request:
//!
//! ```text
//! PatchRequest ─► CatalogClient ─► TaskPlan ─► Scheduler ─► RunSummary
//!                                                  │
//!                          AssetSource ◄── reader ─┤
//!                                PatchSink ◄── assembler
//! ```

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::assembler::{BandPolicy, PatchAssembler};
use crate::catalog::{CatalogClient, CatalogError};
use crate::config::EngineConfig;
use crate::reader::{AssetSource, RasterWindowReader};
use crate::report::RunSummary;
use crate::request::PatchRequest;
use crate::scheduler::{PoolSize, Scheduler, SchedulerOutcome, TaskPlan};
use crate::sink::PatchSink;
use crate::telemetry::{NoopObserver, RunMetrics, RunObserver};

/// Run-fatal errors. Everything below this level ends up in the
/// [`RunSummary`] instead.
#[derive(Debug)]
pub enum EngineError {
    /// The catalog could not resolve the request.
    Catalog(CatalogError),

    /// The worker pool could not be created.
    PoolInit(String),

    /// The band policy cannot be satisfied by the request.
    InvalidPolicy(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Catalog(e) => write!(f, "Catalog resolution failed: {}", e),
            EngineError::PoolInit(msg) => write!(f, "Failed to create worker pool: {}", msg),
            EngineError::InvalidPolicy(msg) => write!(f, "Invalid band policy: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Catalog(e) => Some(e),
            EngineError::PoolInit(_) | EngineError::InvalidPolicy(_) => None,
        }
    }
}

impl From<CatalogError> for EngineError {
    fn from(e: CatalogError) -> Self {
        EngineError::Catalog(e)
    }
}

/// Extracts patches for requests.
///
/// # Example
///
/// ```ignore
/// let engine = PatchEngine::new(
///     Arc::new(StacCatalog::new(DEFAULT_STAC_URL, token.clone())?),
///     Arc::new(HttpSource::new(token)?),
///     Arc::new(GeoTiffSink::new("patches", request.collection())),
///     EngineConfig::default(),
/// );
/// let summary = engine.run(&request, CancellationToken::new()).await?;
/// std::process::exit(summary.exit_status().code());
/// ```
pub struct PatchEngine {
    catalog: Arc<dyn CatalogClient>,
    source: Arc<dyn AssetSource>,
    sink: Arc<dyn PatchSink>,
    config: EngineConfig,
    observer: Arc<dyn RunObserver>,
}

impl PatchEngine {
    pub fn new(
        catalog: Arc<dyn CatalogClient>,
        source: Arc<dyn AssetSource>,
        sink: Arc<dyn PatchSink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            catalog,
            source,
            sink,
            config,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs one request to completion or cancellation.
    ///
    /// Only catalog failures and invalid engine settings are errors; task,
    /// group and patch failures are reported in the summary.
    pub async fn run(
        &self,
        request: &PatchRequest,
        cancel: CancellationToken,
    ) -> Result<RunSummary, EngineError> {
        let pool_size = PoolSize::new(self.config.pool_size()).ok_or_else(|| {
            EngineError::PoolInit("pool size must be at least 1".to_string())
        })?;
        self.check_band_policy(request)?;

        info!(
            collection = request.collection(),
            tiles = request.tiles().len(),
            bands = request.bands().len(),
            dates = %request.date_range(),
            size = %request.size(),
            stride = %request.stride(),
            workers = pool_size.get(),
            "Starting patch extraction"
        );

        let metrics = Arc::new(RunMetrics::new());
        let assets = self.catalog.resolve(request).await?;
        let assets_resolved = assets.len();
        info!(assets = assets_resolved, "Catalog resolved");

        let plan = TaskPlan::build(request, assets);
        let tasks_planned = plan.tasks().len();

        let outcome = if plan.is_empty() {
            warn!(collection = request.collection(), "No assets matched the request");
            SchedulerOutcome {
                reports: Vec::new(),
                was_cancelled: cancel.is_cancelled(),
            }
        } else {
            self.scheduler(request, pool_size, Arc::clone(&metrics))
                .run(plan, cancel)
                .await
        };

        Ok(RunSummary {
            collection: request.collection().to_string(),
            assets_resolved,
            tasks_planned,
            groups: outcome.reports,
            was_cancelled: outcome.was_cancelled,
            metrics: metrics.snapshot(),
        })
    }

    fn scheduler(&self, request: &PatchRequest, pool_size: PoolSize, metrics: Arc<RunMetrics>) -> Scheduler {
        let reader = RasterWindowReader::new(Arc::clone(&self.source))
            .with_target_resolution(self.config.target_resolution());
        let assembler = PatchAssembler::new(request.size(), request.stride())
            .with_edge_mode(self.config.edge_mode())
            .with_band_policy(self.config.band_policy());

        Scheduler::new(reader, assembler, Arc::clone(&self.sink), pool_size)
            .with_retry_policy(self.config.retry_policy().clone())
            .with_task_timeout(self.config.task_timeout())
            .with_metrics(metrics)
            .with_observer(Arc::clone(&self.observer))
    }

    fn check_band_policy(&self, request: &PatchRequest) -> Result<(), EngineError> {
        if let BandPolicy::BestEffort { min_bands } = self.config.band_policy() {
            let requested = request.bands().len();
            if min_bands == 0 || min_bands > requested {
                return Err(EngineError::InvalidPolicy(format!(
                    "best-effort minimum {} must be between 1 and the {} requested bands",
                    min_bands, requested
                )));
            }
        }
        Ok(())
    }
}
