//! Engine configuration.

use std::time::Duration;

use crate::assembler::{BandPolicy, EdgeMode};
use crate::scheduler::{PoolSize, RetryPolicy, DEFAULT_TASK_TIMEOUT};

/// Settings for one engine run.
///
/// The pool size is computed once, when the config is created, from the
/// cores available at that moment; it is not re-evaluated during a run.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use patch_builder::assembler::{BandPolicy, EdgeMode};
/// use patch_builder::config::EngineConfig;
///
/// let config = EngineConfig::default()
///     .with_pool_size(4)
///     .with_task_timeout(Duration::from_secs(30))
///     .with_edge_mode(EdgeMode::Pad)
///     .with_band_policy(BandPolicy::BestEffort { min_bands: 2 });
///
/// assert_eq!(config.pool_size(), 4);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pool_size: usize,
    retry: RetryPolicy,
    task_timeout: Duration,
    edge_mode: EdgeMode,
    band_policy: BandPolicy,
    target_resolution: Option<f64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool_size: PoolSize::from_available_cores().get(),
            retry: RetryPolicy::default(),
            task_timeout: DEFAULT_TASK_TIMEOUT,
            edge_mode: EdgeMode::default(),
            band_policy: BandPolicy::default(),
            target_resolution: None,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of concurrent workers. Zero is rejected when the run starts.
    pub fn with_pool_size(mut self, workers: usize) -> Self {
        self.pool_size = workers;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_edge_mode(mut self, edge_mode: EdgeMode) -> Self {
        self.edge_mode = edge_mode;
        self
    }

    pub fn with_band_policy(mut self, band_policy: BandPolicy) -> Self {
        self.band_policy = band_policy;
        self
    }

    /// Resample every band to this pixel size (world units).
    pub fn with_target_resolution(mut self, resolution: Option<f64>) -> Self {
        self.target_resolution = resolution;
        self
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn task_timeout(&self) -> Duration {
        self.task_timeout
    }

    pub fn edge_mode(&self) -> EdgeMode {
        self.edge_mode
    }

    pub fn band_policy(&self) -> BandPolicy {
        self.band_policy
    }

    pub fn target_resolution(&self) -> Option<f64> {
        self.target_resolution
    }
}
