//! Asset download into a local directory.
//!
//! Fetches resolved assets to `<dir>/<file name of the href>`, the layout
//! [`StacCatalog::with_asset_dir`](crate::catalog::StacCatalog::with_asset_dir)
//! reads back in local mode. Files already present are skipped, so an
//! interrupted download can simply be rerun.
//!
//! Each file is written to a `.partial` sibling and renamed into place; a
//! file under its final name is always complete.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::asset::AssetRef;
use crate::reader::{AssetBuffer, AssetReadError, AssetSource};
use crate::report::ExitStatus;
use crate::scheduler::{PoolSize, RetryPolicy};
use crate::sink::write_atomic;
use crate::telemetry::{NoopObserver, RunObserver};

/// Failure downloading one asset.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Read(#[from] AssetReadError),

    #[error("failed to write {path}: {reason}")]
    Write { path: String, reason: String },
}

/// Outcome for one asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadStatus {
    Downloaded { bytes: usize },
    /// The file was already present.
    Skipped,
    Failed(DownloadError),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub asset: AssetRef,
    pub path: PathBuf,
    pub status: DownloadStatus,
}

/// Result of a download run.
#[derive(Debug, Clone)]
pub struct DownloadSummary {
    /// One report per distinct file, sorted by path.
    pub reports: Vec<DownloadReport>,
    pub was_cancelled: bool,
}

impl DownloadSummary {
    fn count(&self, pred: impl Fn(&DownloadStatus) -> bool) -> usize {
        self.reports.iter().filter(|r| pred(&r.status)).count()
    }

    pub fn downloaded(&self) -> usize {
        self.count(|s| matches!(s, DownloadStatus::Downloaded { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| *s == DownloadStatus::Skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, DownloadStatus::Failed(_)))
    }

    pub fn bytes(&self) -> usize {
        self.reports
            .iter()
            .map(|r| match r.status {
                DownloadStatus::Downloaded { bytes } => bytes,
                _ => 0,
            })
            .sum()
    }

    pub fn exit_status(&self) -> ExitStatus {
        if self.reports.is_empty() {
            ExitStatus::TotalFailure
        } else if self.was_cancelled || self.failed() > 0 {
            ExitStatus::Partial
        } else {
            ExitStatus::Success
        }
    }
}

/// Downloads assets with a bounded number of concurrent transfers.
pub struct AssetDownloader {
    source: Arc<dyn AssetSource>,
    dir: PathBuf,
    pool_size: PoolSize,
    retry: RetryPolicy,
    overwrite: bool,
    observer: Arc<dyn RunObserver>,
}

impl AssetDownloader {
    pub fn new(source: Arc<dyn AssetSource>, dir: impl Into<PathBuf>, pool_size: PoolSize) -> Self {
        Self {
            source,
            dir: dir.into(),
            pool_size,
            retry: RetryPolicy::default(),
            overwrite: false,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Download files that already exist again.
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Receives `on_plan`, `on_task_retry` and `on_task_finished` per asset.
    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Local path of an asset.
    pub fn path_for(&self, asset: &AssetRef) -> PathBuf {
        self.dir.join(asset.file_name())
    }

    /// Downloads every asset. Assets sharing a file name are fetched once.
    pub async fn run(&self, assets: Vec<AssetRef>, cancel: CancellationToken) -> DownloadSummary {
        let mut seen = HashSet::new();
        let assets: Vec<AssetRef> = assets
            .into_iter()
            .filter(|asset| seen.insert(asset.file_name().to_string()))
            .collect();
        self.observer.on_plan(0, assets.len());
        info!(
            assets = assets.len(),
            dir = %self.dir.display(),
            workers = self.pool_size.get(),
            "Starting downloads"
        );

        let mut reports: Vec<DownloadReport> = stream::iter(assets)
            .map(|asset| self.fetch(asset, &cancel))
            .buffer_unordered(self.pool_size.get())
            .collect()
            .await;
        reports.sort_by(|a, b| a.path.cmp(&b.path));

        DownloadSummary {
            reports,
            was_cancelled: cancel.is_cancelled(),
        }
    }

    async fn fetch(&self, asset: AssetRef, cancel: &CancellationToken) -> DownloadReport {
        let path = self.path_for(&asset);
        let status = self.fetch_to(&asset, &path, cancel).await;
        match &status {
            DownloadStatus::Failed(DownloadError::Read(err)) => {
                self.observer.on_task_finished(&asset, Some(err.kind()))
            }
            DownloadStatus::Cancelled => {}
            _ => self.observer.on_task_finished(&asset, None),
        }
        DownloadReport { asset, path, status }
    }

    async fn fetch_to(&self, asset: &AssetRef, path: &Path, cancel: &CancellationToken) -> DownloadStatus {
        if cancel.is_cancelled() {
            return DownloadStatus::Cancelled;
        }
        if !self.overwrite {
            match tokio::fs::try_exists(path).await {
                Ok(true) => {
                    debug!(path = %path.display(), "Asset already downloaded, skipping");
                    return DownloadStatus::Skipped;
                }
                Ok(false) => {}
                Err(e) => return DownloadStatus::Failed(write_error(path, e)),
            }
        }

        let buffer = match self.open_with_retry(asset, cancel).await {
            Some(Ok(buffer)) => buffer,
            Some(Err(err)) => {
                warn!(asset = %asset, href = %asset.href, error = %err, "Download failed");
                return DownloadStatus::Failed(err.into());
            }
            None => return DownloadStatus::Cancelled,
        };

        match write_atomic(path, buffer.as_ref()).await {
            Ok(()) => {
                debug!(path = %path.display(), bytes = buffer.len(), "Downloaded asset");
                DownloadStatus::Downloaded { bytes: buffer.len() }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to save asset");
                DownloadStatus::Failed(write_error(path, e))
            }
        }
    }

    /// Opens the asset, retrying retryable failures. `None` if cancelled.
    async fn open_with_retry(
        &self,
        asset: &AssetRef,
        cancel: &CancellationToken,
    ) -> Option<Result<AssetBuffer, AssetReadError>> {
        let mut attempt = 1;
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                result = self.source.open(asset) => result,
            };
            let err = match result {
                Ok(buffer) => return Some(Ok(buffer)),
                Err(err) => err,
            };
            let delay = match self.retry.delay_for_attempt(attempt) {
                Some(delay) if err.is_retryable() => delay,
                _ => return Some(Err(err)),
            };

            warn!(asset = %asset, attempt, error = %err, "Download failed, retrying");
            self.observer.on_task_retry(asset, attempt);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

fn write_error(path: &Path, err: std::io::Error) -> DownloadError {
    DownloadError::Write {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}
