//! Raster window reader.
//!
//! Turns one [`AssetRef`] into one decoded [`RasterWindow`]:
//!
//! ```text
//! AssetRef ──► AssetSource::open ──► AssetBuffer (private)
//!                                        │
//!                          spawn_blocking│ decode + crop + resample
//!                                        ▼
//!                                   RasterWindow
//! ```
//!
//! Each read opens its own buffer and builds its own decoder over it, so any
//! number of reads can decode at once without a shared lock. The reader does
//! not retry; the scheduler decides what to do with a failure.

mod error;
mod resample;
mod source;

pub use error::{AssetReadError, ReadErrorKind};
pub use resample::resample_nearest;
pub use source::{AssetBuffer, AssetSource, BoxFuture, FileSource, HttpSource};

use std::sync::Arc;

use tracing::{debug, trace};

use crate::asset::AssetRef;
use crate::geotiff;
use crate::raster::RasterWindow;

/// Reads and decodes single assets.
///
/// Cheap to clone; clones share the underlying source.
#[derive(Clone)]
pub struct RasterWindowReader {
    source: Arc<dyn AssetSource>,
    target_resolution: Option<f64>,
}

impl RasterWindowReader {
    /// Creates a reader over a source, keeping native resolution.
    pub fn new(source: Arc<dyn AssetSource>) -> Self {
        Self {
            source,
            target_resolution: None,
        }
    }

    /// Resamples every raster to `resolution` world units per pixel.
    pub fn with_target_resolution(mut self, resolution: Option<f64>) -> Self {
        self.target_resolution = resolution;
        self
    }

    /// Reads one asset.
    pub async fn read(&self, asset: &AssetRef) -> Result<RasterWindow, AssetReadError> {
        let buffer = self.source.open(asset).await?;
        trace!(asset = %asset, bytes = buffer.len(), "Opened asset");

        let owned = asset.clone();
        let target = self.target_resolution;
        let window = tokio::task::spawn_blocking(move || decode_window(&owned, buffer, target))
            .await
            .map_err(|e| AssetReadError::transient(&asset.href, format!("decode task failed: {}", e)))??;

        debug!(
            asset = %asset,
            width = window.width(),
            height = window.height(),
            crs = %window.crs,
            "Decoded raster window"
        );
        Ok(window)
    }
}

fn decode_window(
    asset: &AssetRef,
    buffer: AssetBuffer,
    target_resolution: Option<f64>,
) -> Result<RasterWindow, AssetReadError> {
    let decoded = geotiff::decode(buffer.as_ref(), asset.window)
        .map_err(|reason| AssetReadError::decode(&asset.href, reason))?;
    drop(buffer);

    let (data, transform) = match target_resolution {
        Some(target) => match resample_nearest(&decoded.data, &decoded.transform, target)
            .map_err(|reason| AssetReadError::decode(&asset.href, reason))?
        {
            Some(resampled) => resampled,
            None => (decoded.data, decoded.transform),
        },
        None => (decoded.data, decoded.transform),
    };

    Ok(RasterWindow {
        band: asset.band.clone(),
        tile: asset.tile.clone(),
        date: asset.date.clone(),
        data,
        transform,
        crs: decoded.crs,
        nodata: decoded.nodata,
        sample_type: decoded.sample_type,
    })
}
