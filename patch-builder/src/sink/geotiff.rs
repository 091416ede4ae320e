//! GeoTIFF patch files on disk.
//!
//! Layout:
//!
//! ```text
//! <root>/<collection>/<tile>/<date>/<tile>_<date>_<row>_<col>.tif
//! ```
//!
//! One page per band, in request order, with the band name as the page
//! description. Files are written to a `.partial` sibling and renamed into
//! place, so readers never observe a half-written patch.

use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use super::{write_atomic, PatchSink, SinkError};
use crate::assembler::Patch;
use crate::geotiff::{encode, EncodePage};
use crate::reader::BoxFuture;

/// Writes each patch as a multi-page GeoTIFF.
#[derive(Debug, Clone)]
pub struct GeoTiffSink {
    root: PathBuf,
    collection: String,
    overwrite: bool,
}

impl GeoTiffSink {
    /// Creates a sink writing under `root/collection`.
    pub fn new(root: impl Into<PathBuf>, collection: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            collection: collection.into(),
            overwrite: false,
        }
    }

    /// Replace existing patch files instead of skipping them.
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Output path of a patch.
    pub fn patch_path(&self, patch: &Patch) -> PathBuf {
        self.root
            .join(&self.collection)
            .join(&patch.tile)
            .join(&patch.date)
            .join(format!(
                "{}_{}_{}_{}.tif",
                patch.tile, patch.date, patch.row, patch.col
            ))
    }

    fn encode(patch: &Patch) -> Result<Vec<u8>, SinkError> {
        let pages: Vec<EncodePage<'_>> = patch
            .bands
            .iter()
            .map(|band| EncodePage {
                description: &band.band,
                data: &band.data,
                transform: patch.transform,
                crs: patch.crs,
                nodata: Some(band.nodata),
                sample_type: band.sample_type,
            })
            .collect();
        encode(&pages).map_err(|e| SinkError::Encoding {
            patch: patch.to_string(),
            reason: e.to_string(),
        })
    }
}

impl PatchSink for GeoTiffSink {
    fn write<'a>(&'a self, patch: &'a Patch) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async move {
            let path = self.patch_path(patch);
            let io_err = |e: std::io::Error| SinkError::Io {
                path: path.display().to_string(),
                reason: e.to_string(),
            };

            if !self.overwrite && tokio::fs::try_exists(&path).await.map_err(io_err)? {
                debug!(path = %path.display(), "Patch exists, skipping");
                return Ok(());
            }

            let bytes = Self::encode(patch)?;

            write_atomic(&path, &bytes).await.map_err(io_err)?;

            trace!(path = %path.display(), bytes = bytes.len(), "Wrote patch");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::PatchBand;
    use crate::geotiff::{decode, page_count};
    use crate::raster::{Crs, GeoTransform, SampleType};
    use crate::request::PatchSize;
    use ndarray::Array2;
    use tempfile::TempDir;

    fn patch(value: f64) -> Patch {
        let band = |name: &str, v: f64| PatchBand {
            band: name.into(),
            data: Array2::from_elem((4, 4), v),
            nodata: 0.0,
            sample_type: SampleType::I16,
            substituted: false,
        };
        Patch {
            tile: "081094".into(),
            date: "2017-01-01".into(),
            row: 128,
            col: 256,
            size: PatchSize::new(4, 4),
            bands: vec![band("red", value), band("nir", value + 1.0)],
            transform: GeoTransform::north_up(5_002_560.0, 9_998_720.0, 10.0, -10.0),
            crs: Crs::Epsg(32723),
        }
    }

    #[test]
    fn test_patch_path_layout() {
        let sink = GeoTiffSink::new("/out", "S2-16D");
        assert_eq!(
            sink.patch_path(&patch(1.0)),
            PathBuf::from("/out/S2-16D/081094/2017-01-01/081094_2017-01-01_128_256.tif")
        );
    }

    #[tokio::test]
    async fn test_write_multi_page_geotiff() {
        let dir = TempDir::new().unwrap();
        let sink = GeoTiffSink::new(dir.path(), "C");
        let patch = patch(3.0);
        sink.write(&patch).await.unwrap();

        let path = sink.patch_path(&patch);
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(page_count(&bytes).unwrap(), 2);

        let first = decode(&bytes, None).unwrap();
        assert_eq!(first.sample_type, SampleType::I16);
        assert_eq!(first.crs, Crs::Epsg(32723));
        assert_eq!(first.transform, patch.transform);
        assert!(first.data.iter().all(|v| *v == 3.0));
        assert!(!path.with_extension("tif.partial").exists());
    }

    #[tokio::test]
    async fn test_existing_file_skipped_unless_overwrite() {
        let dir = TempDir::new().unwrap();
        let sink = GeoTiffSink::new(dir.path(), "C");
        sink.write(&patch(1.0)).await.unwrap();
        let path = sink.patch_path(&patch(1.0));
        let original = std::fs::read(&path).unwrap();

        sink.write(&patch(2.0)).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), original);

        let overwriting = sink.clone().with_overwrite(true);
        overwriting.write(&patch(2.0)).await.unwrap();
        assert_ne!(std::fs::read(&path).unwrap(), original);
    }

    #[tokio::test]
    async fn test_rewrite_is_byte_identical() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let patch = patch(5.0);
        let sink_a = GeoTiffSink::new(a.path(), "C");
        let sink_b = GeoTiffSink::new(b.path(), "C");
        sink_a.write(&patch).await.unwrap();
        sink_b.write(&patch).await.unwrap();
        assert_eq!(
            std::fs::read(sink_a.patch_path(&patch)).unwrap(),
            std::fs::read(sink_b.patch_path(&patch)).unwrap()
        );
    }
}
