//! Groups handed to the assembler and the patches it produces.

use std::fmt;

use ndarray::Array2;

use crate::asset::GroupKey;
use crate::raster::{Crs, GeoTransform, RasterWindow, SampleType};
use crate::reader::AssetReadError;
use crate::request::PatchSize;

/// Terminal outcome of one read task.
pub type TaskOutcome = Result<RasterWindow, AssetReadError>;

/// Outcome for one requested band of a group.
#[derive(Debug, Clone)]
pub struct BandSlot {
    pub band: String,
    pub outcome: TaskOutcome,
}

/// Every band outcome of one `(tile, date)`, in request band order.
///
/// Only built once all bands are terminal.
#[derive(Debug, Clone)]
pub struct PatchGroup {
    pub key: GroupKey,
    pub bands: Vec<BandSlot>,
}

impl PatchGroup {
    /// Number of bands that were read successfully.
    pub fn available(&self) -> usize {
        self.bands.iter().filter(|b| b.outcome.is_ok()).count()
    }

    /// First failed band in request order, with its error.
    pub fn first_failure(&self) -> Option<(&str, &AssetReadError)> {
        self.bands.iter().find_map(|slot| match &slot.outcome {
            Err(e) => Some((slot.band.as_str(), e)),
            Ok(_) => None,
        })
    }
}

/// One band of a patch.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchBand {
    pub band: String,
    /// Exactly `size.height × size.width`.
    pub data: Array2<f64>,
    /// Value used for padding and substituted bands.
    pub nodata: f64,
    pub sample_type: SampleType,
    /// True if the band was missing and filled with nodata.
    pub substituted: bool,
}

/// A fixed-size multi-band cut of one group.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    pub tile: String,
    pub date: String,
    /// Row of the top-left pixel in the group's reference grid.
    pub row: usize,
    /// Column of the top-left pixel in the group's reference grid.
    pub col: usize,
    pub size: PatchSize,
    /// Bands in request order.
    pub bands: Vec<PatchBand>,
    /// Transform of the patch's own top-left pixel.
    pub transform: GeoTransform,
    pub crs: Crs,
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}[{},{}]", self.tile, self.date, self.row, self.col)
    }
}
