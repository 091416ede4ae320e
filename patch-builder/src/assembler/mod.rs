//! Patch assembler.
//!
//! Turns a completed [`PatchGroup`] into fixed-size [`Patch`]es. Assembly
//! has two steps:
//!
//! 1. [`PatchAssembler::prepare`] applies the band policy, checks that all
//!    present bands share one grid, intersects their extents and computes
//!    the patch offsets. This is where group-level failures surface.
//! 2. [`AssembledGroup::patch`] cuts one patch at a time, so a large tile
//!    never holds more than one patch's worth of copies in memory.
//!
//! # Offsets
//!
//! ```text
//!  extent = 300, size = 128, stride = 128
//!
//!  0         128        256   300
//!  ├──────────┼──────────┼─────┤
//!  [ patch 0 ][ patch 1 ][ pad ]
//!
//!  EdgeMode::Drop → offsets 0, 128
//!  EdgeMode::Pad  → offsets 0, 128, 256 (last one padded with nodata)
//! ```

mod error;
mod types;

pub use error::AssemblyError;
pub use types::{BandSlot, Patch, PatchBand, PatchGroup, TaskOutcome};

use std::fmt;
use std::str::FromStr;

use ndarray::{s, Array2};

use crate::asset::GroupKey;
use crate::raster::{Crs, GeoTransform, RasterWindow, SampleType};
use crate::request::PatchSize;

/// What to do with windows that would cross the edge of the common extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EdgeMode {
    /// Keep only windows fully inside the extent.
    #[default]
    Drop,
    /// Keep every window that starts inside, padding with nodata.
    Pad,
}

impl FromStr for EdgeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "drop" => Ok(EdgeMode::Drop),
            "pad" => Ok(EdgeMode::Pad),
            other => Err(format!("invalid edge mode '{}' (expected drop or pad)", other)),
        }
    }
}

impl fmt::Display for EdgeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeMode::Drop => f.write_str("drop"),
            EdgeMode::Pad => f.write_str("pad"),
        }
    }
}

/// How many bands a group needs before it is assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BandPolicy {
    /// Every requested band must be read.
    #[default]
    Strict,
    /// At least `min_bands` must be read; missing bands are filled with
    /// nodata.
    BestEffort { min_bands: usize },
}

/// Start offsets along one axis.
pub fn axis_offsets(extent: usize, size: usize, stride: usize, edge: EdgeMode) -> Vec<usize> {
    if size == 0 || stride == 0 {
        return Vec::new();
    }
    let mut offsets = Vec::new();
    let mut start = 0;
    loop {
        let keep = match edge {
            EdgeMode::Drop => start + size <= extent,
            EdgeMode::Pad => start < extent,
        };
        if !keep {
            break;
        }
        offsets.push(start);
        start += stride;
    }
    offsets
}

/// Cuts patches out of completed groups.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchAssembler {
    size: PatchSize,
    stride: PatchSize,
    edge_mode: EdgeMode,
    band_policy: BandPolicy,
}

impl PatchAssembler {
    /// Creates an assembler for the given geometry.
    pub fn new(size: PatchSize, stride: PatchSize) -> Self {
        Self {
            size,
            stride,
            edge_mode: EdgeMode::default(),
            band_policy: BandPolicy::default(),
        }
    }

    pub fn with_edge_mode(mut self, edge_mode: EdgeMode) -> Self {
        self.edge_mode = edge_mode;
        self
    }

    pub fn with_band_policy(mut self, band_policy: BandPolicy) -> Self {
        self.band_policy = band_policy;
        self
    }

    pub fn size(&self) -> PatchSize {
        self.size
    }

    /// Validates a group and computes its patch layout.
    pub fn prepare(&self, group: PatchGroup) -> Result<AssembledGroup, AssemblyError> {
        let total = group.bands.len();
        let available = group.available();

        match self.band_policy {
            BandPolicy::Strict => {
                if let Some((band, err)) = group.first_failure() {
                    return Err(AssemblyError::BandUnavailable {
                        band: band.to_string(),
                        kind: err.kind(),
                    });
                }
            }
            BandPolicy::BestEffort { min_bands } => {
                let required = min_bands.clamp(1, total.max(1));
                if available < required {
                    return Err(AssemblyError::InsufficientBands { available, required });
                }
            }
        }
        if available == 0 {
            return Err(AssemblyError::InsufficientBands {
                available,
                required: 1,
            });
        }

        let PatchGroup { key, bands } = group;
        let mut slots: Vec<(String, Option<RasterWindow>)> = bands
            .into_iter()
            .map(|slot| (slot.band, slot.outcome.ok()))
            .collect();

        let reference = slots
            .iter()
            .find_map(|(_, w)| w.as_ref())
            .ok_or(AssemblyError::InsufficientBands {
                available: 0,
                required: 1,
            })?;
        let ref_transform = reference.transform;
        let crs = reference.crs;
        let fill = reference.fill_value();
        let fill_type = reference.sample_type;

        if !ref_transform.is_north_up() {
            return Err(AssemblyError::GridMismatch {
                band: reference.band.clone(),
                reason: "rotated grids are not supported".into(),
            });
        }

        // Extent of the intersection in reference pixel coordinates.
        let (mut left, mut top) = (isize::MIN, isize::MIN);
        let (mut right, mut bottom) = (isize::MAX, isize::MAX);
        let mut offsets = Vec::with_capacity(slots.len());
        for (band, window) in &slots {
            let Some(window) = window else {
                offsets.push((0, 0));
                continue;
            };
            let (col, row) = grid_offset(&ref_transform, crs, window).map_err(|reason| {
                AssemblyError::GridMismatch {
                    band: band.clone(),
                    reason,
                }
            })?;
            offsets.push((col, row));
            left = left.max(col);
            top = top.max(row);
            right = right.min(col + window.width() as isize);
            bottom = bottom.min(row + window.height() as isize);
        }
        if right <= left || bottom <= top {
            return Err(AssemblyError::NoOverlap);
        }

        let width = (right - left) as usize;
        let height = (bottom - top) as usize;
        let cols = axis_offsets(width, self.size.width, self.stride.width, self.edge_mode);
        let rows = axis_offsets(height, self.size.height, self.stride.height, self.edge_mode);

        let bands = slots
            .drain(..)
            .zip(offsets)
            .map(|((band, window), (col, row))| match window {
                Some(window) => PreparedBand {
                    nodata: window.fill_value(),
                    sample_type: window.sample_type,
                    band,
                    // Position of the intersection's top-left pixel in this band.
                    origin: ((left - col) as usize, (top - row) as usize),
                    window: Some(window),
                },
                None => PreparedBand {
                    band,
                    window: None,
                    origin: (0, 0),
                    nodata: fill,
                    sample_type: fill_type,
                },
            })
            .collect();

        Ok(AssembledGroup {
            key,
            size: self.size,
            left: left as usize,
            top: top as usize,
            width,
            height,
            ref_transform,
            crs,
            bands,
            rows,
            cols,
        })
    }
}

fn grid_offset(reference: &GeoTransform, crs: Crs, window: &RasterWindow) -> Result<(isize, isize), String> {
    if window.crs != crs {
        return Err(format!("CRS {} differs from reference {}", window.crs, crs));
    }
    if !window.transform.is_north_up() {
        return Err("rotated grids are not supported".into());
    }
    if !reference.same_resolution(&window.transform) {
        return Err(format!(
            "pixel size {}x{} differs from reference {}x{}",
            window.transform.pixel_width,
            window.transform.pixel_height,
            reference.pixel_width,
            reference.pixel_height
        ));
    }
    reference
        .pixel_offset_of(&window.transform)
        .ok_or_else(|| "origin is not offset by whole pixels".to_string())
}

#[derive(Debug)]
struct PreparedBand {
    band: String,
    window: Option<RasterWindow>,
    /// `(col, row)` of the intersection origin inside `window`.
    origin: (usize, usize),
    nodata: f64,
    sample_type: SampleType,
}

/// A validated group ready to be cut into patches.
#[derive(Debug)]
pub struct AssembledGroup {
    key: GroupKey,
    size: PatchSize,
    /// Intersection origin in reference pixel coordinates.
    left: usize,
    top: usize,
    /// Intersection extent in pixels.
    width: usize,
    height: usize,
    ref_transform: GeoTransform,
    crs: Crs,
    bands: Vec<PreparedBand>,
    rows: Vec<usize>,
    cols: Vec<usize>,
}

impl AssembledGroup {
    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    /// Number of patches this group yields.
    pub fn patch_count(&self) -> usize {
        self.rows.len() * self.cols.len()
    }

    /// Names of bands substituted with nodata.
    pub fn substituted_bands(&self) -> Vec<String> {
        self.bands
            .iter()
            .filter(|b| b.window.is_none())
            .map(|b| b.band.clone())
            .collect()
    }

    /// Cuts patch number `index` (row-major over offsets).
    pub fn patch(&self, index: usize) -> Option<Patch> {
        if index >= self.patch_count() {
            return None;
        }
        let row = self.rows[index / self.cols.len()];
        let col = self.cols[index % self.cols.len()];
        Some(self.cut(row, col))
    }

    /// Iterates over all patches in row-major order.
    pub fn patches(&self) -> impl Iterator<Item = Patch> + '_ {
        (0..self.patch_count()).filter_map(move |i| self.patch(i))
    }

    fn cut(&self, row: usize, col: usize) -> Patch {
        let (w, h) = (self.size.width, self.size.height);
        // Every band pads from the intersection edge, never from its own.
        let cw = w.min(self.width - col);
        let rh = h.min(self.height - row);

        let bands = self
            .bands
            .iter()
            .map(|prepared| {
                let mut data = Array2::from_elem((h, w), prepared.nodata);
                if let Some(window) = &prepared.window {
                    let c0 = prepared.origin.0 + col;
                    let r0 = prepared.origin.1 + row;
                    data.slice_mut(s![..rh, ..cw])
                        .assign(&window.data.slice(s![r0..r0 + rh, c0..c0 + cw]));
                }
                PatchBand {
                    band: prepared.band.clone(),
                    data,
                    nodata: prepared.nodata,
                    sample_type: prepared.sample_type,
                    substituted: prepared.window.is_none(),
                }
            })
            .collect();

        let grid_row = self.top + row;
        let grid_col = self.left + col;
        Patch {
            tile: self.key.tile.clone(),
            date: self.key.date.clone(),
            row: grid_row,
            col: grid_col,
            size: self.size,
            bands,
            transform: self.ref_transform.shifted(grid_col as isize, grid_row as isize),
            crs: self.crs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{AssetReadError, ReadErrorKind};

    fn window(band: &str, rows: usize, cols: usize, transform: GeoTransform, value: f64) -> RasterWindow {
        RasterWindow {
            band: band.into(),
            tile: "081094".into(),
            date: "2017-01-01".into(),
            data: Array2::from_elem((rows, cols), value),
            transform,
            crs: Crs::Epsg(32723),
            nodata: None,
            sample_type: SampleType::I16,
        }
    }

    fn grid() -> GeoTransform {
        GeoTransform::north_up(5_000_000.0, 10_000_000.0, 10.0, -10.0)
    }

    fn group(outcomes: Vec<(&str, TaskOutcome)>) -> PatchGroup {
        PatchGroup {
            key: GroupKey::new("081094", "2017-01-01"),
            bands: outcomes
                .into_iter()
                .map(|(band, outcome)| BandSlot {
                    band: band.into(),
                    outcome,
                })
                .collect(),
        }
    }

    fn not_found(band: &str) -> TaskOutcome {
        Err(AssetReadError::NotFound {
            href: format!("{}.tif", band),
        })
    }

    #[test]
    fn test_axis_offsets() {
        assert_eq!(axis_offsets(300, 128, 128, EdgeMode::Drop), vec![0, 128]);
        assert_eq!(axis_offsets(300, 128, 128, EdgeMode::Pad), vec![0, 128, 256]);
        assert_eq!(axis_offsets(256, 128, 64, EdgeMode::Drop), vec![0, 64, 128]);
        assert_eq!(axis_offsets(100, 128, 128, EdgeMode::Drop), Vec::<usize>::new());
        assert_eq!(axis_offsets(100, 128, 128, EdgeMode::Pad), vec![0]);
    }

    #[test]
    fn test_red_nir_example() {
        let assembler = PatchAssembler::new(PatchSize::new(128, 128), PatchSize::new(128, 128));
        let group = group(vec![
            ("red", Ok(window("red", 512, 512, grid(), 1.0))),
            ("nir", Ok(window("nir", 512, 512, grid(), 2.0))),
        ]);

        let assembled = assembler.prepare(group).unwrap();
        assert_eq!(assembled.patch_count(), 16);

        let patches: Vec<Patch> = assembled.patches().collect();
        for patch in &patches {
            assert_eq!(patch.bands.len(), 2);
            assert_eq!(patch.bands[0].band, "red");
            assert_eq!(patch.bands[1].band, "nir");
            for band in &patch.bands {
                assert_eq!(band.data.dim(), (128, 128));
            }
        }
        assert!(patches[0].bands[0].data.iter().all(|v| *v == 1.0));
        assert!(patches[0].bands[1].data.iter().all(|v| *v == 2.0));

        let last = patches.last().unwrap();
        assert_eq!((last.row, last.col), (384, 384));
        assert_eq!(
            last.transform.pixel_to_world(0.0, 0.0),
            (5_003_840.0, 9_996_160.0)
        );
    }

    #[test]
    fn test_strict_mode_reports_failed_band() {
        let assembler = PatchAssembler::new(PatchSize::new(4, 4), PatchSize::new(4, 4));
        let group = group(vec![
            ("red", not_found("red")),
            ("nir", Ok(window("nir", 8, 8, grid(), 2.0))),
        ]);

        let err = assembler.prepare(group).unwrap_err();
        assert_eq!(
            err,
            AssemblyError::BandUnavailable {
                band: "red".into(),
                kind: ReadErrorKind::NotFound
            }
        );
    }

    #[test]
    fn test_best_effort_substitutes_nodata() {
        let assembler = PatchAssembler::new(PatchSize::new(4, 4), PatchSize::new(4, 4))
            .with_band_policy(BandPolicy::BestEffort { min_bands: 1 });
        let mut nir = window("nir", 8, 8, grid(), 2.0);
        nir.nodata = Some(-9999.0);
        let group = group(vec![("red", not_found("red")), ("nir", Ok(nir))]);

        let assembled = assembler.prepare(group).unwrap();
        assert_eq!(assembled.substituted_bands(), vec!["red".to_string()]);

        let patch = assembled.patch(0).unwrap();
        assert_eq!(patch.bands[0].band, "red");
        assert!(patch.bands[0].substituted);
        assert!(patch.bands[0].data.iter().all(|v| *v == -9999.0));
        assert_eq!(patch.bands[0].data.dim(), (4, 4));
    }

    #[test]
    fn test_best_effort_minimum_enforced() {
        let assembler = PatchAssembler::new(PatchSize::new(4, 4), PatchSize::new(4, 4))
            .with_band_policy(BandPolicy::BestEffort { min_bands: 2 });
        let group = group(vec![
            ("red", not_found("red")),
            ("nir", Ok(window("nir", 8, 8, grid(), 2.0))),
        ]);
        assert_eq!(
            assembler.prepare(group).unwrap_err(),
            AssemblyError::InsufficientBands {
                available: 1,
                required: 2
            }
        );
    }

    #[test]
    fn test_offset_grids_use_intersection() {
        // nir starts 2 pixels right and 1 pixel down of red.
        let assembler = PatchAssembler::new(PatchSize::new(2, 2), PatchSize::new(2, 2));
        let red = Array2::from_shape_fn((6, 6), |(r, c)| (r * 10 + c) as f64);
        let mut red_window = window("red", 6, 6, grid(), 0.0);
        red_window.data = red;
        let group = group(vec![
            ("red", Ok(red_window)),
            ("nir", Ok(window("nir", 6, 6, grid().shifted(2, 1), 5.0))),
        ]);

        let assembled = assembler.prepare(group).unwrap();
        // Intersection is 4 wide and 5 tall → 2 × 2 full patches.
        assert_eq!(assembled.patch_count(), 4);

        let first = assembled.patch(0).unwrap();
        assert_eq!((first.row, first.col), (1, 2));
        assert_eq!(first.bands[0].data[[0, 0]], 12.0);
        assert_eq!(first.bands[1].data[[0, 0]], 5.0);
    }

    #[test]
    fn test_grid_mismatch() {
        let assembler = PatchAssembler::new(PatchSize::new(2, 2), PatchSize::new(2, 2));
        let coarse = GeoTransform::north_up(5_000_000.0, 10_000_000.0, 20.0, -20.0);
        let coarse_group = group(vec![
            ("red", Ok(window("red", 4, 4, grid(), 1.0))),
            ("swir16", Ok(window("swir16", 4, 4, coarse, 1.0))),
        ]);
        assert!(matches!(
            assembler.prepare(coarse_group).unwrap_err(),
            AssemblyError::GridMismatch { band, .. } if band == "swir16"
        ));

        let mut other_crs = window("nir", 4, 4, grid(), 1.0);
        other_crs.crs = Crs::Epsg(32722);
        let crs_group = group(vec![
            ("red", Ok(window("red", 4, 4, grid(), 1.0))),
            ("nir", Ok(other_crs)),
        ]);
        assert!(matches!(
            assembler.prepare(crs_group).unwrap_err(),
            AssemblyError::GridMismatch { .. }
        ));
    }

    #[test]
    fn test_no_overlap() {
        let assembler = PatchAssembler::new(PatchSize::new(2, 2), PatchSize::new(2, 2));
        let group = group(vec![
            ("red", Ok(window("red", 4, 4, grid(), 1.0))),
            ("nir", Ok(window("nir", 4, 4, grid().shifted(10, 0), 1.0))),
        ]);
        assert_eq!(assembler.prepare(group).unwrap_err(), AssemblyError::NoOverlap);
    }

    #[test]
    fn test_pad_mode_fills_edges() {
        let assembler = PatchAssembler::new(PatchSize::new(4, 4), PatchSize::new(4, 4))
            .with_edge_mode(EdgeMode::Pad);
        let group = group(vec![("red", Ok(window("red", 6, 6, grid(), 7.0)))]);

        let assembled = assembler.prepare(group).unwrap();
        assert_eq!(assembled.patch_count(), 4);

        let corner = assembled.patch(3).unwrap();
        assert_eq!((corner.row, corner.col), (4, 4));
        let data = &corner.bands[0].data;
        assert_eq!(data.dim(), (4, 4));
        assert_eq!(data[[1, 1]], 7.0);
        assert_eq!(data[[2, 2]], 0.0);
        assert_eq!(data[[0, 3]], 0.0);
    }

    #[test]
    fn test_pad_mode_pads_shifted_bands_from_common_edge() {
        // nir starts 2 pixels right and 1 pixel down of red, so it reaches past
        // the intersection on the right and bottom.
        let assembler = PatchAssembler::new(PatchSize::new(4, 4), PatchSize::new(4, 4))
            .with_edge_mode(EdgeMode::Pad);
        let group = group(vec![
            ("red", Ok(window("red", 6, 6, grid(), 7.0))),
            ("nir", Ok(window("nir", 6, 6, grid().shifted(2, 1), 9.0))),
        ]);

        let assembled = assembler.prepare(group).unwrap();
        // Intersection is 4 wide and 5 tall.
        assert_eq!(assembled.patch_count(), 2);

        let bottom = assembled.patch(1).unwrap();
        assert_eq!((bottom.row, bottom.col), (5, 2));
        let (red, nir) = (&bottom.bands[0].data, &bottom.bands[1].data);
        for r in 0..4 {
            for c in 0..4 {
                assert_eq!(red[[r, c]] == 0.0, nir[[r, c]] == 0.0, "pixel ({}, {})", r, c);
            }
        }
        assert_eq!(red[[0, 0]], 7.0);
        assert_eq!(nir[[0, 0]], 9.0);
        assert_eq!(nir[[1, 0]], 0.0);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn expected(extent: usize, size: usize, stride: usize, edge: EdgeMode) -> usize {
            match edge {
                EdgeMode::Drop if extent < size => 0,
                EdgeMode::Drop => (extent - size) / stride + 1,
                EdgeMode::Pad => extent.div_ceil(stride),
            }
        }

        proptest! {
            #[test]
            fn patch_count_matches_geometry(
                rows in 1usize..40,
                cols in 1usize..40,
                pw in 1usize..12,
                ph in 1usize..12,
                sw in 1usize..12,
                sh in 1usize..12,
                pad in any::<bool>(),
            ) {
                let edge = if pad { EdgeMode::Pad } else { EdgeMode::Drop };
                let assembler = PatchAssembler::new(PatchSize::new(pw, ph), PatchSize::new(sw, sh))
                    .with_edge_mode(edge);
                let group = group(vec![
                    ("red", Ok(window("red", rows, cols, grid(), 1.0))),
                    ("nir", Ok(window("nir", rows, cols, grid(), 2.0))),
                ]);

                let assembled = assembler.prepare(group).unwrap();
                let count = expected(cols, pw, sw, edge) * expected(rows, ph, sh, edge);
                prop_assert_eq!(assembled.patch_count(), count);

                for patch in assembled.patches() {
                    prop_assert_eq!(patch.bands.len(), 2);
                    for band in &patch.bands {
                        prop_assert_eq!(band.data.dim(), (ph, pw));
                    }
                }
            }
        }
    }
}
