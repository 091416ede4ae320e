//! Decoded raster buffers and their georeferencing.

use std::fmt;

use ndarray::Array2;

/// Tolerance used when comparing pixel sizes and origins.
pub const GRID_EPSILON: f64 = 1e-6;

/// Affine pixel → world transform, in GDAL coefficient order.
///
/// `x = origin_x + col * pixel_width + row * row_rotation`
/// `y = origin_y + col * col_rotation + row * pixel_height`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub pixel_width: f64,
    pub row_rotation: f64,
    pub origin_y: f64,
    pub col_rotation: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Creates a north-up transform (no rotation).
    pub const fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            pixel_width,
            row_rotation: 0.0,
            origin_y,
            col_rotation: 0.0,
            pixel_height,
        }
    }

    /// Creates a transform from GDAL's six coefficients.
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            origin_x: gt[0],
            pixel_width: gt[1],
            row_rotation: gt[2],
            origin_y: gt[3],
            col_rotation: gt[4],
            pixel_height: gt[5],
        }
    }

    /// Identity grid used for rasters without georeferencing.
    pub const fn pixel_grid() -> Self {
        Self::north_up(0.0, 0.0, 1.0, -1.0)
    }

    /// Returns true if the grid has no rotation terms.
    pub fn is_north_up(&self) -> bool {
        self.row_rotation.abs() < GRID_EPSILON && self.col_rotation.abs() < GRID_EPSILON
    }

    /// World coordinates of the upper-left corner of pixel `(col, row)`.
    pub fn pixel_to_world(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.origin_x + col * self.pixel_width + row * self.row_rotation,
            self.origin_y + col * self.col_rotation + row * self.pixel_height,
        )
    }

    /// Transform of a sub-grid whose top-left pixel is `(col, row)` here.
    pub fn shifted(&self, col: isize, row: isize) -> Self {
        let (origin_x, origin_y) = self.pixel_to_world(col as f64, row as f64);
        Self {
            origin_x,
            origin_y,
            ..*self
        }
    }

    /// Returns true if both grids have the same pixel size and rotation.
    pub fn same_resolution(&self, other: &GeoTransform) -> bool {
        (self.pixel_width - other.pixel_width).abs() < GRID_EPSILON
            && (self.pixel_height - other.pixel_height).abs() < GRID_EPSILON
            && (self.row_rotation - other.row_rotation).abs() < GRID_EPSILON
            && (self.col_rotation - other.col_rotation).abs() < GRID_EPSILON
    }

    /// Whole-pixel offset of `other`'s origin in this grid, if it is aligned.
    ///
    /// Both grids must be north-up with equal resolution.
    pub fn pixel_offset_of(&self, other: &GeoTransform) -> Option<(isize, isize)> {
        let col = (other.origin_x - self.origin_x) / self.pixel_width;
        let row = (other.origin_y - self.origin_y) / self.pixel_height;
        let (col_r, row_r) = (col.round(), row.round());
        if (col - col_r).abs() > GRID_EPSILON || (row - row_r).abs() > GRID_EPSILON {
            return None;
        }
        Some((col_r as isize, row_r as isize))
    }
}

/// Coordinate reference system of a raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Crs {
    /// EPSG code, e.g. `EPSG:32723`.
    Epsg(u32),
    /// No CRS could be determined.
    Unknown,
}

impl Crs {
    /// EPSG code if known.
    pub fn epsg(&self) -> Option<u32> {
        match self {
            Crs::Epsg(code) => Some(*code),
            Crs::Unknown => None,
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Crs::Epsg(code) => write!(f, "EPSG:{}", code),
            Crs::Unknown => f.write_str("unknown"),
        }
    }
}

/// Numeric type of the samples stored in the source file.
///
/// Buffers are held as `f64`, which represents every supported type exactly;
/// the sink converts back to this type when writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleType {
    U8,
    U16,
    U32,
    I8,
    I16,
    I32,
    F32,
    F64,
}

/// One decoded band of one asset, on the tile's reference grid.
///
/// Owned exclusively by the read task that produced it until it is handed to
/// the group tracker; read-only afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterWindow {
    pub band: String,
    pub tile: String,
    pub date: String,
    /// Samples in row-major order, shape `(rows, cols)`.
    pub data: Array2<f64>,
    pub transform: GeoTransform,
    pub crs: Crs,
    pub nodata: Option<f64>,
    pub sample_type: SampleType,
}

impl RasterWindow {
    /// Width in pixels.
    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    /// Height in pixels.
    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    /// Nodata value, falling back to zero when the asset declares none.
    pub fn fill_value(&self) -> f64 {
        self.nodata.unwrap_or(0.0)
    }

    /// Approximate size of the pixel buffer in bytes.
    pub fn byte_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f64>()
    }
}
