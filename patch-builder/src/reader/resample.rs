//! Nearest-neighbour resampling to a target pixel size.

use ndarray::Array2;

use crate::raster::{GeoTransform, GRID_EPSILON};

/// Resamples `data` so its pixels are `target` world units square.
///
/// Returns `None` when the grid already has that resolution. The origin is
/// kept; output dimensions are the input extent divided by `target`, rounded
/// to the nearest pixel. Rotated grids are rejected.
pub fn resample_nearest(
    data: &Array2<f64>,
    transform: &GeoTransform,
    target: f64,
) -> Result<Option<(Array2<f64>, GeoTransform)>, String> {
    if !(target.is_finite() && target > 0.0) {
        return Err(format!("invalid target resolution {}", target));
    }
    if !transform.is_north_up() {
        return Err("cannot resample a rotated grid".into());
    }

    let src_w = transform.pixel_width.abs();
    let src_h = transform.pixel_height.abs();
    if (src_w - target).abs() < GRID_EPSILON && (src_h - target).abs() < GRID_EPSILON {
        return Ok(None);
    }

    let (rows, cols) = data.dim();
    if rows == 0 || cols == 0 {
        return Ok(None);
    }
    let out_cols = ((cols as f64 * src_w / target).round() as usize).max(1);
    let out_rows = ((rows as f64 * src_h / target).round() as usize).max(1);

    let col_scale = target / src_w;
    let row_scale = target / src_h;
    let out = Array2::from_shape_fn((out_rows, out_cols), |(r, c)| {
        let sr = (((r as f64 + 0.5) * row_scale) as usize).min(rows - 1);
        let sc = (((c as f64 + 0.5) * col_scale) as usize).min(cols - 1);
        data[[sr, sc]]
    });

    let resampled = GeoTransform::north_up(
        transform.origin_x,
        transform.origin_y,
        target.copysign(transform.pixel_width),
        target.copysign(transform.pixel_height),
    );
    Ok(Some((out, resampled)))
}
