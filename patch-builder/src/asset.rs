//! Addressable assets and the keys used to group them.

use std::fmt;

/// Rectangular pixel window inside a raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelWindow {
    /// Column of the top-left pixel.
    pub col_off: usize,
    /// Row of the top-left pixel.
    pub row_off: usize,
    /// Width in pixels.
    pub width: usize,
    /// Height in pixels.
    pub height: usize,
}

impl PixelWindow {
    /// Creates a window.
    pub const fn new(col_off: usize, row_off: usize, width: usize, height: usize) -> Self {
        Self {
            col_off,
            row_off,
            width,
            height,
        }
    }

    /// Returns true if the window lies entirely inside a `width × height` raster.
    pub fn fits_within(&self, width: usize, height: usize) -> bool {
        self.col_off + self.width <= width && self.row_off + self.height <= height
    }
}

/// Identifies one `(tile, date)` pair: the unit of patch assembly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    /// Tile identifier.
    pub tile: String,
    /// Date identifier (`YYYY-MM-DD`).
    pub date: String,
}

impl GroupKey {
    /// Creates a group key.
    pub fn new(tile: impl Into<String>, date: impl Into<String>) -> Self {
        Self {
            tile: tile.into(),
            date: date.into(),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.tile, self.date)
    }
}

/// One band of one tile at one date, addressable by href.
///
/// Produced by a [`CatalogClient`](crate::catalog::CatalogClient) and read
/// exactly once by a read task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRef {
    /// Tile identifier.
    pub tile: String,
    /// Date identifier (`YYYY-MM-DD`).
    pub date: String,
    /// Band name as requested.
    pub band: String,
    /// URL or local path of the raster file.
    pub href: String,
    /// Optional sub-window to read instead of the full raster.
    pub window: Option<PixelWindow>,
}

impl AssetRef {
    /// Creates an asset reference covering the whole raster.
    pub fn new(
        tile: impl Into<String>,
        date: impl Into<String>,
        band: impl Into<String>,
        href: impl Into<String>,
    ) -> Self {
        Self {
            tile: tile.into(),
            date: date.into(),
            band: band.into(),
            href: href.into(),
            window: None,
        }
    }

    /// Restricts the read to a pixel window.
    pub fn with_window(mut self, window: PixelWindow) -> Self {
        self.window = Some(window);
        self
    }

    /// The `(tile, date)` group this asset belongs to.
    pub fn group_key(&self) -> GroupKey {
        GroupKey::new(self.tile.clone(), self.date.clone())
    }

    /// Final path segment of the href, without query string.
    pub fn file_name(&self) -> &str {
        let path = self.href.split(['?', '#']).next().unwrap_or(&self.href);
        path.rsplit('/').next().unwrap_or(path)
    }
}

impl fmt::Display for AssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.tile, self.date, self.band)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_key_from_asset() {
        let asset = AssetRef::new("081094", "2017-01-01", "red", "https://x/a.tif");
        assert_eq!(asset.group_key(), GroupKey::new("081094", "2017-01-01"));
        assert_eq!(asset.to_string(), "081094@2017-01-01/red");
    }

    #[test]
    fn test_file_name_strips_query() {
        let asset = AssetRef::new(
            "t",
            "d",
            "red",
            "https://data.example/cubes/S2_10_16D_STK_v1_081094_2017-01-01_2017-01-16_red.tif?sig=abc",
        );
        assert_eq!(
            asset.file_name(),
            "S2_10_16D_STK_v1_081094_2017-01-01_2017-01-16_red.tif"
        );
        assert_eq!(AssetRef::new("t", "d", "b", "plain.tif").file_name(), "plain.tif");
    }

    #[test]
    fn test_window_fits() {
        let window = PixelWindow::new(10, 20, 30, 40);
        assert!(window.fits_within(40, 60));
        assert!(!window.fits_within(39, 60));
        assert!(!window.fits_within(40, 59));
    }
}
