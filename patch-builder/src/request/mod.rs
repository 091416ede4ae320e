//! Patch request types.
//!
//! A [`PatchRequest`] is the immutable description of one extraction run:
//! which collection, tiles, bands and dates to read, and the geometry of the
//! patches to cut. It is only constructed through [`PatchRequestBuilder`],
//! which validates every field, so the rest of the engine can rely on
//! non-empty, duplicate-free tile and band lists and non-zero sizes.
//!
//! # Example
//!
//! ```
//! use patch_builder::request::{PatchRequest, SourceMode};
//!
//! let request = PatchRequest::builder("S2-SEN2COR_10_16D_STK-1")
//!     .tiles_csv("081094")
//!     .bands_csv("red,nir")
//!     .datetime("2017-01-01/2017-01-31")
//!     .size("128x128")
//!     .source_mode(SourceMode::Remote)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(request.bands(), &["red".to_string(), "nir".to_string()]);
//! assert_eq!(request.size().width, 128);
//! assert_eq!(request.stride(), request.size());
//! ```

mod error;
mod types;

pub use error::RequestError;
pub use types::{DateRange, PatchSize, SourceMode};

use std::collections::HashSet;

/// Immutable description of a patch extraction run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRequest {
    collection: String,
    tiles: Vec<String>,
    bands: Vec<String>,
    date_range: DateRange,
    size: PatchSize,
    stride: PatchSize,
    source_mode: SourceMode,
}

impl PatchRequest {
    /// Starts building a request for the given collection.
    pub fn builder(collection: impl Into<String>) -> PatchRequestBuilder {
        PatchRequestBuilder::new(collection)
    }

    /// Collection identifier, e.g. `S2-SEN2COR_10_16D_STK-1`.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Tile identifiers in request order.
    pub fn tiles(&self) -> &[String] {
        &self.tiles
    }

    /// Band names in request order. Patches carry bands in this order.
    pub fn bands(&self) -> &[String] {
        &self.bands
    }

    /// Position of a band in the request, if requested.
    pub fn band_index(&self, band: &str) -> Option<usize> {
        self.bands.iter().position(|b| b == band)
    }

    /// Inclusive date range.
    pub fn date_range(&self) -> DateRange {
        self.date_range
    }

    /// Patch size in pixels.
    pub fn size(&self) -> PatchSize {
        self.size
    }

    /// Step between consecutive patch origins. Equals the patch size unless
    /// an explicit stride was given.
    pub fn stride(&self) -> PatchSize {
        self.stride
    }

    /// Whether assets are streamed from the catalog or read from local files.
    pub fn source_mode(&self) -> SourceMode {
        self.source_mode
    }
}

/// Builder for [`PatchRequest`].
///
/// String setters accept the same formats as the command line. Parse errors
/// are deferred to [`build`](Self::build) so the builder can be chained.
#[derive(Debug, Clone)]
pub struct PatchRequestBuilder {
    collection: String,
    tiles: Vec<String>,
    bands: Vec<String>,
    date_range: Option<Result<DateRange, RequestError>>,
    size: Option<Result<PatchSize, RequestError>>,
    stride: Option<Result<PatchSize, RequestError>>,
    source_mode: SourceMode,
}

impl PatchRequestBuilder {
    fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            tiles: Vec::new(),
            bands: Vec::new(),
            date_range: None,
            size: None,
            stride: None,
            source_mode: SourceMode::default(),
        }
    }

    /// Sets the tile list.
    pub fn tiles<I, S>(mut self, tiles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tiles = tiles.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the tile list from a comma-delimited string.
    pub fn tiles_csv(self, tiles: &str) -> Self {
        self.tiles(split_csv(tiles))
    }

    /// Sets the band list.
    pub fn bands<I, S>(mut self, bands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bands = bands.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the band list from a comma-delimited string.
    pub fn bands_csv(self, bands: &str) -> Self {
        self.bands(split_csv(bands))
    }

    /// Sets the date range from a single date or a `start/end` range.
    pub fn datetime(mut self, datetime: &str) -> Self {
        self.date_range = Some(datetime.parse());
        self
    }

    /// Sets the date range.
    pub fn date_range(mut self, range: DateRange) -> Self {
        self.date_range = Some(Ok(range));
        self
    }

    /// Sets the patch size from a `WxH` string.
    pub fn size(mut self, size: &str) -> Self {
        self.size = Some(size.parse());
        self
    }

    /// Sets the patch size.
    pub fn patch_size(mut self, size: PatchSize) -> Self {
        self.size = Some(Ok(size));
        self
    }

    /// Sets the stride from a `WxH` string.
    pub fn stride(mut self, stride: &str) -> Self {
        self.stride = Some(stride.parse());
        self
    }

    /// Sets the stride.
    pub fn patch_stride(mut self, stride: PatchSize) -> Self {
        self.stride = Some(Ok(stride));
        self
    }

    /// Sets the source mode.
    pub fn source_mode(mut self, mode: SourceMode) -> Self {
        self.source_mode = mode;
        self
    }

    /// Validates all fields and produces the request.
    pub fn build(self) -> Result<PatchRequest, RequestError> {
        let collection = self.collection.trim().to_string();
        if collection.is_empty() {
            return Err(RequestError::MissingField("collection"));
        }

        let tiles = unique_list(self.tiles, "tiles", RequestError::DuplicateTile)?;
        let bands = unique_list(self.bands, "bands", RequestError::DuplicateBand)?;

        let date_range = self
            .date_range
            .ok_or(RequestError::MissingField("datetime"))??;
        let size = self.size.ok_or(RequestError::MissingField("size"))??;
        let stride = match self.stride {
            Some(stride) => stride?,
            None => size,
        };

        Ok(PatchRequest {
            collection,
            tiles,
            bands,
            date_range,
            size,
            stride,
            source_mode: self.source_mode,
        })
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn unique_list(
    values: Vec<String>,
    field: &'static str,
    duplicate: fn(String) -> RequestError,
) -> Result<Vec<String>, RequestError> {
    let values: Vec<String> = values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();

    if values.is_empty() {
        return Err(RequestError::MissingField(field));
    }

    let mut seen = HashSet::with_capacity(values.len());
    for value in &values {
        if !seen.insert(value.as_str()) {
            return Err(duplicate(value.clone()));
        }
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn base() -> PatchRequestBuilder {
        PatchRequest::builder("S2-SEN2COR_10_16D_STK-1")
            .tiles_csv("081094")
            .bands_csv("red,nir")
            .datetime("2017-01-01/2017-01-31")
            .size("128x128")
    }

    #[test]
    fn test_build_from_cli_strings() {
        let request = base().build().unwrap();
        assert_eq!(request.collection(), "S2-SEN2COR_10_16D_STK-1");
        assert_eq!(request.tiles(), &["081094".to_string()]);
        assert_eq!(request.bands(), &["red".to_string(), "nir".to_string()]);
        assert_eq!(
            request.date_range().start(),
            NaiveDate::from_ymd_opt(2017, 1, 1).unwrap()
        );
        assert_eq!(request.size(), PatchSize::new(128, 128));
        assert_eq!(request.source_mode(), SourceMode::Remote);
    }

    #[test]
    fn test_stride_defaults_to_size() {
        let request = base().build().unwrap();
        assert_eq!(request.stride(), request.size());

        let request = base().stride("64x32").build().unwrap();
        assert_eq!(request.stride(), PatchSize::new(64, 32));
    }

    #[test]
    fn test_csv_whitespace_and_empty_entries_ignored() {
        let request = base().bands_csv(" red , nir ,, swir16").build().unwrap();
        assert_eq!(request.bands().len(), 3);
        assert_eq!(request.band_index("swir16"), Some(2));
        assert_eq!(request.band_index("blue"), None);
    }

    #[test]
    fn test_duplicate_band_rejected() {
        let err = base().bands_csv("red,nir,red").build().unwrap_err();
        assert_eq!(err, RequestError::DuplicateBand("red".to_string()));
    }

    #[test]
    fn test_duplicate_tile_rejected() {
        let err = base().tiles_csv("081094,081094").build().unwrap_err();
        assert_eq!(err, RequestError::DuplicateTile("081094".to_string()));
    }

    #[test]
    fn test_missing_fields() {
        let err = PatchRequest::builder("C").build().unwrap_err();
        assert_eq!(err, RequestError::MissingField("tiles"));

        let err = base().bands_csv("").build().unwrap_err();
        assert_eq!(err, RequestError::MissingField("bands"));

        let err = PatchRequest::builder("  ")
            .tiles_csv("a")
            .bands_csv("b")
            .build()
            .unwrap_err();
        assert_eq!(err, RequestError::MissingField("collection"));
    }

    #[test]
    fn test_invalid_size_reported_at_build() {
        let err = base().size("128").build().unwrap_err();
        assert!(matches!(err, RequestError::InvalidSize(_)));

        let err = base().size("0x128").build().unwrap_err();
        assert!(matches!(err, RequestError::InvalidSize(_)));
    }

    #[test]
    fn test_invalid_datetime_reported_at_build() {
        let err = base().datetime("2017-02-01/2017-01-01").build().unwrap_err();
        assert!(matches!(err, RequestError::InvalidDateRange(_)));
    }
}
