use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CatalogClient, CatalogError};
use crate::asset::AssetRef;
use crate::reader::BoxFuture;
use crate::request::PatchRequest;

/// One line of a JSON asset manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub tile: String,
    /// `YYYY-MM-DD`.
    pub date: String,
    pub band: String,
    pub href: String,
}

impl From<ManifestEntry> for AssetRef {
    fn from(entry: ManifestEntry) -> Self {
        AssetRef::new(entry.tile, entry.date, entry.band, entry.href)
    }
}

/// Catalog over a fixed asset list.
///
/// Resolution keeps the assets whose tile is requested and whose date falls
/// in the requested range; band filtering is left to the task plan.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    assets: Vec<AssetRef>,
}

impl StaticCatalog {
    pub fn new(assets: Vec<AssetRef>) -> Self {
        Self { assets }
    }

    /// Loads a JSON array of [`ManifestEntry`].
    pub fn from_manifest(path: &Path) -> Result<Self, CatalogError> {
        let bytes = std::fs::read(path).map_err(|e| {
            CatalogError::InvalidResponse(format!("cannot read manifest {}: {}", path.display(), e))
        })?;
        let entries: Vec<ManifestEntry> = serde_json::from_slice(&bytes).map_err(|e| {
            CatalogError::InvalidResponse(format!("malformed manifest {}: {}", path.display(), e))
        })?;
        Ok(Self::new(entries.into_iter().map(AssetRef::from).collect()))
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

impl CatalogClient for StaticCatalog {
    fn resolve<'a>(&'a self, request: &'a PatchRequest) -> BoxFuture<'a, Result<Vec<AssetRef>, CatalogError>> {
        Box::pin(async move {
            let range = request.date_range();
            let assets: Vec<AssetRef> = self
                .assets
                .iter()
                .filter(|a| request.tiles().contains(&a.tile))
                .filter(|a| match NaiveDate::parse_from_str(&a.date, "%Y-%m-%d") {
                    Ok(date) => range.contains(date),
                    Err(_) => false,
                })
                .cloned()
                .collect();
            debug!(total = self.assets.len(), matched = assets.len(), "Resolved static assets");
            Ok(assets)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn request() -> PatchRequest {
        PatchRequest::builder("C")
            .tiles_csv("081094")
            .bands_csv("red")
            .datetime("2017-01-01/2017-01-31")
            .size("64x64")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_filters_tiles_and_dates() {
        let catalog = StaticCatalog::new(vec![
            AssetRef::new("081094", "2017-01-01", "red", "a.tif"),
            AssetRef::new("081094", "2017-02-02", "red", "b.tif"),
            AssetRef::new("082094", "2017-01-01", "red", "c.tif"),
            AssetRef::new("081094", "not-a-date", "red", "d.tif"),
        ]);
        let assets = catalog.resolve(&request()).await.unwrap();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].href, "a.tif");
    }

    #[tokio::test]
    async fn test_manifest_roundtrip() {
        let mut file = NamedTempFile::new().unwrap();
        let entries = vec![ManifestEntry {
            tile: "081094".into(),
            date: "2017-01-17".into(),
            band: "red".into(),
            href: "/data/red.tif".into(),
        }];
        file.write_all(serde_json::to_string(&entries).unwrap().as_bytes())
            .unwrap();

        let catalog = StaticCatalog::from_manifest(file.path()).unwrap();
        assert_eq!(catalog.len(), 1);
        let assets = catalog.resolve(&request()).await.unwrap();
        assert_eq!(assets[0].band, "red");
    }

    #[test]
    fn test_malformed_manifest() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        assert!(matches!(
            StaticCatalog::from_manifest(file.path()),
            Err(CatalogError::InvalidResponse(_))
        ));
    }
}
