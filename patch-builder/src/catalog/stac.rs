//! STAC API catalog client.
//!
//! Searches `{url}/search` for items of one collection in the requested date
//! range, following `rel=next` links until the result set is exhausted.
//! Items are matched to tiles through their `bdc:tiles` (or `bdc:tile`)
//! property. A requested band resolves to the asset with that key, or to the
//! asset named by the `eo:bands` entry whose `common_name` matches (so both
//! `B04` and `red` work for Sentinel-2 cubes).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{CatalogClient, CatalogError};
use crate::asset::AssetRef;
use crate::reader::BoxFuture;
use crate::request::{PatchRequest, SourceMode};

/// Brazil Data Cube STAC endpoint.
pub const DEFAULT_STAC_URL: &str = "https://brazildatacube.dpi.inpe.br/stac/";

/// Items requested per page.
const DEFAULT_PAGE_LIMIT: usize = 100;

/// Guard against servers that return a `next` link forever.
const MAX_PAGES: usize = 1000;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Deserialize)]
struct ItemCollection {
    #[serde(default)]
    features: Vec<Item>,
    #[serde(default)]
    links: Vec<Link>,
    #[serde(default)]
    context: Option<SearchContext>,
}

#[derive(Debug, Deserialize)]
struct SearchContext {
    matched: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Link {
    rel: String,
    href: String,
    #[serde(default)]
    method: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Item {
    #[serde(default)]
    id: String,
    #[serde(default)]
    properties: Properties,
    #[serde(default)]
    assets: BTreeMap<String, ItemAsset>,
}

#[derive(Debug, Default, Deserialize)]
struct Properties {
    datetime: Option<String>,
    start_datetime: Option<String>,
    #[serde(rename = "bdc:tiles", default)]
    bdc_tiles: Vec<String>,
    #[serde(rename = "bdc:tile")]
    bdc_tile: Option<String>,
    #[serde(rename = "eo:bands", default)]
    eo_bands: Vec<EoBand>,
}

#[derive(Debug, Deserialize)]
struct ItemAsset {
    href: String,
    #[serde(rename = "eo:bands", default)]
    eo_bands: Vec<EoBand>,
}

#[derive(Debug, Deserialize)]
struct EoBand {
    name: Option<String>,
    common_name: Option<String>,
}

impl Item {
    fn has_tile(&self, tile: &str) -> bool {
        self.properties.bdc_tiles.iter().any(|t| t == tile)
            || self.properties.bdc_tile.as_deref() == Some(tile)
    }

    fn date(&self) -> Option<NaiveDate> {
        let value = self
            .properties
            .datetime
            .as_deref()
            .or(self.properties.start_datetime.as_deref())?;
        NaiveDate::parse_from_str(value.get(..10)?, "%Y-%m-%d").ok()
    }

    /// Href of the asset holding `band`.
    fn band_href(&self, band: &str) -> Option<&str> {
        if let Some(asset) = self.assets.get(band) {
            return Some(&asset.href);
        }
        // Item-level eo:bands name the asset key of each common name.
        let by_common = self
            .properties
            .eo_bands
            .iter()
            .filter(|b| b.common_name.as_deref() == Some(band))
            .filter_map(|b| b.name.as_deref())
            .find_map(|name| self.assets.get(name));
        if let Some(asset) = by_common {
            return Some(&asset.href);
        }
        self.assets
            .values()
            .find(|asset| {
                asset.eo_bands.iter().any(|b| {
                    b.common_name.as_deref() == Some(band) || b.name.as_deref() == Some(band)
                })
            })
            .map(|asset| asset.href.as_str())
    }
}

/// Extracts the requested assets from search results.
pub(crate) fn assets_from_items(
    request: &PatchRequest,
    items: &[Item],
    asset_dir: Option<&std::path::Path>,
) -> Vec<AssetRef> {
    let mut assets = Vec::new();
    for tile in request.tiles() {
        let members: Vec<&Item> = items.iter().filter(|item| item.has_tile(tile)).collect();
        if members.is_empty() {
            warn!(tile = %tile, "Collection has no items for tile");
            continue;
        }

        for item in members {
            let Some(date) = item.date() else {
                warn!(item = %item.id, "Item has no usable datetime, skipping");
                continue;
            };
            if !request.date_range().contains(date) {
                debug!(item = %item.id, date = %date, "Item outside date range, skipping");
                continue;
            }
            let date = date.format("%Y-%m-%d").to_string();

            for band in request.bands() {
                let Some(href) = item.band_href(band) else {
                    warn!(item = %item.id, band = %band, "Item has no asset for band");
                    continue;
                };
                let mut asset = AssetRef::new(tile.clone(), date.clone(), band.clone(), href);
                if let Some(dir) = asset_dir {
                    asset.href = dir.join(asset.file_name()).to_string_lossy().into_owned();
                }
                assets.push(asset);
            }
        }
    }
    assets
}

// =============================================================================
// Client
// =============================================================================

/// Catalog backed by a STAC API.
pub struct StacCatalog {
    client: reqwest::Client,
    url: String,
    access_token: Option<String>,
    asset_dir: Option<PathBuf>,
    page_limit: usize,
}

impl StacCatalog {
    /// Creates a client for the STAC API at `url`.
    pub fn new(url: impl Into<String>, access_token: Option<String>) -> Result<Self, CatalogError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CatalogError::Network(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
            access_token,
            asset_dir: None,
            page_limit: DEFAULT_PAGE_LIMIT,
        })
    }

    /// Directory holding downloaded assets, used in local mode.
    ///
    /// Hrefs become `<dir>/<file name of the href>`.
    pub fn with_asset_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.asset_dir = Some(dir.into());
        self
    }

    pub fn with_page_limit(mut self, limit: usize) -> Self {
        self.page_limit = limit.max(1);
        self
    }

    fn search_url(&self) -> String {
        format!("{}/search", self.url.trim_end_matches('/'))
    }

    async fn fetch_page(&self, request: reqwest::RequestBuilder, collection: &str) -> Result<ItemCollection, CatalogError> {
        let request = match &self.access_token {
            Some(token) => request.query(&[("access_token", token.as_str())]),
            None => request,
        };
        let response = request
            .send()
            .await
            .map_err(|e| CatalogError::Network(e.to_string()))?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => return Err(CatalogError::CollectionNotFound(collection.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(CatalogError::Auth(format!("HTTP {}", response.status())))
            }
            s => return Err(CatalogError::Network(format!("HTTP {} from {}", s, self.url))),
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| CatalogError::Network(e.to_string()))?;
        serde_json::from_slice(&body).map_err(|e| CatalogError::InvalidResponse(e.to_string()))
    }

    async fn search(&self, request: &PatchRequest) -> Result<Vec<Item>, CatalogError> {
        let collection = request.collection();
        let first = self.client.get(self.search_url()).query(&[
            ("collections", collection.to_string()),
            ("datetime", request.date_range().to_stac_interval()),
            ("limit", self.page_limit.to_string()),
        ]);

        let mut page = self.fetch_page(first, collection).await?;
        let matched = page.context.as_ref().and_then(|c| c.matched);
        let mut items = Vec::new();

        for page_number in 1..=MAX_PAGES {
            let next = page
                .links
                .iter()
                .find(|l| {
                    l.rel == "next"
                        && l.method.as_deref().map_or(true, |m| m.eq_ignore_ascii_case("GET"))
                })
                .map(|l| l.href.clone());
            debug!(page = page_number, features = page.features.len(), "Fetched search page");
            let empty = page.features.is_empty();
            items.append(&mut page.features);

            match next {
                Some(href) if !empty => page = self.fetch_page(self.client.get(href), collection).await?,
                _ => break,
            }
        }

        if let Some(matched) = matched {
            if matched != items.len() as u64 {
                warn!(matched, retrieved = items.len(), "Search returned fewer items than matched");
            }
        }
        Ok(items)
    }
}

impl CatalogClient for StacCatalog {
    fn resolve<'a>(&'a self, request: &'a PatchRequest) -> BoxFuture<'a, Result<Vec<AssetRef>, CatalogError>> {
        Box::pin(async move {
            let items = self.search(request).await?;
            let asset_dir = match request.source_mode() {
                SourceMode::Local => self.asset_dir.as_deref(),
                SourceMode::Remote => None,
            };
            let assets = assets_from_items(request, &items, asset_dir);
            info!(
                collection = request.collection(),
                items = items.len(),
                assets = assets.len(),
                "Resolved catalog assets"
            );
            Ok(assets)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    const SEARCH_RESPONSE: &str = r#"{
        "type": "FeatureCollection",
        "context": { "matched": 3, "returned": 3 },
        "features": [
            {
                "id": "S2_10_16D_STK_v1_081094_2017-01-01",
                "properties": {
                    "datetime": "2017-01-01T00:00:00",
                    "bdc:tiles": ["081094"],
                    "eo:bands": [
                        { "name": "B04", "common_name": "red" },
                        { "name": "B08", "common_name": "nir" }
                    ]
                },
                "assets": {
                    "B04": { "href": "https://data.example/081094/2017-01-01_B04.tif?token=1" },
                    "B08": { "href": "https://data.example/081094/2017-01-01_B08.tif" }
                }
            },
            {
                "id": "S2_10_16D_STK_v1_081094_2017-01-17",
                "properties": {
                    "start_datetime": "2017-01-17T00:00:00Z",
                    "bdc:tile": "081094"
                },
                "assets": {
                    "red": { "href": "https://data.example/081094/2017-01-17_red.tif" },
                    "nir_asset": {
                        "href": "https://data.example/081094/2017-01-17_nir.tif",
                        "eo:bands": [{ "name": "B08", "common_name": "nir" }]
                    }
                }
            },
            {
                "id": "S2_10_16D_STK_v1_082094_2017-01-01",
                "properties": { "datetime": "2017-01-01T00:00:00", "bdc:tiles": ["082094"] },
                "assets": { "red": { "href": "https://data.example/082094/red.tif" } }
            }
        ],
        "links": [{ "rel": "self", "href": "https://stac.example/search" }]
    }"#;

    fn request(tiles: &str, mode: SourceMode) -> PatchRequest {
        PatchRequest::builder("S2-SEN2COR_10_16D_STK-1")
            .tiles_csv(tiles)
            .bands_csv("red,nir")
            .datetime("2017-01-01/2017-01-31")
            .size("128x128")
            .source_mode(mode)
            .build()
            .unwrap()
    }

    fn items() -> Vec<Item> {
        let page: ItemCollection = serde_json::from_str(SEARCH_RESPONSE).unwrap();
        assert_eq!(page.context.and_then(|c| c.matched), Some(3));
        page.features
    }

    #[test]
    fn test_bands_resolve_by_key_and_common_name() {
        let assets = assets_from_items(&request("081094", SourceMode::Remote), &items(), None);
        assert_eq!(assets.len(), 4);

        assert_eq!(assets[0].date, "2017-01-01");
        assert_eq!(assets[0].band, "red");
        assert!(assets[0].href.ends_with("_B04.tif?token=1"));
        assert_eq!(assets[1].band, "nir");
        assert!(assets[1].href.ends_with("_B08.tif"));

        assert_eq!(assets[2].date, "2017-01-17");
        assert!(assets[2].href.ends_with("_red.tif"));
        assert!(assets[3].href.ends_with("_nir.tif"));
    }

    #[test]
    fn test_tiles_filter_items() {
        let assets = assets_from_items(&request("082094", SourceMode::Remote), &items(), None);
        // Only red exists for 082094; nir is left for the plan to report.
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].tile, "082094");

        let none = assets_from_items(&request("999999", SourceMode::Remote), &items(), None);
        assert!(none.is_empty());
    }

    #[test]
    fn test_local_mode_rewrites_hrefs() {
        let assets = assets_from_items(
            &request("081094", SourceMode::Local),
            &items(),
            Some(Path::new("/data/downloads")),
        );
        assert_eq!(
            assets[0].href,
            Path::new("/data/downloads")
                .join("2017-01-01_B04.tif")
                .to_string_lossy()
        );
    }

    #[test]
    fn test_search_url() {
        let catalog = StacCatalog::new("https://stac.example/v1/", None).unwrap();
        assert_eq!(catalog.search_url(), "https://stac.example/v1/search");
    }
}
