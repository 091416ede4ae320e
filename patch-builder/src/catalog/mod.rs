//! Asset catalog clients.
//!
//! A [`CatalogClient`] turns a [`PatchRequest`] into the list of assets to
//! read. Catalog failures are fatal for the run: without an asset list there
//! is nothing to schedule.
//!
//! Two implementations are provided:
//!
//! - [`StacCatalog`]: searches a STAC API (Brazil Data Cube style items with
//!   `bdc:tiles` properties)
//! - [`StaticCatalog`]: serves a fixed list, from code or a JSON manifest

mod stac;
mod static_catalog;

pub use stac::{StacCatalog, DEFAULT_STAC_URL};
pub use static_catalog::{ManifestEntry, StaticCatalog};

use thiserror::Error;

use crate::asset::AssetRef;
use crate::reader::BoxFuture;
use crate::request::PatchRequest;

/// Run-fatal catalog failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("catalog rejected credentials: {0}")]
    Auth(String),

    #[error("catalog request failed: {0}")]
    Network(String),

    #[error("invalid catalog response: {0}")]
    InvalidResponse(String),
}

/// Resolves requests to assets.
pub trait CatalogClient: Send + Sync {
    /// Lists one asset per `(tile, date, band)` available for the request.
    ///
    /// Assets may arrive in any order; duplicates are tolerated and resolved
    /// by the task plan.
    fn resolve<'a>(&'a self, request: &'a PatchRequest) -> BoxFuture<'a, Result<Vec<AssetRef>, CatalogError>>;
}
