//! patch-builder - training patches from satellite image time series
//!
//! Cuts fixed-size, multi-band patches out of the scenes of a collection,
//! for every requested tile and date, reading assets concurrently and
//! isolating failures to the `(tile, date)` group they belong to.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────┐   ┌───────────────────────────┐   ┌──────────┐
//! │ PatchRequest│──►│ Catalog  │──►│ Scheduler (bounded pool)  │──►│ PatchSink│
//! └────────────┘   └──────────┘   │  reader ─► tracker ─► asm │   └──────────┘
//!                                 └───────────────────────────┘
//! ```
//!
//! - [`request`]: validated, immutable description of the work
//! - [`catalog`]: resolves a request to assets (STAC or static)
//! - [`reader`]: opens and decodes raster windows
//! - [`scheduler`]: task plan, retries, timeouts, cancellation
//! - [`assembler`]: aligns bands and cuts patches
//! - [`sink`]: persists patches (GeoTIFF or memory)
//! - [`engine`]: wires the above for one run
//! - [`download`]: fetches assets to a local directory for later local runs
//!
//! # Example
//!
//! ```ignore
//! use patch_builder::prelude::*;
//!
//! let request = PatchRequest::builder("S2-16D-2")
//!     .tiles_csv("081094")
//!     .bands_csv("red,nir")
//!     .datetime("2017-01-01/2017-01-31")
//!     .size("128x128")
//!     .build()?;
//! let summary = engine.run(&request, CancellationToken::new()).await?;
//! println!("{}", summary);
//! ```

pub mod assembler;
pub mod asset;
pub mod catalog;
pub mod config;
pub mod download;
pub mod engine;
pub mod geotiff;
pub mod logging;
pub mod raster;
pub mod reader;
pub mod report;
pub mod request;
pub mod scheduler;
pub mod sink;
pub mod telemetry;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports for driving a run.
pub mod prelude {
    pub use crate::assembler::{BandPolicy, EdgeMode};
    pub use crate::asset::{AssetRef, GroupKey};
    pub use crate::catalog::{CatalogClient, StacCatalog, StaticCatalog};
    pub use crate::config::EngineConfig;
    pub use crate::download::{AssetDownloader, DownloadSummary};
    pub use crate::engine::{EngineError, PatchEngine};
    pub use crate::reader::{AssetSource, FileSource, HttpSource};
    pub use crate::report::{ExitStatus, RunSummary};
    pub use crate::request::{PatchRequest, SourceMode};
    pub use crate::sink::{GeoTiffSink, MemorySink, PatchSink};
    pub use tokio_util::sync::CancellationToken;
}
