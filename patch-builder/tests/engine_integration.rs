//! End-to-end runs over synthetic GeoTIFF assets on disk.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::Array2;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use patch_builder::assembler::{BandPolicy, EdgeMode};
use patch_builder::asset::{AssetRef, GroupKey};
use patch_builder::catalog::StaticCatalog;
use patch_builder::config::EngineConfig;
use patch_builder::engine::{EngineError, PatchEngine};
use patch_builder::geotiff::{self, EncodePage};
use patch_builder::raster::{Crs, GeoTransform, SampleType};
use patch_builder::reader::{FileSource, ReadErrorKind};
use patch_builder::report::{DropReason, ExitStatus, RunSummary};
use patch_builder::request::PatchRequest;
use patch_builder::scheduler::RetryPolicy;
use patch_builder::sink::{GeoTiffSink, MemorySink, PatchSink};

const TILE: &str = "081094";
const DATES: [&str; 2] = ["2017-01-01", "2017-01-17"];

// ============================================================================
// Fixtures
// ============================================================================

/// Writes a single-band UInt16 GeoTIFF whose pixel value encodes its position.
fn write_band(dir: &Path, tile: &str, date: &str, band: &str, size: usize, seed: u16) -> PathBuf {
    let data = Array2::from_shape_fn((size, size), |(r, c)| {
        f64::from(seed) + ((r * 7 + c * 3) % 1000) as f64
    });
    let page = EncodePage {
        description: band,
        data: &data,
        transform: GeoTransform::north_up(5_500_000.0, 10_200_000.0, 10.0, -10.0),
        crs: Crs::Epsg(32723),
        nodata: Some(0.0),
        sample_type: SampleType::U16,
    };
    let bytes = geotiff::encode(&[page]).unwrap();
    let path = dir.join(format!("{}_{}_{}.tif", tile, date.replace('-', ""), band));
    std::fs::write(&path, bytes).unwrap();
    path
}

/// Number of pages in an encoded TIFF.
fn page_count(bytes: &[u8]) -> usize {
    let mut decoder = tiff::decoder::Decoder::new(std::io::Cursor::new(bytes)).unwrap();
    let mut pages = 1;
    while decoder.more_images() {
        decoder.next_image().unwrap();
        pages += 1;
    }
    pages
}

/// Writes every (tile, date, band) asset and returns the catalog entries.
fn write_assets(dir: &Path, tiles: &[&str], bands: &[&str], size: usize) -> Vec<AssetRef> {
    let mut assets = Vec::new();
    for tile in tiles {
        for (d, date) in DATES.iter().enumerate() {
            for (b, band) in bands.iter().enumerate() {
                let path = write_band(dir, tile, date, band, size, (100 * (d + 1) + 10 * b) as u16);
                assets.push(AssetRef::new(*tile, *date, *band, path.display().to_string()));
            }
        }
    }
    assets
}

fn request(tiles: &str, bands: &str, size: &str) -> PatchRequest {
    PatchRequest::builder("S2-16D-2")
        .tiles_csv(tiles)
        .bands_csv(bands)
        .datetime("2017-01-01/2017-01-31")
        .size(size)
        .build()
        .unwrap()
}

fn config(workers: usize) -> EngineConfig {
    EngineConfig::default()
        .with_pool_size(workers)
        .with_retry_policy(RetryPolicy::None)
}

async fn run(
    assets: Vec<AssetRef>,
    request: &PatchRequest,
    sink: Arc<dyn PatchSink>,
    config: EngineConfig,
) -> Result<RunSummary, EngineError> {
    let engine = PatchEngine::new(
        Arc::new(StaticCatalog::new(assets)),
        Arc::new(FileSource::new()),
        sink,
        config,
    );
    engine.run(request, CancellationToken::new()).await
}

fn read_tree(root: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let bytes = std::fs::read(&path).unwrap();
                files.push((path.strip_prefix(root).unwrap().to_path_buf(), bytes));
            }
        }
    }
    files.sort();
    files
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_red_nir_example_produces_sixteen_patches_per_date() {
    let dir = TempDir::new().unwrap();
    let assets = write_assets(dir.path(), &[TILE], &["red", "nir"], 512);
    let sink = Arc::new(MemorySink::new());

    let summary = run(assets, &request(TILE, "red,nir", "128x128"), sink.clone(), config(4))
        .await
        .unwrap();

    assert_eq!(summary.exit_status(), ExitStatus::Success);
    assert_eq!(summary.groups_requested(), 2);
    assert_eq!(summary.patches_written(), 32);
    assert_eq!(summary.metrics.tasks_succeeded, 4);

    let patches = sink.patches();
    assert_eq!(patches.len(), 32);
    for patch in &patches {
        assert_eq!(patch.bands.len(), 2);
        assert_eq!(patch.bands[0].band, "red");
        assert_eq!(patch.bands[1].band, "nir");
        for band in &patch.bands {
            assert_eq!(band.data.dim(), (128, 128));
            assert_eq!(band.sample_type, SampleType::U16);
        }
        assert_eq!(patch.crs, Crs::Epsg(32723));
    }

    // Pixel values come from the right place of the source raster.
    let patch = patches
        .iter()
        .find(|p| p.date == "2017-01-01" && p.row == 128 && p.col == 256)
        .unwrap();
    assert_eq!(patch.bands[0].data[[0, 0]], 100.0 + ((128 * 7 + 256 * 3) % 1000) as f64);
    assert_eq!(patch.bands[1].data[[0, 0]], 110.0 + ((128 * 7 + 256 * 3) % 1000) as f64);
}

#[tokio::test]
async fn test_missing_catalog_band_drops_only_its_group() {
    let dir = TempDir::new().unwrap();
    let assets: Vec<AssetRef> = write_assets(dir.path(), &[TILE], &["red", "nir"], 256)
        .into_iter()
        .filter(|a| !(a.date == DATES[1] && a.band == "red"))
        .collect();
    let sink = Arc::new(MemorySink::new());

    let summary = run(assets, &request(TILE, "red,nir", "128x128"), sink.clone(), config(2))
        .await
        .unwrap();

    assert_eq!(summary.exit_status(), ExitStatus::Partial);
    let ok = summary.group(&GroupKey::new(TILE, DATES[0])).unwrap();
    assert!(ok.is_succeeded());
    assert_eq!(ok.patches_written, 4);

    let dropped = summary.group(&GroupKey::new(TILE, DATES[1])).unwrap();
    assert_eq!(
        dropped.drop_reason(),
        Some(&DropReason::ReadFailed {
            band: "red".into(),
            kind: ReadErrorKind::NotFound,
        })
    );
    assert_eq!(dropped.patches_written, 0);
    assert!(sink.patches().iter().all(|p| p.date == DATES[0]));
}

#[tokio::test]
async fn test_deleted_asset_file_is_not_found() {
    let dir = TempDir::new().unwrap();
    let assets = write_assets(dir.path(), &[TILE], &["red", "nir"], 256);
    let victim = assets
        .iter()
        .find(|a| a.date == DATES[0] && a.band == "nir")
        .unwrap();
    std::fs::remove_file(&victim.href).unwrap();

    let summary = run(assets, &request(TILE, "red,nir", "128x128"), Arc::new(MemorySink::new()), config(3))
        .await
        .unwrap();

    let dropped = summary.group(&GroupKey::new(TILE, DATES[0])).unwrap();
    assert_eq!(
        dropped.drop_reason().map(ToString::to_string).as_deref(),
        Some("AssetReadError.NotFound (band 'nir')")
    );
    assert!(summary.group(&GroupKey::new(TILE, DATES[1])).unwrap().is_succeeded());
    assert_eq!(summary.dropped().count(), 1);
}

#[tokio::test]
async fn test_best_effort_fills_missing_band() {
    let dir = TempDir::new().unwrap();
    let assets: Vec<AssetRef> = write_assets(dir.path(), &[TILE], &["red", "nir"], 256)
        .into_iter()
        .filter(|a| !(a.date == DATES[1] && a.band == "nir"))
        .collect();
    let sink = Arc::new(MemorySink::new());

    let summary = run(
        assets,
        &request(TILE, "red,nir", "128x128"),
        sink.clone(),
        config(2).with_band_policy(BandPolicy::BestEffort { min_bands: 1 }),
    )
    .await
    .unwrap();

    assert_eq!(summary.succeeded().count(), 2);
    let filled = summary.group(&GroupKey::new(TILE, DATES[1])).unwrap();
    assert_eq!(filled.substituted_bands, vec!["nir".to_string()]);

    let patch = sink.patches().into_iter().find(|p| p.date == DATES[1]).unwrap();
    assert!(patch.bands[1].substituted);
    assert!(patch.bands[1].data.iter().all(|v| *v == 0.0));
}

#[tokio::test]
async fn test_rerun_output_is_byte_identical() {
    let assets_dir = TempDir::new().unwrap();
    let assets = write_assets(assets_dir.path(), &[TILE], &["red", "nir"], 256);
    let req = request(TILE, "red,nir", "128x128");

    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();

    run(
        assets.clone(),
        &req,
        Arc::new(GeoTiffSink::new(first.path(), req.collection())),
        config(1),
    )
    .await
    .unwrap();
    run(
        assets,
        &req,
        Arc::new(GeoTiffSink::new(second.path(), req.collection())),
        config(8),
    )
    .await
    .unwrap();

    let a = read_tree(first.path());
    let b = read_tree(second.path());
    assert_eq!(a.len(), 8);
    assert_eq!(a, b);
    assert!(a[0]
        .0
        .starts_with(Path::new("S2-16D-2").join(TILE)));
}

#[tokio::test]
async fn test_written_patch_has_one_page_per_band() {
    let assets_dir = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let assets = write_assets(assets_dir.path(), &[TILE], &["blue", "red", "nir"], 128);
    let req = request(TILE, "blue,red,nir", "128x128");

    let summary = run(
        assets,
        &req,
        Arc::new(GeoTiffSink::new(out.path(), req.collection())),
        config(2),
    )
    .await
    .unwrap();
    assert_eq!(summary.patches_written(), 2);

    let path = out
        .path()
        .join("S2-16D-2")
        .join(TILE)
        .join(DATES[0])
        .join(format!("{}_{}_0_0.tif", TILE, DATES[0]));
    let bytes = std::fs::read(path).unwrap();
    assert_eq!(page_count(&bytes), 3);

    let decoded = geotiff::decode(&bytes, None).unwrap();
    assert_eq!(decoded.crs, Crs::Epsg(32723));
    assert_eq!(decoded.data.dim(), (128, 128));
}

#[tokio::test]
async fn test_many_groups_with_large_pool() {
    let dir = TempDir::new().unwrap();
    let tiles = ["081094", "082094", "083094"];
    let assets = write_assets(dir.path(), &tiles, &["red", "nir", "swir16"], 256);
    let sink = Arc::new(MemorySink::new());

    let summary = run(
        assets,
        &request("081094,082094,083094", "red,nir,swir16", "64x64"),
        sink.clone(),
        config(16),
    )
    .await
    .unwrap();

    assert_eq!(summary.exit_status(), ExitStatus::Success);
    assert_eq!(summary.groups_requested(), 6);
    assert_eq!(summary.tasks_planned, 18);
    assert_eq!(summary.patches_written(), 6 * 16);

    let unique: HashSet<String> = sink.patches().iter().map(|p| p.to_string()).collect();
    assert_eq!(unique.len(), 6 * 16);
}

#[tokio::test]
async fn test_stride_and_edge_modes() {
    let dir = TempDir::new().unwrap();
    let assets = write_assets(dir.path(), &[TILE], &["red"], 512);
    let req = PatchRequest::builder("S2-16D-2")
        .tiles_csv(TILE)
        .bands_csv("red")
        .datetime(DATES[0])
        .size("200x200")
        .stride("200x200")
        .build()
        .unwrap();

    let dropped = run(assets.clone(), &req, Arc::new(MemorySink::new()), config(2))
        .await
        .unwrap();
    assert_eq!(dropped.patches_written(), 4);

    let sink = Arc::new(MemorySink::new());
    let padded = run(assets, &req, sink.clone(), config(2).with_edge_mode(EdgeMode::Pad))
        .await
        .unwrap();
    assert_eq!(padded.patches_written(), 9);

    let corner = sink
        .patches()
        .into_iter()
        .find(|p| p.row == 400 && p.col == 400)
        .unwrap();
    assert_eq!(corner.bands[0].data[[150, 150]], 0.0);
    assert_ne!(corner.bands[0].data[[0, 0]], 0.0);
}

#[tokio::test]
async fn test_cancel_before_start_reports_every_group_cancelled() {
    let dir = TempDir::new().unwrap();
    let assets = write_assets(dir.path(), &[TILE], &["red", "nir"], 128);
    let engine = PatchEngine::new(
        Arc::new(StaticCatalog::new(assets)),
        Arc::new(FileSource::new()),
        Arc::new(MemorySink::new()),
        config(2),
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = engine
        .run(&request(TILE, "red,nir", "64x64"), cancel)
        .await
        .unwrap();

    assert!(summary.was_cancelled);
    assert_eq!(summary.cancelled().count(), 2);
    assert_eq!(summary.patches_written(), 0);
    assert_eq!(summary.exit_status(), ExitStatus::Partial);
}

#[tokio::test]
async fn test_zero_workers_is_rejected() {
    let result = run(
        Vec::new(),
        &request(TILE, "red", "64x64"),
        Arc::new(MemorySink::new()),
        config(0),
    )
    .await;
    assert!(matches!(result, Err(EngineError::PoolInit(_))));
}

#[tokio::test]
async fn test_empty_catalog_is_total_failure() {
    let summary = run(
        Vec::new(),
        &request(TILE, "red", "64x64"),
        Arc::new(MemorySink::new()),
        config(2),
    )
    .await
    .unwrap();
    assert_eq!(summary.exit_status(), ExitStatus::TotalFailure);
    assert_eq!(summary.exit_status().code(), 3);
}
