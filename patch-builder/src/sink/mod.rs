//! Patch sinks: where finished patches go.
//!
//! A sink is shared by all finalizing workers, so implementations must be
//! safe for concurrent `write` calls. A failed write affects that patch only;
//! the engine counts it and moves on.

mod geotiff;
mod memory;

pub use self::geotiff::GeoTiffSink;
pub use memory::MemorySink;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::assembler::Patch;
use crate::reader::BoxFuture;

/// Failure writing one patch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("I/O error writing {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("failed to encode patch {patch}: {reason}")]
    Encoding { patch: String, reason: String },

    #[error("sink panicked writing patch {patch}: {reason}")]
    Panicked { patch: String, reason: String },
}

/// Destination for assembled patches.
pub trait PatchSink: Send + Sync {
    /// Persists one patch.
    fn write<'a>(&'a self, patch: &'a Patch) -> BoxFuture<'a, Result<(), SinkError>>;
}

/// Writes `bytes` to a `.partial` sibling of `path` and renames it into place.
///
/// Parent directories are created as needed. A failed rename removes the
/// partial file.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let partial = partial_path(path);
    tokio::fs::write(&partial, bytes).await?;
    if let Err(e) = tokio::fs::rename(&partial, path).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(e);
    }
    Ok(())
}

/// `<path>.partial`
pub(crate) fn partial_path(path: &Path) -> PathBuf {
    let mut partial = path.as_os_str().to_owned();
    partial.push(".partial");
    PathBuf::from(partial)
}
