//! Asset sources: where raster bytes come from.
//!
//! Every [`AssetSource::open`] call returns a fresh [`AssetBuffer`] owned by
//! the caller. Remote sources download into a private `Bytes` buffer, local
//! sources memory-map the file. Nothing is shared between calls, so decoders
//! built over different buffers never contend for a lock.

use std::fs::File;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use memmap2::Mmap;
use reqwest::StatusCode;
use tracing::debug;

use super::error::AssetReadError;
use crate::asset::AssetRef;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Bytes of one asset, private to the task that opened it.
#[derive(Debug)]
pub enum AssetBuffer {
    /// Downloaded into memory.
    Memory(Bytes),
    /// Memory-mapped local file.
    Mapped(Mmap),
}

impl AssetBuffer {
    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.as_ref().len()
    }

    /// Returns true if the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AsRef<[u8]> for AssetBuffer {
    fn as_ref(&self) -> &[u8] {
        match self {
            AssetBuffer::Memory(bytes) => bytes.as_ref(),
            AssetBuffer::Mapped(map) => map.as_ref(),
        }
    }
}

/// Opens asset bytes.
///
/// This is the seam between the engine and raw file access. Implementations
/// must be `Send + Sync`; the engine shares one instance across all workers
/// behind an `Arc<dyn AssetSource>`.
pub trait AssetSource: Send + Sync {
    /// Opens the asset, returning an isolated buffer.
    fn open<'a>(&'a self, asset: &'a AssetRef) -> BoxFuture<'a, Result<AssetBuffer, AssetReadError>>;
}

// =============================================================================
// HTTP
// =============================================================================

/// Downloads assets over HTTP(S).
pub struct HttpSource {
    client: reqwest::Client,
    access_token: Option<String>,
    request_timeout: Option<Duration>,
}

impl HttpSource {
    /// Default connect timeout.
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Creates a source with default client settings.
    pub fn new(access_token: Option<String>) -> Result<Self, AssetReadError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Self::DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| AssetReadError::permanent("<client>", format!("failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(client, access_token))
    }

    /// Creates a source around an existing client.
    pub fn with_client(client: reqwest::Client, access_token: Option<String>) -> Self {
        Self {
            client,
            access_token,
            request_timeout: None,
        }
    }

    /// Bounds each download, from request to last body byte.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Limit reported when a download times out.
    fn timeout_ms(&self) -> u64 {
        self.request_timeout
            .unwrap_or(Self::DEFAULT_CONNECT_TIMEOUT)
            .as_millis() as u64
    }
}

impl AssetSource for HttpSource {
    fn open<'a>(&'a self, asset: &'a AssetRef) -> BoxFuture<'a, Result<AssetBuffer, AssetReadError>> {
        Box::pin(async move {
            let href = asset.href.as_str();
            let mut request = self.client.get(href);
            if let Some(token) = &self.access_token {
                request = request.query(&[("access_token", token.as_str())]);
            }
            if let Some(timeout) = self.request_timeout {
                request = request.timeout(timeout);
            }
            let map_err = |e: reqwest::Error| map_reqwest_error(href, e, self.timeout_ms());

            let response = request.send().await.map_err(map_err)?;
            let status = response.status();
            if !status.is_success() {
                return Err(map_status(href, status));
            }

            let body = response.bytes().await.map_err(map_err)?;
            debug!(asset = %asset, bytes = body.len(), "Downloaded asset");
            Ok(AssetBuffer::Memory(body))
        })
    }
}

fn map_reqwest_error(href: &str, err: reqwest::Error, timeout_ms: u64) -> AssetReadError {
    if err.is_timeout() {
        AssetReadError::Timeout {
            href: href.to_string(),
            timeout_ms,
        }
    } else if err.is_builder() {
        AssetReadError::permanent(href, err)
    } else {
        // Connection resets, DNS hiccups and truncated bodies.
        AssetReadError::transient(href, err)
    }
}

fn map_status(href: &str, status: StatusCode) -> AssetReadError {
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => AssetReadError::NotFound {
            href: href.to_string(),
        },
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            AssetReadError::transient(href, format!("HTTP {}", status))
        }
        s if s.is_server_error() => AssetReadError::transient(href, format!("HTTP {}", status)),
        _ => AssetReadError::permanent(href, format!("HTTP {}", status)),
    }
}

// =============================================================================
// Local files
// =============================================================================

/// Memory-maps local asset files.
///
/// Hrefs may be plain paths or `file://` URLs. Relative paths are resolved
/// against the optional base directory.
#[derive(Debug, Clone, Default)]
pub struct FileSource {
    base_dir: Option<PathBuf>,
}

impl FileSource {
    /// Creates a source resolving paths as given.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves relative paths against `dir`.
    pub fn with_base_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(dir.into()),
        }
    }

    fn resolve(&self, href: &str) -> PathBuf {
        let path = Path::new(href.strip_prefix("file://").unwrap_or(href));
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl AssetSource for FileSource {
    fn open<'a>(&'a self, asset: &'a AssetRef) -> BoxFuture<'a, Result<AssetBuffer, AssetReadError>> {
        Box::pin(async move {
            let path = self.resolve(&asset.href);
            let href = asset.href.clone();
            let map = tokio::task::spawn_blocking(move || map_file(&path, &href))
                .await
                .map_err(|e| AssetReadError::transient(&asset.href, format!("mapping task failed: {}", e)))??;
            debug!(asset = %asset, bytes = map.len(), "Mapped asset");
            Ok(AssetBuffer::Mapped(map))
        })
    }
}

fn map_file(path: &Path, href: &str) -> Result<Mmap, AssetReadError> {
    let file = File::open(path).map_err(|e| map_io_error(href, e))?;
    let len = file.metadata().map_err(|e| map_io_error(href, e))?.len();
    if len == 0 {
        return Err(AssetReadError::decode(href, "file is empty"));
    }
    // SAFETY: the mapping is read-only and private to this task. Asset files
    // are not modified while a run reads them.
    unsafe { Mmap::map(&file) }.map_err(|e| map_io_error(href, e))
}

fn map_io_error(href: &str, err: std::io::Error) -> AssetReadError {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::NotFound => AssetReadError::NotFound {
            href: href.to_string(),
        },
        ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock => {
            AssetReadError::transient(href, err)
        }
        _ => AssetReadError::permanent(href, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_source_maps_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("red.tif");
        File::create(&path).unwrap().write_all(b"abcdef").unwrap();

        let source = FileSource::new();
        let asset = AssetRef::new("t", "d", "red", path.to_string_lossy());
        let buffer = source.open(&asset).await.unwrap();
        assert_eq!(buffer.as_ref(), b"abcdef");
        assert!(matches!(buffer, AssetBuffer::Mapped(_)));
    }

    #[tokio::test]
    async fn test_file_source_file_url_and_base_dir() {
        let dir = TempDir::new().unwrap();
        File::create(dir.path().join("nir.tif"))
            .unwrap()
            .write_all(b"xyz")
            .unwrap();

        let source = FileSource::with_base_dir(dir.path());
        let relative = AssetRef::new("t", "d", "nir", "nir.tif");
        assert_eq!(source.open(&relative).await.unwrap().len(), 3);

        let url = format!("file://{}", dir.path().join("nir.tif").display());
        let absolute = AssetRef::new("t", "d", "nir", url);
        assert_eq!(FileSource::new().open(&absolute).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_file_source_missing_file() {
        let source = FileSource::new();
        let asset = AssetRef::new("t", "d", "red", "/nonexistent/patch-builder/red.tif");
        let err = source.open(&asset).await.unwrap_err();
        assert!(matches!(err, AssetReadError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_file_source_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.tif");
        File::create(&path).unwrap();

        let asset = AssetRef::new("t", "d", "red", path.to_string_lossy());
        let err = FileSource::new().open(&asset).await.unwrap_err();
        assert!(matches!(err, AssetReadError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_http_timeout_reports_configured_limit() {
        // Accepts connections and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let source = HttpSource::with_client(client, None).with_timeout(Duration::from_millis(200));
        let asset = AssetRef::new("t", "d", "red", format!("http://{}/red.tif", addr));
        let err = source.open(&asset).await.unwrap_err();
        assert_eq!(
            err,
            AssetReadError::Timeout {
                href: asset.href.clone(),
                timeout_ms: 200
            }
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            map_status("u", StatusCode::NOT_FOUND),
            AssetReadError::NotFound { .. }
        ));
        assert!(map_status("u", StatusCode::BAD_GATEWAY).is_retryable());
        assert!(map_status("u", StatusCode::TOO_MANY_REQUESTS).is_retryable());
        assert!(!map_status("u", StatusCode::FORBIDDEN).is_retryable());
    }
}
