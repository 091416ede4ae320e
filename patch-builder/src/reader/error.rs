//! Error types for asset reads.

use std::fmt;

use thiserror::Error;

/// Failure reading one asset.
///
/// Scoped to a single read task. The scheduler retries `Timeout` and
/// transient `Io` failures; `NotFound` and `Decode` are permanent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssetReadError {
    /// The asset does not exist at its href.
    #[error("asset not found: {href}")]
    NotFound { href: String },

    /// The bytes could not be decoded as a single-band raster.
    #[error("failed to decode {href}: {reason}")]
    Decode { href: String, reason: String },

    /// Transport or filesystem failure.
    #[error("I/O error reading {href}: {reason}")]
    Io {
        href: String,
        reason: String,
        transient: bool,
    },

    /// The read did not finish within the task timeout.
    #[error("timed out reading {href} after {timeout_ms} ms")]
    Timeout { href: String, timeout_ms: u64 },
}

impl AssetReadError {
    /// Creates a decode error.
    pub fn decode(href: &str, reason: impl fmt::Display) -> Self {
        Self::Decode {
            href: href.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Creates a retryable I/O error.
    pub fn transient(href: &str, reason: impl fmt::Display) -> Self {
        Self::Io {
            href: href.to_string(),
            reason: reason.to_string(),
            transient: true,
        }
    }

    /// Creates a non-retryable I/O error.
    pub fn permanent(href: &str, reason: impl fmt::Display) -> Self {
        Self::Io {
            href: href.to_string(),
            reason: reason.to_string(),
            transient: false,
        }
    }

    /// Simplified kind for reports.
    pub fn kind(&self) -> ReadErrorKind {
        match self {
            Self::NotFound { .. } => ReadErrorKind::NotFound,
            Self::Decode { .. } => ReadErrorKind::DecodeError,
            Self::Io { .. } => ReadErrorKind::IoError,
            Self::Timeout { .. } => ReadErrorKind::Timeout,
        }
    }

    /// Returns true if the scheduler may requeue the task.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Io { transient, .. } => *transient,
            Self::NotFound { .. } | Self::Decode { .. } => false,
        }
    }
}

/// Kind of an [`AssetReadError`], without details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadErrorKind {
    NotFound,
    DecodeError,
    IoError,
    Timeout,
}

impl fmt::Display for ReadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReadErrorKind::NotFound => "NotFound",
            ReadErrorKind::DecodeError => "DecodeError",
            ReadErrorKind::IoError => "IOError",
            ReadErrorKind::Timeout => "Timeout",
        };
        write!(f, "AssetReadError.{}", name)
    }
}
