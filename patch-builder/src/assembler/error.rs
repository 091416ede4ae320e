use thiserror::Error;

use crate::reader::ReadErrorKind;

/// Failure assembling one `(tile, date)` group. Fatal for that group only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblyError {
    /// A band failed to read and the policy requires every band.
    #[error("band '{band}' unavailable: {kind}")]
    BandUnavailable { band: String, kind: ReadErrorKind },

    /// Fewer bands were read than the best-effort minimum.
    #[error("only {available} band(s) available, {required} required")]
    InsufficientBands { available: usize, required: usize },

    /// A band is not on the same grid as the reference band.
    #[error("band '{band}' does not share the reference grid: {reason}")]
    GridMismatch { band: String, reason: String },

    /// The band extents do not intersect.
    #[error("band extents do not overlap")]
    NoOverlap,
}
