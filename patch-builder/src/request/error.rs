//! Error types for request validation.

use thiserror::Error;

/// Errors raised while building a [`PatchRequest`](super::PatchRequest).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// A required field was not provided or is empty.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// A band name appears more than once.
    #[error("band '{0}' requested more than once")]
    DuplicateBand(String),

    /// A tile identifier appears more than once.
    #[error("tile '{0}' requested more than once")]
    DuplicateTile(String),

    /// Patch size or stride could not be parsed or is zero.
    #[error("invalid size '{0}': expected WIDTHxHEIGHT with non-zero values")]
    InvalidSize(String),

    /// Date range could not be parsed or is inverted.
    #[error("invalid datetime '{0}': expected DATE or START/END (RFC 3339)")]
    InvalidDateRange(String),

    /// Source mode string not recognised.
    #[error("invalid source mode '{0}': expected 'remote' or 'local'")]
    InvalidSourceMode(String),
}
