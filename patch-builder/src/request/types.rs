//! Value types used by [`PatchRequest`](super::PatchRequest).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate};

use super::error::RequestError;

/// Width × height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatchSize {
    /// Width in pixels (columns).
    pub width: usize,
    /// Height in pixels (rows).
    pub height: usize,
}

impl PatchSize {
    /// Creates a size. Zero dimensions are rejected by the request builder,
    /// not here.
    pub const fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Number of pixels in one band of a patch.
    pub fn pixels(&self) -> usize {
        self.width * self.height
    }
}

impl FromStr for PatchSize {
    type Err = RequestError;

    /// Parses `WIDTHxHEIGHT`, e.g. `128x128`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RequestError::InvalidSize(s.to_string());
        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(invalid)?;
        let width: usize = w.trim().parse().map_err(|_| invalid())?;
        let height: usize = h.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Self { width, height })
    }
}

impl fmt::Display for PatchSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Inclusive range of observation dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    /// Creates a range, rejecting `start > end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, RequestError> {
        if start > end {
            return Err(RequestError::InvalidDateRange(format!("{}/{}", start, end)));
        }
        Ok(Self { start, end })
    }

    /// First date of the range.
    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// Last date of the range (inclusive).
    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Returns true if `date` falls within the range.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Formats the range as a STAC API `datetime` interval.
    pub fn to_stac_interval(&self) -> String {
        format!(
            "{}T00:00:00Z/{}T23:59:59Z",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

impl FromStr for DateRange {
    type Err = RequestError;

    /// Parses a single date/datetime or a `start/end` interval.
    ///
    /// Both plain dates (`2017-01-01`) and RFC 3339 datetimes
    /// (`2017-01-01T00:00:00Z`) are accepted; only the date part is kept.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (start, end) = match s.split_once('/') {
            Some((start, end)) => (parse_date(start, s)?, parse_date(end, s)?),
            None => {
                let date = parse_date(s, s)?;
                (date, date)
            }
        };
        Self::new(start, end).map_err(|_| RequestError::InvalidDateRange(s.to_string()))
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.start, self.end)
    }
}

/// Parses the date part of a plain date or RFC 3339 datetime.
pub(crate) fn parse_date(value: &str, original: &str) -> Result<NaiveDate, RequestError> {
    let value = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date);
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.date_naive())
        .map_err(|_| RequestError::InvalidDateRange(original.to_string()))
}

/// Where asset bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SourceMode {
    /// Download each asset into a private memory buffer.
    #[default]
    Remote,
    /// Memory-map previously downloaded asset files.
    Local,
}

impl SourceMode {
    /// Lowercase name used in config files and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceMode::Remote => "remote",
            SourceMode::Local => "local",
        }
    }
}

impl FromStr for SourceMode {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "remote" | "cloud" => Ok(SourceMode::Remote),
            "local" => Ok(SourceMode::Local),
            _ => Err(RequestError::InvalidSourceMode(s.to_string())),
        }
    }
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
