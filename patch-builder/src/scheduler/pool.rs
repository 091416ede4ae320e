//! Worker pool sizing.

use std::fmt;
use std::num::NonZeroUsize;

/// Fraction of available cores used for workers.
pub const CORE_FRACTION: f64 = 0.9;

/// Fallback core count when the platform cannot report one.
const FALLBACK_CORES: usize = 4;

/// Number of concurrent workers. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolSize(NonZeroUsize);

impl PoolSize {
    /// Creates a pool size, rejecting zero.
    pub fn new(workers: usize) -> Option<Self> {
        NonZeroUsize::new(workers).map(Self)
    }

    /// `max(1, floor(0.9 × available cores))`.
    pub fn from_available_cores() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(FALLBACK_CORES);
        Self::for_cores(cores)
    }

    /// Pool size for a machine with `cores` cores.
    pub fn for_cores(cores: usize) -> Self {
        let workers = ((cores as f64 * CORE_FRACTION).floor() as usize).max(1);
        Self(NonZeroUsize::new(workers).unwrap_or(NonZeroUsize::MIN))
    }

    pub fn get(&self) -> usize {
        self.0.get()
    }
}

impl Default for PoolSize {
    fn default() -> Self {
        Self::from_available_cores()
    }
}

impl fmt::Display for PoolSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
