//! Retry policy for read tasks.
//!
//! Only retryable failures (timeouts and transient I/O, see
//! [`AssetReadError::is_retryable`](crate::reader::AssetReadError::is_retryable))
//! consult the policy. Permanent failures are terminal on the first attempt.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use patch_builder::scheduler::RetryPolicy;
//!
//! // Four attempts, two seconds apart.
//! let policy = RetryPolicy::default();
//! assert_eq!(policy.max_attempts(), 4);
//! assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_secs(2)));
//! assert_eq!(policy.delay_for_attempt(4), None);
//! ```

use std::time::Duration;

// =============================================================================
// Constants
// =============================================================================

/// Default number of attempts (initial read plus three retries).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Default delay between attempts.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 2;

/// How a read task handles retryable failures.
#[derive(Clone, Debug, PartialEq)]
pub enum RetryPolicy {
    /// No retries: fail on the first error.
    None,

    /// Constant delay between attempts.
    Fixed {
        /// Maximum number of attempts (including the initial attempt).
        max_attempts: u32,
        /// Delay before each retry.
        delay: Duration,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::Fixed {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
        }
    }
}

impl RetryPolicy {
    /// Creates a fixed-delay policy.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::Fixed { max_attempts, delay }
    }

    /// Same policy kind with `retries` retries after the first attempt.
    pub fn with_retries(self, retries: u32) -> Self {
        let max_attempts = retries.saturating_add(1);
        match self {
            Self::None if retries == 0 => Self::None,
            Self::None => Self::fixed(max_attempts, Duration::from_secs(DEFAULT_RETRY_DELAY_SECS)),
            Self::Fixed { delay, .. } => Self::Fixed { max_attempts, delay },
        }
    }

    /// Delay before retrying after failed attempt number `attempt` (1-based).
    ///
    /// Returns `None` when no attempts remain.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Fixed { max_attempts, delay } => (attempt < *max_attempts).then_some(*delay),
        }
    }

    /// Maximum number of attempts, including the first.
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::Fixed { max_attempts, .. } => *max_attempts,
        }
    }
}
