//! Run telemetry.
//!
//! Lock-free counters updated by workers, plus a point-in-time snapshot for
//! reports and progress displays.
//!
//! ```text
//! Workers ─────► RunMetrics ─────► MetricsSnapshot ─────► RunSummary / CLI
//!                (atomics)         (plain copy)
//! ```
//!
//! [`RunObserver`] receives the same events as callbacks, for views that
//! need to react immediately (the CLI progress bar).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::asset::{AssetRef, GroupKey};
use crate::reader::ReadErrorKind;
use crate::report::GroupReport;

/// Atomic run counters shared by all workers.
#[derive(Debug)]
pub struct RunMetrics {
    started_at: Instant,
    tasks_started: AtomicU64,
    tasks_succeeded: AtomicU64,
    tasks_failed: AtomicU64,
    tasks_retried: AtomicU64,
    bytes_decoded: AtomicU64,
    groups_finalized: AtomicU64,
    patches_written: AtomicU64,
    patches_failed: AtomicU64,
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RunMetrics {
    /// Creates zeroed counters; elapsed time is measured from now.
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            tasks_started: AtomicU64::new(0),
            tasks_succeeded: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            tasks_retried: AtomicU64::new(0),
            bytes_decoded: AtomicU64::new(0),
            groups_finalized: AtomicU64::new(0),
            patches_written: AtomicU64::new(0),
            patches_failed: AtomicU64::new(0),
        }
    }

    pub fn task_started(&self) {
        self.tasks_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_succeeded(&self, bytes: usize) {
        self.tasks_succeeded.fetch_add(1, Ordering::Relaxed);
        self.bytes_decoded.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn task_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_retried(&self) {
        self.tasks_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn group_finalized(&self) {
        self.groups_finalized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn patch_written(&self) {
        self.patches_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn patch_failed(&self) {
        self.patches_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies the current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let elapsed = self.started_at.elapsed();
        let bytes_decoded = self.bytes_decoded.load(Ordering::Relaxed);
        let secs = elapsed.as_secs_f64();
        MetricsSnapshot {
            elapsed,
            tasks_started: self.tasks_started.load(Ordering::Relaxed),
            tasks_succeeded: self.tasks_succeeded.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_retried: self.tasks_retried.load(Ordering::Relaxed),
            bytes_decoded,
            groups_finalized: self.groups_finalized.load(Ordering::Relaxed),
            patches_written: self.patches_written.load(Ordering::Relaxed),
            patches_failed: self.patches_failed.load(Ordering::Relaxed),
            bytes_per_second: if secs > 0.0 {
                bytes_decoded as f64 / secs
            } else {
                0.0
            },
        }
    }
}

/// Point-in-time copy of [`RunMetrics`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub elapsed: Duration,
    pub tasks_started: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub tasks_retried: u64,
    /// Size of decoded pixel buffers, in bytes.
    pub bytes_decoded: u64,
    pub groups_finalized: u64,
    pub patches_written: u64,
    pub patches_failed: u64,
    pub bytes_per_second: f64,
}

/// Callbacks for run events.
///
/// All methods default to no-ops. Called from worker tasks, so
/// implementations must be cheap and thread-safe.
pub trait RunObserver: Send + Sync {
    /// The plan is ready; `tasks` reads cover `groups` groups.
    fn on_plan(&self, _groups: usize, _tasks: usize) {}

    /// A read reached a terminal outcome.
    fn on_task_finished(&self, _asset: &AssetRef, _error: Option<ReadErrorKind>) {}

    /// A retryable read failed and was requeued.
    fn on_task_retry(&self, _asset: &AssetRef, _attempt: u32) {}

    /// A group was finalized, dropped or cancelled.
    fn on_group_finished(&self, _key: &GroupKey, _report: &GroupReport) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_metrics_start_at_zero() {
        let snapshot = RunMetrics::new().snapshot();
        assert_eq!(snapshot.tasks_started, 0);
        assert_eq!(snapshot.patches_written, 0);
        assert_eq!(snapshot.bytes_decoded, 0);
    }

    #[test]
    fn test_counters_accumulate() {
        let metrics = RunMetrics::new();
        metrics.task_started();
        metrics.task_started();
        metrics.task_succeeded(1024);
        metrics.task_failed();
        metrics.task_retried();
        metrics.patch_written();
        metrics.patch_written();
        metrics.patch_failed();
        metrics.group_finalized();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.tasks_started, 2);
        assert_eq!(snapshot.tasks_succeeded, 1);
        assert_eq!(snapshot.tasks_failed, 1);
        assert_eq!(snapshot.tasks_retried, 1);
        assert_eq!(snapshot.bytes_decoded, 1024);
        assert_eq!(snapshot.patches_written, 2);
        assert_eq!(snapshot.patches_failed, 1);
        assert_eq!(snapshot.groups_finalized, 1);
    }

    #[test]
    fn test_concurrent_updates() {
        let metrics = std::sync::Arc::new(RunMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = std::sync::Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        m.task_started();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(metrics.snapshot().tasks_started, 8000);
    }
}
