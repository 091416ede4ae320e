//! Task scheduler and worker pool.
//!
//! The dispatcher owns the task queue and keeps at most `pool_size` jobs in
//! flight, each one a spawned tokio task:
//!
//! ```text
//!            ┌───────────── VecDeque<ReadTask> ◄──── requeue (retry)
//!            │                                          ▲
//!            ▼                                          │
//!   FuturesUnordered (≤ pool_size) ──► worker: read ──► settle
//!            ▲                                          │
//!            │                        GroupTracker ◄────┘
//!            │                             │ last outcome of a group
//!            └──── finalize job ◄──────────┘
//!                  (assemble ──► sink)
//! ```
//!
//! # Failure isolation
//!
//! Every job is its own spawned task. A panic surfaces as a `JoinError` at the
//! dispatcher. A read panic is recorded as a transient I/O failure of that task
//! only. A finalize panic drops its group without touching the reads, and a
//! panicking sink write counts as a failed write of that patch.
//!
//! # Cancellation
//!
//! Once the token is cancelled no new task is issued. In-flight reads are
//! allowed to resolve, finalizing workers skip assembly, writers stop between
//! patches, and every group not yet finalized is reported as cancelled.

mod plan;
mod policy;
mod pool;
mod tracker;

pub use plan::{MissingBand, ReadTask, TaskPlan};
pub use policy::{RetryPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY_SECS};
pub use pool::{PoolSize, CORE_FRACTION};
pub use tracker::GroupTracker;

use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::assembler::{PatchAssembler, PatchGroup, TaskOutcome};
use crate::asset::GroupKey;
use crate::reader::{AssetReadError, BoxFuture, RasterWindowReader};
use crate::report::{DropReason, GroupReport, GroupStatus};
use crate::sink::{PatchSink, SinkError};
use crate::telemetry::{NoopObserver, RunMetrics, RunObserver};

/// Default per-task timeout.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(120);

/// Result of a scheduler run.
#[derive(Debug, Clone)]
pub struct SchedulerOutcome {
    /// One report per planned group, sorted by key.
    pub reports: Vec<GroupReport>,
    pub was_cancelled: bool,
}

/// Runs a [`TaskPlan`] over a bounded worker pool.
pub struct Scheduler {
    reader: RasterWindowReader,
    assembler: PatchAssembler,
    sink: Arc<dyn PatchSink>,
    pool_size: PoolSize,
    retry: RetryPolicy,
    task_timeout: Duration,
    metrics: Arc<RunMetrics>,
    observer: Arc<dyn RunObserver>,
}

impl Scheduler {
    pub fn new(
        reader: RasterWindowReader,
        assembler: PatchAssembler,
        sink: Arc<dyn PatchSink>,
        pool_size: PoolSize,
    ) -> Self {
        Self {
            reader,
            assembler,
            sink,
            pool_size,
            retry: RetryPolicy::default(),
            task_timeout: DEFAULT_TASK_TIMEOUT,
            metrics: Arc::new(RunMetrics::new()),
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<RunMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn metrics(&self) -> &Arc<RunMetrics> {
        &self.metrics
    }

    /// Executes every task of the plan.
    pub async fn run(&self, plan: TaskPlan, cancel: CancellationToken) -> SchedulerOutcome {
        let (bands, tasks, missing, groups) = plan.into_parts();
        self.observer.on_plan(groups.len(), tasks.len());

        let ctx = Arc::new(WorkerContext {
            reader: self.reader.clone(),
            assembler: self.assembler.clone(),
            sink: Arc::clone(&self.sink),
            tracker: GroupTracker::new(bands, groups.iter().cloned()),
            retry: self.retry.clone(),
            task_timeout: self.task_timeout,
            metrics: Arc::clone(&self.metrics),
            observer: Arc::clone(&self.observer),
            cancel: cancel.clone(),
        });

        let mut reports = Vec::with_capacity(groups.len());
        let mut pending: FuturesUnordered<PendingJob> = FuturesUnordered::new();

        for band in missing {
            if let Some(group) = ctx.tracker.record(&band.group, band.band_index, Err(band.error)) {
                pending.push(spawn_finalize(&ctx, group));
            }
        }

        let mut queue: VecDeque<ReadTask> = tasks.into();
        let window = self.pool_size.get();
        info!(
            groups = groups.len(),
            tasks = queue.len(),
            workers = window,
            "Starting read tasks"
        );

        let mut cancel_seen = false;
        loop {
            if !cancel.is_cancelled() {
                while pending.len() < window {
                    match queue.pop_front() {
                        Some(task) => pending.push(spawn_read(&ctx, task)),
                        None => break,
                    }
                }
            }
            if pending.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled(), if !cancel_seen => {
                    cancel_seen = true;
                    info!(
                        in_flight = pending.len(),
                        queued = queue.len(),
                        open_groups = ctx.tracker.open_groups(),
                        "Run cancelled, draining in-flight tasks"
                    );
                }

                Some((job, result)) = pending.next() => {
                    match result {
                        Ok(JobResult::Requeue(task)) => queue.push_back(task),
                        Ok(JobResult::Recorded) | Ok(JobResult::Abandoned) => {}
                        Ok(JobResult::Complete(group)) => pending.push(spawn_finalize(&ctx, group)),
                        Ok(JobResult::Finalized(report)) => reports.push(report),
                        Err(join_err) => self.handle_join_error(&ctx, job, join_err, &mut queue, &mut pending, &mut reports),
                    }
                }

                else => break,
            }
        }

        let was_cancelled = cancel.is_cancelled();
        for (key, (succeeded, failed)) in ctx.tracker.drain_open() {
            debug!(group = %key, succeeded, failed, "Group left open at end of run");
        }

        let reported: HashSet<GroupKey> = reports.iter().map(|r| r.key.clone()).collect();
        for key in groups {
            if reported.contains(&key) {
                continue;
            }
            let report = if was_cancelled {
                GroupReport::cancelled(key)
            } else {
                GroupReport::dropped(key, DropReason::Internal("group outcome lost".into()))
            };
            reports.push(ctx.finish(report));
        }
        reports.sort_by(|a, b| a.key.cmp(&b.key));

        SchedulerOutcome {
            reports,
            was_cancelled,
        }
    }

    fn handle_join_error(
        &self,
        ctx: &Arc<WorkerContext>,
        job: Job,
        join_err: JoinError,
        queue: &mut VecDeque<ReadTask>,
        pending: &mut FuturesUnordered<PendingJob>,
        reports: &mut Vec<GroupReport>,
    ) {
        match job {
            Job::Read(task) => {
                error!(asset = %task.asset, error = %join_err, "Read worker panicked");
                let outcome = Err(AssetReadError::transient(
                    &task.asset.href,
                    format!("worker panicked: {}", join_err),
                ));
                match ctx.complete(task, outcome) {
                    Completion::Retry(task) => queue.push_back(task),
                    Completion::Recorded(Some(group)) => pending.push(spawn_finalize(ctx, group)),
                    Completion::Recorded(None) => {}
                }
            }
            Job::Finalize(key) => {
                error!(group = %key, error = %join_err, "Finalizing worker panicked");
                let reason = DropReason::Internal(format!("finalization panicked: {}", join_err));
                reports.push(ctx.finish(GroupReport::dropped(key, reason)));
            }
        }
    }
}

// =============================================================================
// Jobs
// =============================================================================

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

enum Job {
    Read(ReadTask),
    Finalize(GroupKey),
}

enum JobResult {
    Requeue(ReadTask),
    Recorded,
    /// Last outcome of a group; the dispatcher spawns its finalize job.
    Complete(PatchGroup),
    Finalized(GroupReport),
    /// Cancelled while waiting to retry.
    Abandoned,
}

enum Completion {
    Retry(ReadTask),
    Recorded(Option<PatchGroup>),
}

type PendingJob = BoxFuture<'static, (Job, Result<JobResult, JoinError>)>;

fn spawn_read(ctx: &Arc<WorkerContext>, task: ReadTask) -> PendingJob {
    let handle = tokio::spawn(Arc::clone(ctx).run_read(task.clone()));
    Box::pin(async move { (Job::Read(task), handle.await) })
}

fn spawn_finalize(ctx: &Arc<WorkerContext>, group: PatchGroup) -> PendingJob {
    let key = group.key.clone();
    let ctx = Arc::clone(ctx);
    let handle = tokio::spawn(async move { JobResult::Finalized(ctx.finalize(group).await) });
    Box::pin(async move { (Job::Finalize(key), handle.await) })
}

/// State shared by all workers of one run.
struct WorkerContext {
    reader: RasterWindowReader,
    assembler: PatchAssembler,
    sink: Arc<dyn PatchSink>,
    tracker: GroupTracker,
    retry: RetryPolicy,
    task_timeout: Duration,
    metrics: Arc<RunMetrics>,
    observer: Arc<dyn RunObserver>,
    cancel: CancellationToken,
}

impl WorkerContext {
    async fn run_read(self: Arc<Self>, task: ReadTask) -> JobResult {
        if task.attempt > 1 {
            if let Some(delay) = self.retry.delay_for_attempt(task.attempt - 1) {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return JobResult::Abandoned,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        self.metrics.task_started();
        let outcome = match tokio::time::timeout(self.task_timeout, self.reader.read(&task.asset)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(AssetReadError::Timeout {
                href: task.asset.href.clone(),
                timeout_ms: self.task_timeout.as_millis() as u64,
            }),
        };

        match self.complete(task, outcome) {
            Completion::Retry(task) => JobResult::Requeue(task),
            Completion::Recorded(None) => JobResult::Recorded,
            Completion::Recorded(Some(group)) => JobResult::Complete(group),
        }
    }

    /// Decides between retrying and recording a terminal outcome.
    fn complete(&self, task: ReadTask, outcome: TaskOutcome) -> Completion {
        if let Err(err) = &outcome {
            if err.is_retryable()
                && task.attempt < self.retry.max_attempts()
                && !self.cancel.is_cancelled()
            {
                warn!(
                    asset = %task.asset,
                    attempt = task.attempt,
                    max_attempts = self.retry.max_attempts(),
                    error = %err,
                    "Read failed, retrying"
                );
                self.metrics.task_retried();
                self.observer.on_task_retry(&task.asset, task.attempt);
                return Completion::Retry(task.next_attempt());
            }
        }

        match &outcome {
            Ok(window) => self.metrics.task_succeeded(window.byte_size()),
            Err(err) => {
                self.metrics.task_failed();
                warn!(asset = %task.asset, attempt = task.attempt, error = %err, "Read failed");
            }
        }
        self.observer
            .on_task_finished(&task.asset, outcome.as_ref().err().map(AssetReadError::kind));

        Completion::Recorded(self.tracker.record(&task.group, task.band_index, outcome))
    }

    /// Assembles a completed group and writes its patches.
    async fn finalize(&self, group: PatchGroup) -> GroupReport {
        let key = group.key.clone();
        if self.cancel.is_cancelled() {
            return self.finish(GroupReport::cancelled(key));
        }

        let assembler = self.assembler.clone();
        let assembled = match tokio::task::spawn_blocking(move || assembler.prepare(group)).await {
            Ok(Ok(assembled)) => assembled,
            Ok(Err(err)) => {
                warn!(group = %key, error = %err, "Dropping group");
                return self.finish(GroupReport::dropped(key, err));
            }
            Err(join_err) => {
                let reason = DropReason::Internal(format!("assembly panicked: {}", join_err));
                return self.finish(GroupReport::dropped(key, reason));
            }
        };

        let mut report = GroupReport::succeeded(key);
        report.substituted_bands = assembled.substituted_bands();
        if !report.substituted_bands.is_empty() {
            warn!(group = %report.key, bands = ?report.substituted_bands, "Filling missing bands with nodata");
        }

        for index in 0..assembled.patch_count() {
            if self.cancel.is_cancelled() {
                report.status = GroupStatus::Cancelled;
                break;
            }
            let Some(patch) = assembled.patch(index) else {
                break;
            };
            let written = AssertUnwindSafe(self.sink.write(&patch))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(SinkError::Panicked {
                        patch: patch.to_string(),
                        reason: panic_message(panic.as_ref()),
                    })
                });
            match written {
                Ok(()) => {
                    report.patches_written += 1;
                    self.metrics.patch_written();
                }
                Err(err) => {
                    report.patches_failed += 1;
                    self.metrics.patch_failed();
                    warn!(patch = %patch, error = %err, "Patch write failed");
                }
            }
        }

        self.finish(report)
    }

    fn finish(&self, report: GroupReport) -> GroupReport {
        self.metrics.group_finalized();
        match &report.status {
            GroupStatus::Succeeded => info!(
                group = %report.key,
                patches = report.patches_written,
                failed = report.patches_failed,
                "Group complete"
            ),
            GroupStatus::Dropped(reason) => info!(group = %report.key, reason = %reason, "Group dropped"),
            GroupStatus::Cancelled => debug!(group = %report.key, "Group cancelled"),
        }
        self.observer.on_group_finished(&report.key, &report);
        report
    }
}
