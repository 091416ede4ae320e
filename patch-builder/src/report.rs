//! End-of-run reporting.

use std::fmt;

use crate::assembler::AssemblyError;
use crate::asset::GroupKey;
use crate::reader::ReadErrorKind;
use crate::telemetry::MetricsSnapshot;

/// Why a group produced no patches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// A required band failed to read.
    ReadFailed { band: String, kind: ReadErrorKind },
    /// The bands could not be assembled.
    Assembly(AssemblyError),
    /// A worker panicked while finalizing the group.
    Internal(String),
}

impl From<AssemblyError> for DropReason {
    fn from(err: AssemblyError) -> Self {
        match err {
            AssemblyError::BandUnavailable { band, kind } => DropReason::ReadFailed { band, kind },
            other => DropReason::Assembly(other),
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::ReadFailed { band, kind } => write!(f, "{} (band '{}')", kind, band),
            DropReason::Assembly(err) => write!(f, "AssemblyError: {}", err),
            DropReason::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

/// Final state of one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupStatus {
    Succeeded,
    Dropped(DropReason),
    /// The run was cancelled before the group finished.
    Cancelled,
}

/// Outcome of one `(tile, date)` group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupReport {
    pub key: GroupKey,
    pub status: GroupStatus,
    pub patches_written: usize,
    pub patches_failed: usize,
    /// Bands filled with nodata under best-effort mode.
    pub substituted_bands: Vec<String>,
}

impl GroupReport {
    pub fn succeeded(key: GroupKey) -> Self {
        Self {
            key,
            status: GroupStatus::Succeeded,
            patches_written: 0,
            patches_failed: 0,
            substituted_bands: Vec::new(),
        }
    }

    pub fn dropped(key: GroupKey, reason: impl Into<DropReason>) -> Self {
        Self {
            status: GroupStatus::Dropped(reason.into()),
            ..Self::succeeded(key)
        }
    }

    pub fn cancelled(key: GroupKey) -> Self {
        Self {
            status: GroupStatus::Cancelled,
            ..Self::succeeded(key)
        }
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == GroupStatus::Succeeded
    }

    pub fn drop_reason(&self) -> Option<&DropReason> {
        match &self.status {
            GroupStatus::Dropped(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == GroupStatus::Cancelled
    }
}

/// Process exit status derived from a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Every group produced all its patches.
    Success,
    /// Some group was dropped or cancelled, or some patch failed to write.
    Partial,
    /// Arguments or configuration were rejected.
    InvalidInput,
    /// Nothing could be attempted: catalog failure or no assets.
    TotalFailure,
}

impl ExitStatus {
    pub fn code(&self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Partial => 1,
            ExitStatus::InvalidInput => 2,
            ExitStatus::TotalFailure => 3,
        }
    }
}

/// Summary of a whole run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub collection: String,
    pub assets_resolved: usize,
    pub tasks_planned: usize,
    /// One report per group, sorted by key.
    pub groups: Vec<GroupReport>,
    pub was_cancelled: bool,
    pub metrics: MetricsSnapshot,
}

impl RunSummary {
    pub fn groups_requested(&self) -> usize {
        self.groups.len()
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &GroupReport> {
        self.groups.iter().filter(|g| g.is_succeeded())
    }

    pub fn dropped(&self) -> impl Iterator<Item = &GroupReport> {
        self.groups.iter().filter(|g| g.drop_reason().is_some())
    }

    pub fn cancelled(&self) -> impl Iterator<Item = &GroupReport> {
        self.groups.iter().filter(|g| g.is_cancelled())
    }

    pub fn patches_written(&self) -> usize {
        self.groups.iter().map(|g| g.patches_written).sum()
    }

    pub fn patches_failed(&self) -> usize {
        self.groups.iter().map(|g| g.patches_failed).sum()
    }

    pub fn tasks_retried(&self) -> u64 {
        self.metrics.tasks_retried
    }

    /// Looks up the report of one group.
    pub fn group(&self, key: &GroupKey) -> Option<&GroupReport> {
        self.groups.iter().find(|g| &g.key == key)
    }

    pub fn exit_status(&self) -> ExitStatus {
        if self.assets_resolved == 0 || self.groups.is_empty() {
            return ExitStatus::TotalFailure;
        }
        let clean = !self.was_cancelled
            && self.patches_failed() == 0
            && self.groups.iter().all(GroupReport::is_succeeded);
        if clean {
            ExitStatus::Success
        } else {
            ExitStatus::Partial
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Collection:        {}", self.collection)?;
        writeln!(f, "Assets resolved:   {}", self.assets_resolved)?;
        writeln!(f, "Groups requested:  {}", self.groups_requested())?;
        writeln!(f, "  succeeded:       {}", self.succeeded().count())?;
        writeln!(f, "  dropped:         {}", self.dropped().count())?;
        writeln!(f, "  cancelled:       {}", self.cancelled().count())?;
        writeln!(f, "Patches written:   {}", self.patches_written())?;
        writeln!(f, "Patches failed:    {}", self.patches_failed())?;
        writeln!(f, "Tasks retried:     {}", self.tasks_retried())?;
        write!(f, "Elapsed:           {:.1}s", self.metrics.elapsed.as_secs_f64())?;
        for group in self.dropped() {
            if let Some(reason) = group.drop_reason() {
                write!(f, "\n  dropped {}: {}", group.key, reason)?;
            }
        }
        Ok(())
    }
}
