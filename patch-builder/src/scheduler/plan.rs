//! Task plan: the explicit list of reads for one run.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, warn};

use crate::asset::{AssetRef, GroupKey};
use crate::reader::AssetReadError;
use crate::request::PatchRequest;

/// One asset read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadTask {
    pub asset: AssetRef,
    pub group: GroupKey,
    /// Position of the band in the request.
    pub band_index: usize,
    /// 1-based attempt number.
    pub attempt: u32,
}

impl ReadTask {
    /// The same task, one attempt later.
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

/// A band that is known to be missing before any read starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingBand {
    pub group: GroupKey,
    pub band_index: usize,
    pub error: AssetReadError,
}

/// Reads to perform, generated once from the resolved assets.
#[derive(Debug, Clone, Default)]
pub struct TaskPlan {
    bands: Vec<String>,
    tasks: Vec<ReadTask>,
    missing: Vec<MissingBand>,
    groups: Vec<GroupKey>,
}

impl TaskPlan {
    /// Builds the plan.
    ///
    /// - Assets whose band was not requested are ignored.
    /// - Duplicate `(tile, date, band)` assets keep the first in catalog order.
    /// - Requested bands absent from a group become permanent `NotFound`
    ///   failures of that group.
    pub fn build(request: &PatchRequest, assets: Vec<AssetRef>) -> Self {
        let bands = request.bands().to_vec();
        let mut seen: HashSet<(GroupKey, usize)> = HashSet::new();
        let mut present: BTreeMap<GroupKey, Vec<bool>> = BTreeMap::new();
        let mut tasks = Vec::with_capacity(assets.len());

        for asset in assets {
            let Some(band_index) = request.band_index(&asset.band) else {
                debug!(asset = %asset, "Ignoring asset for unrequested band");
                continue;
            };
            let group = asset.group_key();
            if !seen.insert((group.clone(), band_index)) {
                warn!(asset = %asset, href = %asset.href, "Duplicate asset, keeping the first");
                continue;
            }
            present
                .entry(group.clone())
                .or_insert_with(|| vec![false; bands.len()])[band_index] = true;
            tasks.push(ReadTask {
                asset,
                group,
                band_index,
                attempt: 1,
            });
        }

        let mut missing = Vec::new();
        for (group, flags) in &present {
            for (band_index, found) in flags.iter().enumerate() {
                if !found {
                    warn!(group = %group, band = %bands[band_index], "Band not in catalog");
                    missing.push(MissingBand {
                        group: group.clone(),
                        band_index,
                        error: AssetReadError::NotFound {
                            href: format!("{} (not in catalog)", bands[band_index]),
                        },
                    });
                }
            }
        }

        Self {
            bands,
            tasks,
            missing,
            groups: present.into_keys().collect(),
        }
    }

    /// Requested band names, in order.
    pub fn bands(&self) -> &[String] {
        &self.bands
    }

    pub fn tasks(&self) -> &[ReadTask] {
        &self.tasks
    }

    pub fn missing(&self) -> &[MissingBand] {
        &self.missing
    }

    /// Groups covered by the plan, sorted.
    pub fn groups(&self) -> &[GroupKey] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub(crate) fn into_parts(self) -> (Vec<String>, Vec<ReadTask>, Vec<MissingBand>, Vec<GroupKey>) {
        (self.bands, self.tasks, self.missing, self.groups)
    }
}
