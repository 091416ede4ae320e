use parking_lot::Mutex;

use super::{PatchSink, SinkError};
use crate::assembler::Patch;
use crate::reader::BoxFuture;

/// Keeps patches in memory. Used by tests and library callers that post-process
/// patches themselves.
#[derive(Debug, Default)]
pub struct MemorySink {
    patches: Mutex<Vec<Patch>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies of every patch written so far, sorted by tile, date and offset.
    pub fn patches(&self) -> Vec<Patch> {
        let mut patches = self.patches.lock().clone();
        patches.sort_by(|a, b| {
            (&a.tile, &a.date, a.row, a.col).cmp(&(&b.tile, &b.date, b.row, b.col))
        });
        patches
    }

    pub fn len(&self) -> usize {
        self.patches.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PatchSink for MemorySink {
    fn write<'a>(&'a self, patch: &'a Patch) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async move {
            self.patches.lock().push(patch.clone());
            Ok(())
        })
    }
}
