use std::collections::HashMap;

use parking_lot::Mutex;

use crate::traits::SegmentCtx;
use crate::types::{PartitionId, VirtualBlkAddr};

/// Running totals recorded by a [`FakeSegmentCtx`], used by tests to check
/// the total-validity invariant of spec §8 scenario 3.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentCtxCounts {
    pub validated:   u64,
    pub invalidated: u64,
}

/// A [`SegmentCtx`] fake tracking aggregate validate/invalidate counts and a
/// programmable stored-context version per partition.
#[derive(Debug)]
pub struct FakeSegmentCtx {
    counts:   Mutex<SegmentCtxCounts>,
    versions: Mutex<HashMap<PartitionId, u64>>,
}

impl FakeSegmentCtx {
    #[must_use]
    pub fn new() -> Self {
        Self {
            counts:   Mutex::new(SegmentCtxCounts::default()),
            versions: Mutex::new(HashMap::new()),
        }
    }

    /// Programs `get_stored_context_version(partition)` to return `version`.
    pub fn set_stored_context_version(&self, partition: PartitionId, version: u64) {
        self.versions.lock().insert(partition, version);
    }

    #[must_use]
    pub fn counts(&self) -> SegmentCtxCounts {
        *self.counts.lock()
    }
}

impl Default for FakeSegmentCtx {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentCtx for FakeSegmentCtx {
    fn validate_blks(&self, vblks: &[VirtualBlkAddr]) {
        self.counts.lock().validated += vblks.len() as u64;
    }

    fn invalidate_blks(&self, vblks: &[VirtualBlkAddr], _force: bool) {
        self.counts.lock().invalidated += vblks.len() as u64;
    }

    fn get_stored_context_version(&self, partition: PartitionId) -> u64 {
        self.versions.lock().get(&partition).copied().unwrap_or(0)
    }
}
