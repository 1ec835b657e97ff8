use std::collections::HashMap;

use parking_lot::Mutex;

use crate::traits::WbStripeAllocator;
use crate::types::{VirtualBlkAddr, VolumeId, WbIndex, WbLsid};

/// One recorded call to [`WbStripeAllocator::reconstruct_active_stripe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconstructCall {
    pub volume_id: VolumeId,
    pub wb_lsid:   WbLsid,
    pub tail:      VirtualBlkAddr,
}

/// One recorded call to [`WbStripeAllocator::set_active_stripe_tail`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetTailCall {
    pub wb_index: WbIndex,
    pub tail:     VirtualBlkAddr,
    pub wb_lsid:  WbLsid,
}

/// A [`WbStripeAllocator`] fake whose `reconstruct_active_stripe` outcome is
/// programmed per `wb_lsid` ahead of time; unprogrammed stripes succeed.
#[derive(Debug)]
pub struct FakeWbStripeAllocator {
    failing_lsids:     Mutex<HashMap<WbLsid, i32>>,
    reconstruct_calls: Mutex<Vec<ReconstructCall>>,
    set_tail_calls:    Mutex<Vec<SetTailCall>>,
}

impl FakeWbStripeAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            failing_lsids:     Mutex::new(HashMap::new()),
            reconstruct_calls: Mutex::new(Vec::new()),
            set_tail_calls:    Mutex::new(Vec::new()),
        }
    }

    /// Causes `reconstruct_active_stripe` for `wb_lsid` to return `code`
    /// (pass a negative value to simulate failure).
    pub fn fail_reconstruct(&self, wb_lsid: WbLsid, code: i32) {
        self.failing_lsids.lock().insert(wb_lsid, code);
    }

    #[must_use]
    pub fn reconstruct_calls(&self) -> Vec<ReconstructCall> {
        self.reconstruct_calls.lock().clone()
    }

    #[must_use]
    pub fn set_tail_calls(&self) -> Vec<SetTailCall> {
        self.set_tail_calls.lock().clone()
    }
}

impl Default for FakeWbStripeAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl WbStripeAllocator for FakeWbStripeAllocator {
    fn reconstruct_active_stripe(
        &self,
        volume_id: VolumeId,
        wb_lsid:   WbLsid,
        tail:      VirtualBlkAddr,
    ) -> i32 {
        self.reconstruct_calls.lock().push(ReconstructCall { volume_id, wb_lsid, tail });
        self.failing_lsids.lock().get(&wb_lsid).copied().unwrap_or(0)
    }

    fn set_active_stripe_tail(&self, wb_index: WbIndex, tail: VirtualBlkAddr, wb_lsid: WbLsid) {
        self.set_tail_calls.lock().push(SetTailCall { wb_index, tail, wb_lsid });
    }
}
