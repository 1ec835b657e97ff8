use parking_lot::Mutex;

use crate::traits::ContextReplayer;
use crate::types::{VirtualBlkAddr, WbIndex};

/// A [`ContextReplayer`] backed by a plain `Vec`, all-UNMAP by default.
#[derive(Debug)]
pub struct FakeContextReplayer {
    tails:        Mutex<Vec<VirtualBlkAddr>>,
    reset_calls:  Mutex<Vec<WbIndex>>,
}

impl FakeContextReplayer {
    #[must_use]
    pub fn new(num_wb_indices: usize) -> Self {
        Self {
            tails:       Mutex::new(vec![VirtualBlkAddr::UNMAP; num_wb_indices]),
            reset_calls: Mutex::new(Vec::new()),
        }
    }

    /// Returns the write-buffer indices that were reset, in call order.
    #[must_use]
    pub fn reset_calls(&self) -> Vec<WbIndex> {
        self.reset_calls.lock().clone()
    }
}

impl ContextReplayer for FakeContextReplayer {
    fn get_all_active_stripe_tail(&self) -> Vec<VirtualBlkAddr> {
        self.tails.lock().clone()
    }

    fn reset_active_stripe_tail(&self, wb_index: WbIndex) {
        self.reset_calls.lock().push(wb_index);
    }
}
