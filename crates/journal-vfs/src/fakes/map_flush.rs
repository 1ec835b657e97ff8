use std::collections::HashMap;

use parking_lot::Mutex;

use crate::traits::{FlushError, FlushHandle, MapFlush};
use crate::types::VolumeId;

/// A [`MapFlush`] fake that resolves synchronously, unless a volume has
/// remaining programmed failures from [`FakeMapFlush::fail_next_flush`].
#[derive(Debug)]
pub struct FakeMapFlush {
    remaining_failures: Mutex<HashMap<VolumeId, u32>>,
    flushed:            Mutex<Vec<VolumeId>>,
}

impl FakeMapFlush {
    #[must_use]
    pub fn new() -> Self {
        Self {
            remaining_failures: Mutex::new(HashMap::new()),
            flushed:            Mutex::new(Vec::new()),
        }
    }

    /// Makes the next `flush_dirty_mpages(volume_id)` call fail. Each call
    /// to this method queues one more failure; calling it `n` times makes
    /// the next `n` flushes of `volume_id` fail before a flush succeeds.
    pub fn fail_next_flush(&self, volume_id: VolumeId) {
        *self.remaining_failures.lock().entry(volume_id).or_insert(0) += 1;
    }

    #[must_use]
    pub fn flushed_volumes(&self) -> Vec<VolumeId> {
        self.flushed.lock().clone()
    }
}

impl Default for FakeMapFlush {
    fn default() -> Self {
        Self::new()
    }
}

impl MapFlush for FakeMapFlush {
    fn flush_dirty_mpages(&self, volume_id: VolumeId) -> FlushHandle {
        let (tx, rx) = crossbeam_channel::bounded(1);

        let mut remaining_failures = self.remaining_failures.lock();
        let should_fail = match remaining_failures.get_mut(&volume_id) {
            Some(count) if *count > 0 => {
                *count -= 1;
                true
            }
            _ => false,
        };
        drop(remaining_failures);

        if should_fail {
            tracing::debug!(?volume_id, "fake flush failing as programmed by fail_next_flush");
            let _ = tx.send(Err(FlushError));
        } else {
            self.flushed.lock().push(volume_id);
            let _ = tx.send(Ok(()));
        }

        FlushHandle::new(rx)
    }
}
