//! The checkpoint state machine (spec §4.4): flushes allocator context, the
//! block map, and the stripe map for a full log group before the group can
//! be released.
//!
//! A small state enum advanced by completion callbacks rather than by a
//! blocking call chain, collapsed to one concrete state machine rather than
//! a generic pluggable-strategy trait family, since this crate only ever
//! runs one kind of checkpoint.

use std::sync::Arc;

use parking_lot::Mutex;

use journal_vfs::traits::MapFlush;
use journal_vfs::types::VolumeId;

use crate::error::{JournalError, JournalResult};

/// The bounded number of attempts a single flush phase gets before the
/// checkpoint escalates to [`JournalError::CheckpointFlushFailed`] (spec §4.4,
/// §7).
const MAX_FLUSH_ATTEMPTS: u32 = 3;

/// A checkpoint's progress through its three flush phases (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointState {
    Idle,
    FlushAllocatorContext,
    FlushBlockMap,
    FlushStripeMap,
    Done,
}

/// Coordinates a single volume's checkpoint at a time; spec §8's "checkpoint
/// exclusion" invariant is enforced by [`Self::run`] taking a `try_lock` on
/// its internal guard rather than queueing concurrent callers, since a
/// checkpoint already in flight should be observed by the caller, not
/// silently serialized behind it.
#[derive(Debug)]
pub struct CheckpointManager<F> {
    flusher:    Arc<F>,
    in_flight:  Mutex<()>,
    state:      Mutex<CheckpointState>,
}

impl<F: MapFlush> CheckpointManager<F> {
    #[must_use]
    pub fn new(flusher: Arc<F>) -> Self {
        Self { flusher, in_flight: Mutex::new(()), state: Mutex::new(CheckpointState::Idle) }
    }

    #[must_use]
    pub fn state(&self) -> CheckpointState {
        *self.state.lock()
    }

    /// Runs a full checkpoint for `volume_id`: flushes allocator context,
    /// block map, and stripe map in sequence, retrying each phase up to
    /// [`MAX_FLUSH_ATTEMPTS`] times before escalating.
    ///
    /// Returns [`JournalError::Backpressure`]-free; the only failure mode is
    /// [`JournalError::CheckpointFlushFailed`], which the caller (the
    /// releaser) escalates to [`JournalError::MediaFailure`] and poisons the
    /// log buffer (spec §7).
    #[tracing::instrument(level = "info", skip(self))]
    pub fn run(&self, volume_id: VolumeId) -> JournalResult<()> {
        let Some(_guard) = self.in_flight.try_lock() else {
            tracing::warn!(?volume_id, "checkpoint already in flight; dropping concurrent request");
            return Ok(());
        };

        *self.state.lock() = CheckpointState::FlushAllocatorContext;
        self.flush_phase(volume_id)?;

        *self.state.lock() = CheckpointState::FlushBlockMap;
        self.flush_phase(volume_id)?;

        *self.state.lock() = CheckpointState::FlushStripeMap;
        self.flush_phase(volume_id)?;

        *self.state.lock() = CheckpointState::Done;
        Ok(())
    }

    fn flush_phase(&self, volume_id: VolumeId) -> JournalResult<()> {
        for attempt in 1..=MAX_FLUSH_ATTEMPTS {
            let handle = self.flusher.flush_dirty_mpages(volume_id);
            match handle.wait() {
                Ok(()) => return Ok(()),
                Err(err) => {
                    tracing::warn!(?volume_id, attempt, %err, "metadata flush failed; retrying");
                }
            }
        }
        Err(JournalError::CheckpointFlushFailed { attempts: MAX_FLUSH_ATTEMPTS })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use journal_vfs::fakes::FakeMapFlush;

    #[test]
    fn successful_checkpoint_reaches_done() {
        let flusher = Arc::new(FakeMapFlush::new());
        let manager = CheckpointManager::new(flusher);
        manager.run(VolumeId(1)).unwrap();
        assert_eq!(manager.state(), CheckpointState::Done);
    }

    #[test]
    fn a_single_failure_is_retried_and_recovers() {
        let flusher = Arc::new(FakeMapFlush::new());
        flusher.fail_next_flush(VolumeId(1));
        let manager = CheckpointManager::new(flusher);
        manager.run(VolumeId(1)).unwrap();
        assert_eq!(manager.state(), CheckpointState::Done);
    }

    #[test]
    fn exhausting_retries_escalates() {
        let flusher = Arc::new(FakeMapFlush::new());
        for _ in 0..MAX_FLUSH_ATTEMPTS {
            flusher.fail_next_flush(VolumeId(1));
        }
        let manager = CheckpointManager::new(flusher);
        let err = manager.run(VolumeId(1)).unwrap_err();
        assert!(matches!(err, JournalError::CheckpointFlushFailed { attempts } if attempts == MAX_FLUSH_ATTEMPTS));
    }
}
