//! Narrow collaborator traits the journal consumes, never implements.
//!
//! The journal core talks to the rest of the array only through these four
//! traits plus [`MetaStorage`]. None of them expose anything about how the
//! allocator, write-buffer, or map-persistence layers actually work.

use std::fmt::Debug;

use crate::types::{PartitionId, VirtualBlkAddr, VolumeId, WbIndex, WbLsid};

/// Queries and resets the allocator's view of in-flight write-buffer stripes.
///
/// Consulted once, at the start of replay (spec step 3), to obtain the
/// initial (all-UNMAP) active-stripe-tail vector, and again at the end of
/// replay to push reconstructed/reset tails back in.
pub trait ContextReplayer: Debug {
    /// Returns the current active-stripe-tail vector, one entry per write-buffer
    /// index. Every entry should read [`VirtualBlkAddr::UNMAP`] prior to replay
    /// pushing any reconstructed tails back in.
    fn get_all_active_stripe_tail(&self) -> Vec<VirtualBlkAddr>;

    /// Marks the write-buffer slot at `wb_index` as having no active (partially
    /// written) stripe; called for stripes replay finds to be saturated.
    fn reset_active_stripe_tail(&self, wb_index: WbIndex);
}

/// Reconstructs and installs the write-buffer allocator's active-stripe state.
pub trait WbStripeAllocator: Debug {
    /// Attempts to reconstruct the reverse-map entries for a partially-written
    /// write-buffer stripe so that future sequential writes can resume at
    /// `tail`.
    ///
    /// Returns a negative value on failure (the stripe's reverse-map could not
    /// be reconstructed, e.g. because a later, conflicting stripe superseded
    /// the same write-buffer slot); the caller must then record the stripe as
    /// pending rather than restoring its tail.
    fn reconstruct_active_stripe(
        &self,
        volume_id: VolumeId,
        wb_lsid:   WbLsid,
        tail:      VirtualBlkAddr,
    ) -> i32;

    /// Installs `tail` as the resume point for future sequential writes into
    /// the write-buffer slot at `wb_index`. Only called after a successful
    /// [`reconstruct_active_stripe`](Self::reconstruct_active_stripe).
    fn set_active_stripe_tail(&self, wb_index: WbIndex, tail: VirtualBlkAddr, wb_lsid: WbLsid);
}

/// A handle to an in-flight asynchronous flush, fired exactly once on
/// completion.
///
/// This is a thin wrapper over a [`crossbeam_channel::Receiver`] rather than a
/// future: the checkpoint state machine (spec §4.4) is driven by completion
/// callbacks polled from synchronous code, not by an async executor, mirroring
/// how the rest of the array drives its own completion queues.
#[derive(Debug)]
pub struct FlushHandle {
    receiver: crossbeam_channel::Receiver<Result<(), FlushError>>,
}

impl FlushHandle {
    #[must_use]
    pub fn new(receiver: crossbeam_channel::Receiver<Result<(), FlushError>>) -> Self {
        Self { receiver }
    }

    /// Polls for completion without blocking. Returns `None` while the flush
    /// is still in flight.
    pub fn poll(&self) -> Option<Result<(), FlushError>> {
        let outcome = self.receiver.try_recv().ok();
        if let Some(result) = &outcome {
            tracing::trace!(ok = result.is_ok(), "flush handle polled to completion");
        }
        outcome
    }

    /// Blocks the calling thread until the flush completes.
    ///
    /// # Panics
    /// Panics if the sending side was dropped without ever completing the
    /// flush, which indicates a bug in the [`MapFlush`] implementor.
    pub fn wait(&self) -> Result<(), FlushError> {
        tracing::trace!("blocking on flush handle");
        self.receiver.recv().expect("flush sender dropped without completing")
    }
}

/// A flush of one partition's metadata failed; surfaced to the checkpoint
/// manager, which retries a bounded number of times before escalating.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("metadata flush failed")]
pub struct FlushError;

/// Directed flushes of allocator context, block map, and stripe map.
///
/// The journal never touches map storage directly; it only requests that a
/// volume's dirty pages be persisted and waits on the resulting
/// [`FlushHandle`].
pub trait MapFlush: Debug {
    /// Schedules an asynchronous flush of `volume_id`'s dirty metadata pages.
    fn flush_dirty_mpages(&self, volume_id: VolumeId) -> FlushHandle;
}

/// Tracks per-segment live-block counts and the flushed-context version used
/// by the segment-context epoch-skip rule (spec §4.6).
pub trait SegmentCtx: Debug {
    /// Marks `vblks` as newly valid (live).
    fn validate_blks(&self, vblks: &[VirtualBlkAddr]);

    /// Marks `vblks` as no longer valid. `force` bypasses any reference
    /// counting the implementor might otherwise perform; replay always passes
    /// `true`, since it is reconstructing state rather than mutating it
    /// incrementally.
    fn invalidate_blks(&self, vblks: &[VirtualBlkAddr], force: bool);

    /// Returns the sequence number up to and including which `partition`'s
    /// segment-validity deltas are already reflected in the last flushed
    /// allocator-context blob.
    ///
    /// Replay must not re-apply a validity delta for any record whose
    /// `sequence_number` is less than or equal to this value (see spec §4.6
    /// and `DESIGN.md`'s note on the inclusive convention).
    fn get_stored_context_version(&self, partition: PartitionId) -> u64;
}

/// A handle to an in-flight asynchronous meta-page write, fired once on
/// completion. Mirrors [`FlushHandle`]; kept as a distinct type so that
/// `journal-core` can distinguish "a meta-page write completed" from "a
/// directed map flush completed" in its tracing spans.
#[derive(Debug)]
pub struct IoHandle {
    receiver: crossbeam_channel::Receiver<Result<(), IoError>>,
}

impl IoHandle {
    #[must_use]
    pub fn new(receiver: crossbeam_channel::Receiver<Result<(), IoError>>) -> Self {
        Self { receiver }
    }

    pub fn poll(&self) -> Option<Result<(), IoError>> {
        let outcome = self.receiver.try_recv().ok();
        if let Some(result) = &outcome {
            tracing::trace!(ok = result.is_ok(), "io handle polled to completion");
        }
        outcome
    }

    /// # Panics
    /// Panics if the sending side was dropped without completing the write.
    pub fn wait(&self) -> Result<(), IoError> {
        tracing::trace!("blocking on io handle");
        self.receiver.recv().expect("io sender dropped without completing")
    }
}

/// A meta-page read or write failed. Fatal for the write path (spec §7): the
/// journal poisons itself and fails all subsequent reservations.
#[derive(Debug, Clone, thiserror::Error)]
#[error("meta-page I/O error: {message}")]
pub struct IoError {
    pub message: String,
}

/// Aligned, async page I/O for the log buffer's backing media.
pub trait MetaStorage: Debug {
    /// Schedules an asynchronous write of `data` at byte `offset`. `data.len()`
    /// must be a multiple of the meta-page size; callers (the log writer) are
    /// responsible for alignment.
    fn write_page(&self, offset: u64, data: &[u8]) -> IoHandle;

    /// Synchronously reads `len` bytes starting at byte `offset`. Used only by
    /// the replay engine, which runs before any concurrent writers exist.
    fn read_page(&self, offset: u64, len: usize) -> Result<Vec<u8>, IoError>;
}
