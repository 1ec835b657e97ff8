//! The journal's outward-facing error type.
//!
//! `#[error("...")]` messages instead of a hand-written `Display` impl, and
//! no blanket "catch-all" variant. The outward surface is small enough
//! (spec §7 lists six kinds) for one crate-wide enum; record-level
//! (de)serialization still gets its own narrower error type in
//! [`crate::record`].

use journal_vfs::types::WbLsid;
use thiserror::Error;

pub type JournalResult<T> = Result<T, JournalError>;

/// The journal's outward-facing failure modes (spec §7).
#[derive(Debug, Error)]
pub enum JournalError {
    /// The log buffer has no space and no free group to roll into. Transient;
    /// the caller should retry once a group is released.
    #[error("log buffer backpressure: no free log group")]
    Backpressure,

    /// A log group's footer failed validation during replay; the group was
    /// truncated at the last well-formed record. Not normally surfaced to a
    /// caller, but recorded so replay can report how much was discarded.
    #[error("log group {group_id} was torn; truncated after {recovered_records} records")]
    TornGroup { group_id: u32, recovered_records: u32 },

    /// Meta I/O failed. Fatal: the journal poisons itself and fails all
    /// subsequent reservations until the process restarts and replay runs.
    #[error("fatal media failure: {message}")]
    MediaFailure { message: String },

    /// [`journal_vfs::traits::WbStripeAllocator::reconstruct_active_stripe`]
    /// returned a negative result during replay for `wb_lsid`; the stripe was
    /// recorded as pending instead.
    #[error("failed to reconstruct active write-buffer stripe {wb_lsid:?}")]
    ReplayReconstructFailed { wb_lsid: WbLsid },

    /// A checkpoint's metadata flush failed after exhausting its retry
    /// budget; escalated to [`JournalError::MediaFailure`] by the caller.
    #[error("checkpoint flush failed after {attempts} attempts")]
    CheckpointFlushFailed { attempts: u32 },

    /// A map or allocator lookup referenced an unknown volume or file
    /// identifier. Non-fatal; callers log and continue.
    #[error("unknown identifier: {0}")]
    WrongId(String),

    /// The log buffer itself could not be read at all during replay (as
    /// opposed to a single torn group); this is the only replay failure that
    /// aborts the whole boot.
    #[error("log buffer unreadable: {message}")]
    BufferUnreadable { message: String },
}
