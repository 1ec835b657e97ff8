//! The in-memory ring of log groups (spec §4.1): reservation, rolling, and
//! release.
//!
//! A single `parking_lot::Mutex<BufferState>` guards the whole group table,
//! preferring one coarse mutex over several fields that must move together
//! rather than a handful of independent atomics, since the journal has
//! exactly one buffer and no need for a pluggable container.

use std::fmt::{Debug, Formatter, Result as FmtResult};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::config::JournalConfig;
use crate::record::{LogGroupFooter, FOOTER_SIZE};

/// Identifies one of the ring's `num_log_groups` equal segments. Group ids
/// cycle modulo the ring length (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupId(pub u32);

/// `Free → Active → Full → Flushing → AwaitingCheckpoint → Checkpointed →
/// Free` (spec §3). At most one group is `Active` at any moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogGroupState {
    Free,
    Active,
    Full,
    Flushing,
    AwaitingCheckpoint,
    Checkpointed,
}

/// A successful reservation: `size` bytes starting at byte `offset` within
/// `group_id`, already advanced past any meta-page-straddle padding (spec
/// §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub group_id: GroupId,
    pub offset:   u32,
    pub size:     u32,
}

/// A group that [`LogBuffer::roll`] just sealed, with the footer bytes ready
/// to be written by the caller (the buffer itself has no I/O handle).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SealedGroup {
    pub group_id: GroupId,
    pub footer:   LogGroupFooter,
}

/// The outcome of a [`LogBuffer::roll`] call: the group that was sealed (if
/// any group was active), and the group now active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollOutcome {
    pub sealed:      Option<SealedGroup>,
    pub new_active:  GroupId,
}

/// Failure modes for [`LogBuffer::reserve`] and [`LogBuffer::roll`] (spec
/// §4.1, §7). Distinct from [`crate::error::JournalError`]: `GroupFull` is
/// not an outward failure, it tells [`crate::log_writer::LogWriter`] to roll
/// and retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReserveError {
    /// The active group cannot fit this reservation even after meta-page
    /// padding; the caller should [`LogBuffer::roll`] and retry.
    #[error("current log group is full; roll before retrying")]
    GroupFull,
    /// No free group exists to roll into (spec §4.1 `BackpressureFull`).
    #[error("log buffer backpressure: no free log group")]
    Backpressure,
    /// A prior meta I/O failure poisoned the buffer (spec §7).
    #[error("log buffer poisoned by a prior media failure")]
    Poisoned,
}

struct GroupSlot {
    state:          LogGroupState,
    write_offset:   u32,
    record_count:   u32,
    seq_min:        Option<u64>,
    seq_max:        Option<u64>,
    /// Writes reserved against this group whose [`LogBuffer::complete_write`]
    /// has not yet been called (spec §4.2, §4.3): the releaser must see this
    /// reach zero before it may checkpoint the group.
    pending_writes: u32,
    /// Running CRC32C over every record's encoded bytes written into this
    /// group so far, folded via `crc32c::crc32c_append` as each record lands
    /// (spec §3's group footer checksum).
    checksum:       u32,
}

impl GroupSlot {
    const fn new() -> Self {
        Self {
            state:          LogGroupState::Free,
            write_offset:   0,
            record_count:   0,
            seq_min:        None,
            seq_max:        None,
            pending_writes: 0,
            checksum:       0,
        }
    }

    fn reset(&mut self) {
        *self = Self::new();
    }
}

struct BufferState {
    groups: Vec<GroupSlot>,
    active: Option<GroupId>,
}

/// The on-media ring of log groups (spec §4.1).
pub struct LogBuffer {
    config:       JournalConfig,
    inner:        Mutex<BufferState>,
    /// Signaled whenever any group's pending-write count reaches zero; the
    /// releaser waits on this before checkpointing (spec §4.3).
    drained:      Condvar,
    /// Signaled whenever a group is released back to `Free`; a blocking
    /// writer parked on backpressure wakes on this (spec §4.2).
    backpressure: Condvar,
    poisoned:     std::sync::atomic::AtomicBool,
}

impl Debug for LogBuffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("LogBuffer")
            .field("num_log_groups", &self.config.num_log_groups())
            .field("log_group_size", &self.config.log_group_size())
            .finish()
    }
}

impl LogBuffer {
    /// Builds a fresh, all-`Free` buffer with group 0 made `Active`.
    #[must_use]
    pub fn new(config: JournalConfig) -> Self {
        let num_groups = config.num_log_groups() as usize;
        let mut groups: Vec<GroupSlot> = (0..num_groups).map(|_| GroupSlot::new()).collect();
        groups[0].state = LogGroupState::Active;

        Self {
            config,
            inner: Mutex::new(BufferState { groups, active: Some(GroupId(0)) }),
            drained: Condvar::new(),
            backpressure: Condvar::new(),
            poisoned: std::sync::atomic::AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn config(&self) -> JournalConfig {
        self.config
    }

    fn group_capacity(&self) -> u32 {
        u32::try_from(self.config.log_group_size()).expect("log_group_size fits u32")
            - u32::try_from(FOOTER_SIZE).expect("FOOTER_SIZE fits u32")
    }

    /// Marks the buffer poisoned: every subsequent [`Self::reserve`] and
    /// [`Self::roll`] fails with [`ReserveError::Poisoned`] (spec §7).
    pub fn poison(&self) {
        self.poisoned.store(true, std::sync::atomic::Ordering::Release);
        tracing::error!("log buffer poisoned; all subsequent reservations will fail");
    }

    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(std::sync::atomic::Ordering::Acquire)
    }

    /// Reserves `size` bytes in the active group, padding `offset` forward to
    /// the next meta-page boundary first if `size` would otherwise straddle
    /// one (spec §4.1).
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn reserve(&self, size: u32) -> Result<Reservation, ReserveError> {
        if self.is_poisoned() {
            return Err(ReserveError::Poisoned);
        }

        let mut state = self.inner.lock();
        let group_id = state.active.ok_or(ReserveError::Backpressure)?;
        let capacity = self.group_capacity();
        let meta_page_size = self.config.meta_page_size();

        let group = &mut state.groups[group_id.0 as usize];
        if group.state != LogGroupState::Active {
            return Err(ReserveError::GroupFull);
        }

        let mut offset = group.write_offset;
        let page_remaining = meta_page_size - (offset % meta_page_size);
        if size > page_remaining {
            offset += page_remaining;
        }

        if offset.checked_add(size).is_none_or(|end| end > capacity) {
            group.state = LogGroupState::Full;
            return Err(ReserveError::GroupFull);
        }

        group.write_offset = offset + size;
        group.pending_writes += 1;
        Ok(Reservation { group_id, offset, size })
    }

    /// Records a written record against its group: its sequence number (used
    /// to compute the group's footer `sequence_range`/`record_count` at roll
    /// time) and its encoded bytes, folded into the group's running footer
    /// checksum. Called by [`crate::log_writer::LogWriter`] once the page
    /// write has been issued, regardless of whether it later succeeds or
    /// fails — the reservation this accounts for was made either way.
    pub fn note_record_written(&self, group_id: GroupId, sequence_number: u64, bytes: &[u8]) {
        let mut state = self.inner.lock();
        let group = &mut state.groups[group_id.0 as usize];
        group.record_count += 1;
        group.seq_min = Some(group.seq_min.map_or(sequence_number, |min| min.min(sequence_number)));
        group.seq_max = Some(group.seq_max.map_or(sequence_number, |max| max.max(sequence_number)));
        group.checksum = crc32c::crc32c_append(group.checksum, bytes);
    }

    /// Decrements `group_id`'s pending-write count; called once a reserved
    /// write's storage I/O has completed (spec §4.2). Wakes any thread
    /// parked in [`Self::wait_for_drain`] once the count reaches zero.
    pub fn complete_write(&self, group_id: GroupId) {
        let mut state = self.inner.lock();
        let group = &mut state.groups[group_id.0 as usize];
        group.pending_writes = group.pending_writes.saturating_sub(1);
        if group.pending_writes == 0 {
            self.drained.notify_all();
        }
    }

    /// Blocks the calling thread until `group_id` has no pending writes left,
    /// then (if the group is `Full`) transitions it `Full -> Flushing ->
    /// AwaitingCheckpoint` (spec §4.2, §4.3). The releaser calls this
    /// immediately before driving a checkpoint, so that a group is never
    /// checkpointed while a write against it is still in flight.
    pub fn wait_for_drain(&self, group_id: GroupId) {
        let mut state = self.inner.lock();
        self.drained.wait_while(&mut state, |state| state.groups[group_id.0 as usize].pending_writes > 0);
        let group = &mut state.groups[group_id.0 as usize];
        if group.state == LogGroupState::Full {
            group.state = LogGroupState::Flushing;
            group.state = LogGroupState::AwaitingCheckpoint;
        }
    }

    /// Blocks the calling thread until at least one group is `Free` to roll
    /// into, for [`crate::log_writer::LogWriter::write_blocking`]'s
    /// backpressure handling (spec §4.2).
    pub fn wait_for_free_group(&self) {
        let mut state = self.inner.lock();
        self.backpressure
            .wait_while(&mut state, |state| !state.groups.iter().any(|group| group.state == LogGroupState::Free));
    }

    /// Seals the active group (if any) and activates the next `Free` group.
    /// Always callable, whether the active group is `Active` (a manual
    /// force-roll, used by `CheckpointPolicy::Manual` callers and tests) or
    /// already `Full` (the normal reserve-failed path).
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn roll(&self) -> Result<RollOutcome, ReserveError> {
        if self.is_poisoned() {
            return Err(ReserveError::Poisoned);
        }

        let mut state = self.inner.lock();
        let num_groups = state.groups.len();

        let sealed = if let Some(active) = state.active {
            let group = &mut state.groups[active.0 as usize];
            group.state = LogGroupState::Full;
            Some(SealedGroup {
                group_id: active,
                footer: LogGroupFooter::sealed(
                    (group.seq_min.unwrap_or(0), group.seq_max.unwrap_or(0)),
                    group.record_count,
                    u64::from(group.checksum),
                ),
            })
        } else {
            None
        };

        let start = sealed.map_or(0, |s| s.group_id.0 as usize);
        let next = (0..num_groups)
            .map(|i| (start + 1 + i) % num_groups)
            .find(|&i| state.groups[i].state == LogGroupState::Free);

        let Some(next) = next else {
            // No free group to roll into: undo nothing (the sealed group stays
            // Full, which is correct — it really is full), but report backpressure.
            return Err(ReserveError::Backpressure);
        };

        state.groups[next].state = LogGroupState::Active;
        state.active = Some(GroupId(u32::try_from(next).expect("group index fits u32")));

        Ok(RollOutcome { sealed, new_active: GroupId(u32::try_from(next).expect("group index fits u32")) })
    }

    #[must_use]
    pub fn group_state(&self, group_id: GroupId) -> LogGroupState {
        self.inner.lock().groups[group_id.0 as usize].state
    }

    /// Marks a `Checkpointed` group `Free` again, making it available to
    /// [`Self::roll`] into.
    pub fn release(&self, group_id: GroupId) -> Result<(), ReserveError> {
        let mut state = self.inner.lock();
        let group = &mut state.groups[group_id.0 as usize];
        if group.state != LogGroupState::Checkpointed {
            tracing::warn!(?group_id, state = ?group.state, "release called on a non-Checkpointed group");
        }
        group.reset();
        self.backpressure.notify_all();
        Ok(())
    }

    /// Marks a group `Checkpointed`, the terminal state before [`Self::release`].
    pub fn mark_checkpointed(&self, group_id: GroupId) {
        let mut state = self.inner.lock();
        state.groups[group_id.0 as usize].state = LogGroupState::Checkpointed;
    }

    /// The byte offset, from the start of the whole log buffer, of
    /// `group_id`'s first byte.
    #[must_use]
    pub fn group_byte_offset(&self, group_id: GroupId) -> u64 {
        u64::from(group_id.0) * self.config.log_group_size()
    }
}
