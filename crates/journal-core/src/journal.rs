//! Ties the individual components together into the boot-time recovery path
//! and the steady-state runtime handle a caller actually mounts (spec §2's
//! data-flow summary, which assumes something wires Log Buffer, Log Writer,
//! and Checkpoint Manager together after replay has run).
//!
//! Kept as a thin composition layer rather than folding construction logic
//! into [`crate::log_buffer::LogBuffer`] itself: replay must run exactly
//! once, synchronously, before any [`crate::log_writer::LogWriter`] exists
//! (spec §4.5), so the two phases ("recover", then "open") are kept as
//! separate free functions/constructors instead of one constructor that
//! would hide the ordering requirement.

use std::sync::Arc;

use journal_vfs::traits::{ContextReplayer, MapFlush, MetaStorage, SegmentCtx, WbStripeAllocator};

use crate::checkpoint::CheckpointManager;
use crate::config::JournalConfig;
use crate::error::JournalError;
use crate::log_buffer::LogBuffer;
use crate::log_writer::LogWriter;
use crate::replay::{ReplayEngine, ReplayOutcome};

/// Reads every log group's raw bytes out of `storage`, in ring order
/// (`result[i]` is group id `i`), ready to hand to [`ReplayEngine::run`].
///
/// A plain free function rather than a [`LogBuffer`] method: recovery reads
/// the whole buffer before any [`LogBuffer`] exists (there is nothing to
/// reserve against yet), so tying it to that type would suggest an ordering
/// dependency that isn't there.
///
/// Fails with [`JournalError::BufferUnreadable`] if any group's bytes cannot
/// be read at all — distinct from a single group being *torn* (spec §3),
/// which [`ReplayEngine::run`] recovers from by truncation. An unreadable
/// buffer aborts the whole boot instead of silently replaying against a
/// zero-filled stand-in.
pub fn read_log_groups<S: MetaStorage>(
    storage: &S,
    config: JournalConfig,
) -> Result<Vec<Vec<u8>>, JournalError> {
    let group_size = config.log_group_size();
    (0..config.num_log_groups())
        .map(|group_id| {
            let offset = u64::from(group_id) * group_size;
            storage.read_page(offset, group_size as usize).map_err(|err| JournalError::BufferUnreadable {
                message: format!("group {group_id}: {err}"),
            })
        })
        .collect()
}

/// Runs crash replay against whatever is currently on `storage`, without
/// constructing a [`Journal`] around the result.
///
/// This is the entry point a test (or an offline recovery-verification tool)
/// calls to exercise replay in isolation, the same role the original
/// journal manager's `DoRecoveryForTest` hook plays distinct from its normal
/// mount path (see `DESIGN.md`): production boot calls [`Journal::open`],
/// which calls this internally, then discards the pre-recovery buffer state
/// entirely rather than trying to resume it.
#[tracing::instrument(level = "info", skip_all)]
pub fn recover<S, C, W, G>(
    config: JournalConfig,
    storage: &S,
    context_replayer: &C,
    wb_allocator: &W,
    segment_ctx: &G,
) -> Result<ReplayOutcome, JournalError>
where
    S: MetaStorage,
    C: ContextReplayer,
    W: WbStripeAllocator,
    G: SegmentCtx,
{
    let groups = read_log_groups(storage, config)?;
    Ok(ReplayEngine::new(config, context_replayer, wb_allocator, segment_ctx).run(&groups))
}

/// The steady-state handle a caller mounts after recovery: a fresh
/// [`LogBuffer`] (every group `Free` except group 0, `Active`), a
/// [`LogWriter`] over it, and a [`CheckpointManager`] ready for the releaser
/// to drive.
///
/// Deliberately does not own a [`crate::releaser::LogGroupReleaser`]: the
/// releaser is message-passing (spec §9) and the channel endpoints belong to
/// whatever loop drives it, not to this struct.
#[derive(Debug)]
pub struct Journal<S, F> {
    buffer:     Arc<LogBuffer>,
    writer:     LogWriter<S>,
    checkpoint: Arc<CheckpointManager<F>>,
}

impl<S: MetaStorage, F: MapFlush> Journal<S, F> {
    /// Mounts a fresh journal runtime. Replay (via [`recover`]) must already
    /// have happened against `storage` if this is a crash restart; `open`
    /// itself never reads existing log bytes, it only builds the clean
    /// post-recovery buffer/writer/checkpoint trio (spec §9: "no implicit
    /// lazy initialization" — recovery and mounting are both explicit steps
    /// the caller takes in order, never implied by construction).
    #[must_use]
    pub fn open(config: JournalConfig, storage: Arc<S>, flusher: Arc<F>) -> Self {
        let buffer = Arc::new(LogBuffer::new(config));
        let writer = LogWriter::new(Arc::clone(&buffer), storage);
        let checkpoint = Arc::new(CheckpointManager::new(flusher));
        Self { buffer, writer, checkpoint }
    }

    #[must_use]
    pub fn buffer(&self) -> &Arc<LogBuffer> {
        &self.buffer
    }

    #[must_use]
    pub fn writer(&self) -> &LogWriter<S> {
        &self.writer
    }

    #[must_use]
    pub fn checkpoint_manager(&self) -> &Arc<CheckpointManager<F>> {
        &self.checkpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JournalConfigBuilder;
    use crate::log_buffer::{GroupId, LogGroupState};
    use journal_vfs::fakes::{
        FakeContextReplayer, FakeMapFlush, FakeSegmentCtx, FakeWbStripeAllocator, InMemoryMetaStorage,
    };
    use journal_vfs::types::{StripeId, VirtualBlkAddr, VolumeId, WbIndex, WbLsid};

    fn config() -> JournalConfig {
        JournalConfigBuilder::new()
            .log_buffer_size(16 * 1024)
            .num_log_groups(1)
            .meta_page_size(4096)
            .blocks_per_stripe(128)
            .build()
            .unwrap()
    }

    #[test]
    fn recover_then_open_reconstructs_and_yields_a_fresh_buffer() {
        let config = config();
        let storage = Arc::new(InMemoryMetaStorage::new(16 * 1024));

        {
            let bootstrap_buffer = Arc::new(LogBuffer::new(config));
            let writer = LogWriter::new(Arc::clone(&bootstrap_buffer), Arc::clone(&storage));
            writer
                .write_block_write_done(
                    VolumeId(1),
                    0,
                    1,
                    VirtualBlkAddr { stripe_id: StripeId(0), offset: 0 },
                    WbLsid(0),
                    WbIndex(0),
                )
                .unwrap();
        }

        let context_replayer = FakeContextReplayer::new(4);
        let wb_allocator = FakeWbStripeAllocator::new();
        let segment_ctx = FakeSegmentCtx::new();
        let outcome = recover(config, &*storage, &context_replayer, &wb_allocator, &segment_ctx).unwrap();
        assert_eq!(
            outcome.block_map.get(&(VolumeId(1), 0)),
            Some(&VirtualBlkAddr { stripe_id: StripeId(0), offset: 0 })
        );

        let flusher = Arc::new(FakeMapFlush::new());
        let journal = Journal::open(config, storage, flusher);
        assert_eq!(journal.buffer().group_state(GroupId(0)), LogGroupState::Active);
    }

    /// A collaborator whose `read_page` always fails, standing in for media
    /// that cannot be read at all (as opposed to a single torn group).
    #[derive(Debug)]
    struct FailingStorage;

    impl MetaStorage for FailingStorage {
        fn write_page(&self, _offset: u64, _data: &[u8]) -> journal_vfs::traits::IoHandle {
            let (tx, rx) = crossbeam_channel::bounded(1);
            let _ = tx.send(Ok(()));
            journal_vfs::traits::IoHandle::new(rx)
        }

        fn read_page(&self, _offset: u64, _len: usize) -> Result<Vec<u8>, journal_vfs::traits::IoError> {
            Err(journal_vfs::traits::IoError { message: "disk gone".to_owned() })
        }
    }

    #[test]
    fn recover_surfaces_buffer_unreadable_instead_of_masking_the_error() {
        let config = config();
        let storage = FailingStorage;
        let context_replayer = FakeContextReplayer::new(4);
        let wb_allocator = FakeWbStripeAllocator::new();
        let segment_ctx = FakeSegmentCtx::new();

        let err = recover(config, &storage, &context_replayer, &wb_allocator, &segment_ctx).unwrap_err();
        assert!(matches!(err, JournalError::BufferUnreadable { .. }));
    }
}
