//! Drains a full log group, drives its checkpoint, and frees it back to the
//! buffer (spec §4.3).
//!
//! The releaser never holds a reference back into whatever asked it to run;
//! it only exchanges `ReleaserInstruction`/`ReleaserEvent` messages over a
//! `crossbeam_channel`. There is no background OS thread inside this crate:
//! callers drive the releaser by calling [`LogGroupReleaser::drive`] from
//! whatever loop they already run (a dedicated thread, an executor task, or
//! a test), matching spec §5's "no timers/threads owned by the core".

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use journal_vfs::traits::MapFlush;
use journal_vfs::types::VolumeId;

use crate::checkpoint::CheckpointManager;
use crate::error::{JournalError, JournalResult};
use crate::log_buffer::{GroupId, LogBuffer};

/// A request sent to the releaser.
#[derive(Debug, Clone, Copy)]
pub enum ReleaserInstruction {
    /// A log group has finished draining its pending writes and is ready to
    /// be checkpointed and released; `volume_id` identifies whose metadata
    /// the checkpoint flushes (spec §4.3 assumes one owning volume per
    /// group's checkpoint; multi-volume groups are out of scope, spec §1).
    Release { group_id: GroupId, volume_id: VolumeId },
}

/// A response emitted by the releaser after processing a [`ReleaserInstruction`].
#[derive(Debug, Clone, Copy)]
pub enum ReleaserEvent {
    Released { group_id: GroupId },
    Failed { group_id: GroupId },
}

/// Processes [`ReleaserInstruction`]s sent on `inbox`, emitting
/// [`ReleaserEvent`]s on `outbox`.
#[derive(Debug)]
pub struct LogGroupReleaser<F> {
    buffer:     Arc<LogBuffer>,
    checkpoint: Arc<CheckpointManager<F>>,
    inbox:      Receiver<ReleaserInstruction>,
    outbox:     Sender<ReleaserEvent>,
}

impl<F: MapFlush> LogGroupReleaser<F> {
    #[must_use]
    pub fn new(
        buffer: Arc<LogBuffer>,
        checkpoint: Arc<CheckpointManager<F>>,
        inbox: Receiver<ReleaserInstruction>,
        outbox: Sender<ReleaserEvent>,
    ) -> Self {
        Self { buffer, checkpoint, inbox, outbox }
    }

    /// Processes every instruction currently queued, without blocking.
    /// Returns the number of instructions processed.
    pub fn drive(&self) -> usize {
        let mut processed = 0;
        loop {
            match self.inbox.try_recv() {
                Ok(instruction) => {
                    self.handle(instruction);
                    processed += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
        processed
    }

    /// Blocks until at least one instruction is processed, or the channel is
    /// disconnected. Used by tests that want deterministic completion
    /// without polling.
    pub fn force_complete(&self) -> JournalResult<()> {
        let instruction = self
            .inbox
            .recv()
            .map_err(|_| JournalError::WrongId("releaser inbox disconnected".to_owned()))?;
        self.handle(instruction);
        Ok(())
    }

    fn handle(&self, instruction: ReleaserInstruction) {
        let ReleaserInstruction::Release { group_id, volume_id } = instruction;

        // Spec §4.3: a group must not be checkpointed while a write against
        // it is still in flight. This blocks only long enough for the
        // group's pending-write count to reach zero; it is a no-op if that
        // has already happened by the time the instruction is handled.
        self.buffer.wait_for_drain(group_id);

        match self.checkpoint.run(volume_id) {
            Ok(()) => {
                self.buffer.mark_checkpointed(group_id);
                let _ = self.buffer.release(group_id);
                tracing::info!(?group_id, ?volume_id, "log group released after checkpoint");
                let _ = self.outbox.send(ReleaserEvent::Released { group_id });
            }
            Err(err) => {
                tracing::error!(?group_id, ?volume_id, %err, "checkpoint failed; poisoning log buffer");
                self.buffer.poison();
                let _ = self.outbox.send(ReleaserEvent::Failed { group_id });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JournalConfigBuilder;
    use journal_vfs::fakes::FakeMapFlush;

    fn test_setup() -> (Arc<LogBuffer>, Sender<ReleaserInstruction>, Receiver<ReleaserEvent>, LogGroupReleaser<FakeMapFlush>) {
        let config = JournalConfigBuilder::new().build().unwrap();
        let buffer = Arc::new(LogBuffer::new(config));
        let checkpoint = Arc::new(CheckpointManager::new(Arc::new(FakeMapFlush::new())));
        let (in_tx, in_rx) = crossbeam_channel::unbounded();
        let (out_tx, out_rx) = crossbeam_channel::unbounded();
        let releaser = LogGroupReleaser::new(buffer.clone(), checkpoint, in_rx, out_tx);
        (buffer, in_tx, out_rx, releaser)
    }

    #[test]
    fn releases_a_full_group_on_successful_checkpoint() {
        let (buffer, in_tx, out_rx, releaser) = test_setup();
        buffer.roll().unwrap(); // group 0 becomes Full

        in_tx.send(ReleaserInstruction::Release { group_id: GroupId(0), volume_id: VolumeId(1) }).unwrap();
        assert_eq!(releaser.drive(), 1);

        match out_rx.try_recv().unwrap() {
            ReleaserEvent::Released { group_id } => assert_eq!(group_id, GroupId(0)),
            ReleaserEvent::Failed { .. } => panic!("expected Released"),
        }
    }

    #[test]
    fn force_complete_processes_exactly_one_instruction() {
        let (buffer, in_tx, out_rx, releaser) = test_setup();
        buffer.roll().unwrap();
        in_tx.send(ReleaserInstruction::Release { group_id: GroupId(0), volume_id: VolumeId(1) }).unwrap();

        releaser.force_complete().unwrap();
        assert!(out_rx.try_recv().is_ok());
    }
}
