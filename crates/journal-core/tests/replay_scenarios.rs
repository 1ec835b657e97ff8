//! End-to-end crash/replay scenarios, the Rust analogue of
//! `replay_log_buffer_integration_test.cpp` and
//! `active_wb_stripe_replayer_test.cpp`: write through a real [`LogWriter`]
//! against in-memory fakes, simulate a crash by reading the raw bytes back
//! without ever running a checkpoint, then assert what [`ReplayEngine::run`]
//! reconstructs.

use std::sync::Arc;

use journal_core::config::JournalConfigBuilder;
use journal_core::log_buffer::{GroupId, LogBuffer};
use journal_core::log_writer::LogWriter;
use journal_core::replay::ReplayEngine;
use journal_vfs::fakes::{FakeContextReplayer, FakeSegmentCtx, FakeWbStripeAllocator, InMemoryMetaStorage};
use journal_vfs::types::{PartitionId, StripeId, VirtualBlkAddr, VolumeId, WbIndex, WbLsid};

fn group_bytes(storage: &InMemoryMetaStorage, buffer: &LogBuffer, num_groups: u32) -> Vec<Vec<u8>> {
    let group_size = buffer.config().log_group_size() as usize;
    (0..num_groups)
        .map(|i| {
            let offset = buffer.group_byte_offset(GroupId(i));
            storage.read_page(offset, group_size).unwrap()
        })
        .collect()
}

#[test]
fn full_log_buffer_then_replay_reconstructs_block_map_and_tail() {
    let config = JournalConfigBuilder::new()
        .log_buffer_size(16 * 1024)
        .num_log_groups(1)
        .meta_page_size(4096)
        .blocks_per_stripe(128)
        .build()
        .unwrap();
    let buffer = Arc::new(LogBuffer::new(config));
    let storage = Arc::new(InMemoryMetaStorage::new(16 * 1024));
    let writer = LogWriter::new(buffer.clone(), storage.clone());

    let mut last_written = None;
    for i in 0..10_000_u32 {
        let vsid = StripeId(0);
        let vsa = VirtualBlkAddr { stripe_id: vsid, offset: i };
        let result = writer.write_block_write_done(VolumeId(1), u64::from(i), 1, vsa, WbLsid(0), WbIndex(0));
        match result {
            Ok(_) => last_written = Some((i, vsa)),
            Err(_) => break,
        }
    }
    let (last_rba, last_vsa) = last_written.expect("at least one record should fit in a 16 KiB buffer");

    let bytes = group_bytes(&storage, &buffer, 1);
    let context_replayer = FakeContextReplayer::new(4);
    let wb_allocator = FakeWbStripeAllocator::new();
    let segment_ctx = FakeSegmentCtx::new();
    let engine = ReplayEngine::new(config, &context_replayer, &wb_allocator, &segment_ctx);
    let outcome = engine.run(&bytes);

    assert_eq!(outcome.block_map.get(&(VolumeId(1), u64::from(last_rba))), Some(&last_vsa));

    let expected_tail = VirtualBlkAddr { stripe_id: last_vsa.stripe_id, offset: last_vsa.offset + 1 };
    let set_tail_calls = wb_allocator.set_tail_calls();
    assert_eq!(set_tail_calls.len(), 1);
    assert_eq!(set_tail_calls[0].tail, expected_tail);
}

#[test]
fn saturated_stripes_reset_their_tail_on_replay() {
    let config = JournalConfigBuilder::new()
        .log_buffer_size(64 * 1024)
        .num_log_groups(2)
        .meta_page_size(4096)
        .blocks_per_stripe(4)
        .build()
        .unwrap();
    let buffer = Arc::new(LogBuffer::new(config));
    let storage = Arc::new(InMemoryMetaStorage::new(64 * 1024));
    let writer = LogWriter::new(buffer.clone(), storage.clone());

    for i in 0..20_u32 {
        let vsid = StripeId(i);
        let vsa = VirtualBlkAddr { stripe_id: vsid, offset: 0 };
        writer
            .write_block_write_done(VolumeId(7), u64::from(i) * 4, 4, vsa, WbLsid(i), WbIndex(0))
            .expect("buffer sized generously enough not to hit backpressure");
    }

    let bytes = group_bytes(&storage, &buffer, 2);
    let context_replayer = FakeContextReplayer::new(4);
    let wb_allocator = FakeWbStripeAllocator::new();
    let segment_ctx = FakeSegmentCtx::new();
    let engine = ReplayEngine::new(config, &context_replayer, &wb_allocator, &segment_ctx);
    let _outcome = engine.run(&bytes);

    let resets = context_replayer.reset_calls();
    assert_eq!(resets, vec![WbIndex(0)]);
    assert!(wb_allocator.set_tail_calls().is_empty());
}

#[test]
fn stored_context_version_prevents_double_counting_validity() {
    let config = JournalConfigBuilder::new()
        .log_buffer_size(64 * 1024)
        .num_log_groups(2)
        .meta_page_size(4096)
        .blocks_per_stripe(4)
        .build()
        .unwrap();
    let buffer = Arc::new(LogBuffer::new(config));
    let storage = Arc::new(InMemoryMetaStorage::new(64 * 1024));
    let writer = LogWriter::new(buffer.clone(), storage.clone());

    let num_stripes = 4_u32;
    let mut sequence_after_first_half = 0;
    for i in 0..num_stripes {
        let vsid = StripeId(i);
        let vsa = VirtualBlkAddr { stripe_id: vsid, offset: 0 };
        let seq = writer
            .write_block_write_done(VolumeId(3), u64::from(i) * 4, 4, vsa, WbLsid(i), WbIndex(i % 2))
            .unwrap();
        if i == num_stripes / 2 - 1 {
            sequence_after_first_half = seq;
        }
    }

    let segment_ctx = FakeSegmentCtx::new();
    // Simulate a pre-crash flush: the first half's deltas are already reflected
    // in the persisted allocator-context blob.
    let already_flushed: Vec<VirtualBlkAddr> = (0..num_stripes / 2)
        .flat_map(|i| (0..4).map(move |offset| VirtualBlkAddr { stripe_id: StripeId(i), offset }))
        .collect();
    segment_ctx.validate_blks(&already_flushed);
    segment_ctx.set_stored_context_version(PartitionId(0), sequence_after_first_half);

    let bytes = group_bytes(&storage, &buffer, 2);
    let context_replayer = FakeContextReplayer::new(4);
    let wb_allocator = FakeWbStripeAllocator::new();
    let engine = ReplayEngine::new(config, &context_replayer, &wb_allocator, &segment_ctx);
    let _outcome = engine.run(&bytes);

    let counts = segment_ctx.counts();
    let blocks_per_stripe = u64::from(config.blocks_per_stripe());
    assert_eq!(counts.validated - counts.invalidated, u64::from(num_stripes) * blocks_per_stripe);
}

#[test]
fn each_volume_reconstructs_only_its_latest_partial_stripe() {
    let config = JournalConfigBuilder::new()
        .log_buffer_size(256 * 1024)
        .num_log_groups(1)
        .meta_page_size(4096)
        .blocks_per_stripe(4)
        .build()
        .unwrap();
    let buffer = Arc::new(LogBuffer::new(config));
    let storage = Arc::new(InMemoryMetaStorage::new(256 * 1024));
    let writer = LogWriter::new(buffer.clone(), storage.clone());

    for volume in 1..=3_u32 {
        let mut lsid = 0_u32;
        for _ in 0..5 {
            let vsa = VirtualBlkAddr { stripe_id: StripeId(lsid), offset: 0 };
            writer
                .write_block_write_done(VolumeId(volume), u64::from(lsid) * 4, 4, vsa, WbLsid(lsid), WbIndex(0))
                .unwrap();
            lsid += 1;
        }
        let partial_vsa = VirtualBlkAddr { stripe_id: StripeId(lsid), offset: 0 };
        writer
            .write_block_write_done(VolumeId(volume), u64::from(lsid) * 4, 2, partial_vsa, WbLsid(lsid), WbIndex(0))
            .unwrap();
    }

    let bytes = group_bytes(&storage, &buffer, 1);
    let context_replayer = FakeContextReplayer::new(4);
    let wb_allocator = FakeWbStripeAllocator::new();
    let segment_ctx = FakeSegmentCtx::new();
    let engine = ReplayEngine::new(config, &context_replayer, &wb_allocator, &segment_ctx);
    let outcome = engine.run(&bytes);

    assert!(outcome.pending_stripes.is_empty());
    let reconstructs = wb_allocator.reconstruct_calls();
    for volume in 1..=3_u32 {
        let matching: Vec<_> = reconstructs.iter().filter(|call| call.volume_id == VolumeId(volume)).collect();
        assert_eq!(matching.len(), 1, "volume {volume} should reconstruct exactly its latest partial stripe");
    }
    assert_eq!(wb_allocator.set_tail_calls().len(), 3);
}

#[test]
fn a_failing_reconstruct_lands_in_pending_without_a_tail_update() {
    let config = JournalConfigBuilder::new()
        .log_buffer_size(256 * 1024)
        .num_log_groups(1)
        .meta_page_size(4096)
        .blocks_per_stripe(4)
        .build()
        .unwrap();
    let buffer = Arc::new(LogBuffer::new(config));
    let storage = Arc::new(InMemoryMetaStorage::new(256 * 1024));
    let writer = LogWriter::new(buffer.clone(), storage.clone());

    let mut last_wb_lsid = WbLsid(0);
    for wb_index in 0..5_u32 {
        let vsa = VirtualBlkAddr { stripe_id: StripeId(wb_index), offset: 0 };
        let wb_lsid = WbLsid(wb_index);
        writer
            .write_block_write_done(VolumeId(9), u64::from(wb_index) * 2, 2, vsa, wb_lsid, WbIndex(wb_index))
            .unwrap();
        last_wb_lsid = wb_lsid;
    }

    let bytes = group_bytes(&storage, &buffer, 1);
    let context_replayer = FakeContextReplayer::new(8);
    let wb_allocator = FakeWbStripeAllocator::new();
    // The highest-sequence (last-written) stripe is this volume's "latest";
    // make its reconstruct fail.
    wb_allocator.fail_reconstruct(last_wb_lsid, -1);
    let segment_ctx = FakeSegmentCtx::new();
    let engine = ReplayEngine::new(config, &context_replayer, &wb_allocator, &segment_ctx);
    let outcome = engine.run(&bytes);

    assert_eq!(wb_allocator.reconstruct_calls().len(), 5);
    assert!(wb_allocator.set_tail_calls().is_empty());
    assert_eq!(outcome.pending_stripes.len(), 5);
    assert!(outcome.pending_stripes.iter().any(|p| p.wb_lsid == last_wb_lsid));

    let wb_lsids: std::collections::HashSet<_> = outcome.pending_stripes.iter().map(|p| p.wb_lsid).collect();
    assert_eq!(wb_lsids.len(), 5, "pending entries must have unique wb_lsid");
}

#[test]
fn torn_tail_truncates_at_last_valid_record() {
    let config = JournalConfigBuilder::new()
        .log_buffer_size(16 * 1024)
        .num_log_groups(1)
        .meta_page_size(4096)
        .blocks_per_stripe(128)
        .build()
        .unwrap();
    let buffer = Arc::new(LogBuffer::new(config));
    let storage = Arc::new(InMemoryMetaStorage::new(16 * 1024));
    let writer = LogWriter::new(buffer.clone(), storage.clone());

    for i in 0..5_u32 {
        let vsa = VirtualBlkAddr { stripe_id: StripeId(0), offset: i };
        writer
            .write_block_write_done(VolumeId(1), u64::from(i), 1, vsa, WbLsid(0), WbIndex(0))
            .unwrap();
    }

    // Each BlockWriteDone record is HEADER_SIZE(24) + payload(32) = 56 bytes;
    // corrupt a byte inside the fifth (last) record so its CRC fails to
    // validate, leaving the first four records intact.
    let mut raw = storage.snapshot();
    let last_record_start = 4 * 56;
    raw[last_record_start + 40] ^= 0xFF;
    let corrupted_storage = InMemoryMetaStorage::from_bytes(raw);

    let bytes = group_bytes(&corrupted_storage, &buffer, 1);
    let context_replayer = FakeContextReplayer::new(4);
    let wb_allocator = FakeWbStripeAllocator::new();
    let segment_ctx = FakeSegmentCtx::new();
    let engine = ReplayEngine::new(config, &context_replayer, &wb_allocator, &segment_ctx);
    let outcome = engine.run(&bytes);

    assert!(!outcome.torn_groups.is_empty());
    for i in 0..4_u64 {
        assert!(outcome.block_map.contains_key(&(VolumeId(1), i)));
    }
    assert!(!outcome.block_map.contains_key(&(VolumeId(1), 4)));
}
