//! In-memory fakes of every collaborator trait.
//!
//! The journal's own tests, and any downstream crate's tests, use these in
//! place of a real allocator/array. There is no mocking framework in this
//! stack; each fake is a small hand-written recorder instead.

mod context_replayer;
mod map_flush;
mod meta_storage;
mod segment_ctx;
mod wb_stripe_allocator;

pub use self::{
    context_replayer::FakeContextReplayer,
    map_flush::FakeMapFlush,
    meta_storage::InMemoryMetaStorage,
    segment_ctx::{FakeSegmentCtx, SegmentCtxCounts},
    wb_stripe_allocator::{FakeWbStripeAllocator, ReconstructCall, SetTailCall},
};
