//! Collaborator traits consumed by `journal-core`, plus in-memory fakes of
//! each one for testing.
//!
//! `journal-core` never reaches into the allocator, the write-buffer, or the
//! map-persistence layer directly; it only calls through [`traits`]. That
//! keeps the journal testable without a real array behind it.

pub mod traits;
pub mod types;

#[cfg(feature = "fakes")]
pub mod fakes;
