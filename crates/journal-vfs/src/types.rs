//! Small identifiers shared by every collaborator trait.
//!
//! These mirror the identifiers the journal's log records carry on the wire
//! (see `journal_core::record`), but live in this crate so that the
//! collaborator traits in [`crate::traits`] do not depend on `journal-core`.

use std::fmt::{Debug, Formatter, Result as FmtResult};

/// Identifies a volume within the array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VolumeId(pub u32);

/// A stripe id inside the internal virtual address space (a `vsid`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StripeId(pub u32);

/// A write-buffer logical stripe id, naming a write-buffer stripe slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WbLsid(pub u32);

/// Index into a volume's active-stripe-tail vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WbIndex(pub u32);

/// Identifies a metadata partition whose flushed-context version can be queried
/// via [`crate::traits::SegmentCtx::get_stored_context_version`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionId(pub u32);

/// `(stripe_id, offset)`, identifying a block inside the internal virtual address
/// space.
///
/// `UNMAP` (all bits set) marks "no block written here".
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct VirtualBlkAddr {
    pub stripe_id: StripeId,
    pub offset:    u32,
}

impl VirtualBlkAddr {
    pub const UNMAP: Self = Self { stripe_id: StripeId(u32::MAX), offset: u32::MAX };

    #[must_use]
    pub fn is_unmap(self) -> bool {
        self == Self::UNMAP
    }
}

impl Debug for VirtualBlkAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        if self.is_unmap() {
            write!(f, "VSA(UNMAP)")
        } else {
            write!(f, "VSA({}, {})", self.stripe_id.0, self.offset)
        }
    }
}
