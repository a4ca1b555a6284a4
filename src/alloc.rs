//! Logical addresses and segment-id allocation.
//!
//! A logical address packs `segment_id << 32 | byte_offset`, supporting
//! segments up to 4 GiB. Slot 0 is never handed out, so a valid logical
//! address is never 0 and 0 can serve as the null sentinel. The first
//! segment of every region occupies id 1.

use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};

/// Bit position of the segment id within a logical address.
pub(crate) const SEGMENT_SHIFT: u32 = 32;

/// Mask selecting the byte offset of a logical address.
pub(crate) const OFFSET_MASK: u64 = (1 << SEGMENT_SHIFT) - 1;

/// Segment id of the first (non-freeable) segment.
pub(crate) const FIRST_SEGMENT: usize = 1;

/// Capacity of the segment table. Slot 0 stays empty, so a region holds at
/// most `MAX_SEGMENTS - 1` segments over its lifetime.
pub const MAX_SEGMENTS: usize = 512;

/// Base logical address of a segment.
#[inline]
pub(crate) fn base_of(segment: usize) -> u64 {
    (segment as u64) << SEGMENT_SHIFT
}

/// Segment id of a logical address.
#[inline]
pub(crate) fn segment_of(addr: u64) -> usize {
    (addr >> SEGMENT_SHIFT) as usize
}

/// Byte offset of a logical address within its segment.
#[inline]
pub(crate) fn offset_of(addr: u64) -> usize {
    (addr & OFFSET_MASK) as usize
}

/// Monotonic segment-id allocator.
///
/// A single fetch-add per allocation; ids are never reused within a
/// region's lifetime. Ids past the table capacity report exhaustion and
/// stay burned.
pub(crate) struct SegmentIds {
    next: CachePadded<AtomicU64>,
}

impl SegmentIds {
    pub(crate) fn new() -> Self {
        Self {
            next: CachePadded::new(AtomicU64::new(FIRST_SEGMENT as u64 + 1)),
        }
    }

    /// Claim the next id, or `None` once the table is full.
    pub(crate) fn next_id(&self) -> Option<usize> {
        let id = self.next.fetch_add(1, Ordering::Relaxed) as usize;
        (id < MAX_SEGMENTS).then_some(id)
    }
}
