//! The shared memory region.
//!
//! A region owns a bounded table of segments and the global version clock.
//! Each segment stores its words in stripe layout: a boxed slice of payload
//! atoms next to a parallel slice of versioned locks, one lock per word.
//! Lazily published slots keep the addresses of already-allocated words
//! stable for the region's whole lifetime.

use crossbeam_utils::CachePadded;
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::alloc::{self, SegmentIds, FIRST_SEGMENT, MAX_SEGMENTS};
use crate::errors::StmError;
use crate::transaction::Transaction;
use crate::vlock::VersionedLock;

/// A contiguous run of words.
pub(crate) struct Segment {
    /// Byte size, a positive multiple of the region alignment.
    bytes: usize,
    /// Payload, `atoms_per_word` atoms per word, zero-initialised.
    cells: Box<[AtomicU64]>,
    /// One lock per word, version 0 at construction.
    locks: Box<[VersionedLock]>,
}

impl Segment {
    fn new(bytes: usize, align: usize, apw: usize) -> Self {
        let words = bytes / align;
        let cells = (0..words * apw)
            .map(|_| AtomicU64::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let locks = (0..words)
            .map(|_| VersionedLock::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { bytes, cells, locks }
    }
}

/// A borrowed view of one word: its lock plus its payload atoms.
pub(crate) struct WordRef<'a> {
    pub(crate) lock: &'a VersionedLock,
    cells: &'a [AtomicU64],
    width: usize,
}

impl WordRef<'_> {
    /// Copy the payload into `dst` (`width` bytes), one Acquire load per
    /// atom. Alignments below 8 live in the low bytes of a single atom,
    /// little-endian either way.
    #[inline]
    pub(crate) fn load(&self, dst: &mut [u8]) {
        debug_assert_eq!(dst.len(), self.width);
        if self.width <= 8 {
            let v = self.cells[0].load(Ordering::Acquire);
            dst.copy_from_slice(&v.to_le_bytes()[..self.width]);
        } else {
            for (cell, chunk) in self.cells.iter().zip(dst.chunks_exact_mut(8)) {
                chunk.copy_from_slice(&cell.load(Ordering::Acquire).to_le_bytes());
            }
        }
    }

    /// Copy `src` into the payload, one Release store per atom. Only the
    /// committer holding the word's lock may call this.
    #[inline]
    pub(crate) fn store(&self, src: &[u8]) {
        debug_assert_eq!(src.len(), self.width);
        if self.width <= 8 {
            let mut buf = [0u8; 8];
            buf[..self.width].copy_from_slice(src);
            self.cells[0].store(u64::from_le_bytes(buf), Ordering::Release);
        } else {
            for (cell, chunk) in self.cells.iter().zip(src.chunks_exact(8)) {
                let v = u64::from_le_bytes(chunk.try_into().unwrap());
                cell.store(v, Ordering::Release);
            }
        }
    }
}

/// The unit of shared memory.
///
/// Shared by reference (or `Arc`) between the threads running transactions
/// against it. Dropping the region frees every segment, including ones
/// `free` was called on earlier.
pub struct Region {
    align: usize,
    /// Payload atoms per word: `max(1, align / 8)`.
    apw: usize,
    segments: Box<[OnceCell<Segment>]>,
    gvc: CachePadded<AtomicU64>,
    ids: SegmentIds,
}

impl Region {
    /// Create a region whose first segment holds `size` bytes.
    ///
    /// `align` must be a power of two and `size` a positive multiple of it;
    /// both are asserted.
    pub fn new(size: usize, align: usize) -> Self {
        assert!(align.is_power_of_two(), "alignment must be a power of two");
        assert!(
            size > 0 && size % align == 0,
            "size must be a positive multiple of the alignment"
        );
        debug_assert!((size as u64) <= alloc::OFFSET_MASK + 1);

        let apw = if align <= 8 { 1 } else { align / 8 };
        let segments = (0..MAX_SEGMENTS)
            .map(|_| OnceCell::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let seeded = segments[FIRST_SEGMENT].set(Segment::new(size, align, apw));
        assert!(seeded.is_ok(), "first segment slot taken");

        Self {
            align,
            apw,
            segments,
            gvc: CachePadded::new(AtomicU64::new(0)),
            ids: SegmentIds::new(),
        }
    }

    /// Base logical address of the first segment. Never 0.
    #[inline]
    pub fn start(&self) -> u64 {
        alloc::base_of(FIRST_SEGMENT)
    }

    /// Byte size of the first segment.
    #[inline]
    pub fn size(&self) -> usize {
        self.segment(FIRST_SEGMENT).bytes
    }

    /// Alignment of all accesses on this region, in bytes.
    #[inline]
    pub fn align(&self) -> usize {
        self.align
    }

    /// Current value of the global version clock.
    #[inline]
    pub fn clock(&self) -> u64 {
        self.gvc.load(Ordering::Acquire)
    }

    /// Advance the clock by one commit; returns the new write-version.
    #[inline]
    pub(crate) fn advance_clock(&self) -> u64 {
        self.gvc.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Allocate a fresh zeroed segment of `size` bytes and return its base
    /// logical address. Visible to all transactions immediately: its words
    /// are zero at version 0, which no concurrent transaction can have
    /// observed otherwise.
    pub fn alloc(&self, size: usize) -> Result<u64, StmError> {
        debug_assert!(size > 0 && size % self.align == 0);
        let id = self.ids.next_id().ok_or(StmError::SegmentExhausted)?;
        let published = self.segments[id].set(Segment::new(size, self.align, self.apw));
        assert!(published.is_ok(), "segment id reused");
        Ok(alloc::base_of(id))
    }

    /// Mark a segment free. Deliberately a no-op: segments persist until
    /// the region is dropped, so repeated frees and reads-after-free of
    /// still-referenced addresses stay well-defined.
    pub fn free(&self, _addr: u64) {}

    fn segment(&self, id: usize) -> &Segment {
        self.segments[id]
            .get()
            .expect("logical address in unallocated segment")
    }

    /// Translate a logical address to its word.
    #[inline]
    pub(crate) fn word(&self, addr: u64) -> WordRef<'_> {
        let segment = self.segment(alloc::segment_of(addr));
        let offset = alloc::offset_of(addr);
        debug_assert_eq!(offset % self.align, 0);
        let index = offset / self.align;
        WordRef {
            lock: &segment.locks[index],
            cells: &segment.cells[index * self.apw..(index + 1) * self.apw],
            width: self.align,
        }
    }

    /// Acquire every write-set lock in ascending address order.
    ///
    /// A lock that is taken or already carries a version newer than the
    /// transaction's read-version fails the whole acquisition; everything
    /// acquired so far is released and false is returned. The deterministic
    /// order keeps concurrent committers deadlock-free.
    pub(crate) fn lock_write_set(&self, tx: &Transaction) -> bool {
        for (held, (&addr, _)) in tx.write_set.iter().enumerate() {
            let word = self.word(addr);
            match word.lock.try_acquire() {
                Some(version) if version <= tx.rv => {}
                Some(_) => {
                    word.lock.release();
                    self.unlock_first(tx, held);
                    return false;
                }
                None => {
                    self.unlock_first(tx, held);
                    return false;
                }
            }
        }
        true
    }

    /// Release every write-set lock without touching versions.
    pub(crate) fn unlock_write_set(&self, tx: &Transaction) {
        self.unlock_first(tx, tx.write_set.len());
    }

    fn unlock_first(&self, tx: &Transaction, count: usize) {
        for (&addr, _) in tx.write_set.iter().take(count) {
            self.word(addr).lock.release();
        }
    }

    /// Check that every read-set entry is still unlocked at a version no
    /// newer than the transaction's read-version. Write-set members were
    /// excluded from the read-set when buffered, so a locked entry here
    /// always belongs to another committer.
    pub(crate) fn validate_read_set(&self, tx: &Transaction) -> bool {
        for &addr in tx.read_set.iter() {
            let (locked, version) = self.word(addr).lock.sample();
            if locked || version > tx.rv {
                return false;
            }
        }
        true
    }

    /// Publish every pending write at the transaction's write-version and
    /// hand the locks back. Requires the write-set locks to be held.
    pub(crate) fn publish(&self, tx: &Transaction) {
        for (&addr, value) in tx.write_set.iter() {
            let word = self.word(addr);
            word.store(value);
            word.lock.release_with(tx.wv);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_segment_exists_with_requested_shape() {
        let region = Region::new(64, 8);
        assert_eq!(region.start(), 1 << 32);
        assert_eq!(region.size(), 64);
        assert_eq!(region.align(), 8);
        assert_eq!(region.clock(), 0);
    }

    #[test]
    fn words_start_zeroed_and_unlocked() {
        let region = Region::new(64, 8);
        let word = region.word(region.start() + 24);
        assert_eq!(word.lock.sample(), (false, 0));
        let mut buf = [0xAAu8; 8];
        word.load(&mut buf);
        assert_eq!(buf, [0u8; 8]);
    }

    #[test]
    fn word_payload_round_trips() {
        let region = Region::new(64, 8);
        let word = region.word(region.start());
        word.store(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let mut buf = [0u8; 8];
        word.load(&mut buf);
        assert_eq!(buf, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn sub_word_alignment_round_trips() {
        let region = Region::new(16, 4);
        let word = region.word(region.start() + 4);
        word.store(&[0xDE, 0xAD, 0xBE, 0xEF]);
        let mut buf = [0u8; 4];
        word.load(&mut buf);
        assert_eq!(buf, [0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn wide_alignment_spans_atoms() {
        let region = Region::new(32, 16);
        let word = region.word(region.start() + 16);
        let payload: Vec<u8> = (0..16).collect();
        word.store(&payload);
        let mut buf = [0u8; 16];
        word.load(&mut buf);
        assert_eq!(&buf[..], &payload[..]);
    }

    #[test]
    fn alloc_produces_distinct_zeroed_segments() {
        let region = Region::new(64, 8);
        let a = region.alloc(16).unwrap();
        let b = region.alloc(16).unwrap();
        assert_ne!(a, 0);
        assert_ne!(a, region.start());
        assert_ne!(a, b);
        let mut buf = [0xFFu8; 8];
        region.word(b + 8).load(&mut buf);
        assert_eq!(buf, [0u8; 8]);
    }

    #[test]
    fn free_is_a_no_op() {
        let region = Region::new(64, 8);
        let seg = region.alloc(16).unwrap();
        region.free(seg);
        region.free(seg);
        let mut buf = [1u8; 8];
        region.word(seg).load(&mut buf);
        assert_eq!(buf, [0u8; 8]);
    }
}
