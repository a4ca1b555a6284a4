//! Transactions and the TL2 protocol engine.
//!
//! A transaction is a plain owned record: a read-version snapshot, a
//! read-set of addresses, and a write-set buffering pending values. Reads
//! are optimistic (no locks, a two-sample sandwich around every word
//! copy); writes go to the local buffer; commit acquires the write-set
//! locks in address order, mints a write-version from the global clock,
//! validates the read-set, and publishes.
//!
//! None of the operations here retry internally. A failed `read` or
//! `commit` kills the transaction and reports a conflict; the retry loop
//! belongs to the caller, or to [`Region::atomically`] when convenient.

use crossbeam_utils::Backoff;
use foldhash::fast::FixedState;
use std::collections::{BTreeMap, HashSet};

use crate::errors::StmError;
use crate::region::Region;

/// An in-flight transaction against one [`Region`].
///
/// Created by [`Region::begin`], consumed by [`Region::commit`]. After any
/// operation on it returns an error the record is dead and must be
/// discarded; beginning a fresh transaction is the only way to retry.
pub struct Transaction {
    pub(crate) ro: bool,
    /// Read-version: global clock snapshot taken at begin.
    pub(crate) rv: u64,
    /// Write-version, minted at commit. 0 while active.
    pub(crate) wv: u64,
    /// Addresses observed by reads. Stays empty for read-only
    /// transactions, and never overlaps the write-set.
    pub(crate) read_set: HashSet<u64, FixedState>,
    /// Pending writes, keyed by address. The ordered keys double as the
    /// commit-time lock-acquisition order.
    pub(crate) write_set: BTreeMap<u64, Box<[u8]>>,
}

impl Transaction {
    /// Whether this transaction was begun read-only.
    pub fn is_read_only(&self) -> bool {
        self.ro
    }
}

impl Region {
    /// Start a transaction. Never fails.
    ///
    /// Read-only transactions skip all bookkeeping: they keep no read-set,
    /// accept no writes, and commit without touching the clock.
    pub fn begin(&self, ro: bool) -> Transaction {
        Transaction {
            ro,
            rv: self.clock(),
            wv: 0,
            read_set: HashSet::default(),
            write_set: BTreeMap::new(),
        }
    }

    /// Read `dst.len()` bytes starting at logical address `src` into
    /// `dst`. The length must be a positive multiple of the alignment and
    /// the range must lie within one segment.
    ///
    /// Words pending in the transaction's own write-set are served from
    /// there. Every other word is copied under a lock-sample sandwich; any
    /// concurrently locked, torn, or newer-than-read-version observation
    /// aborts with [`StmError::ReadConflict`], after which the transaction
    /// must be discarded.
    pub fn read(&self, tx: &mut Transaction, src: u64, dst: &mut [u8]) -> Result<(), StmError> {
        let align = self.align();
        debug_assert!(!dst.is_empty() && dst.len() % align == 0);

        for (i, chunk) in dst.chunks_exact_mut(align).enumerate() {
            let addr = src + (i * align) as u64;

            if !tx.ro {
                if let Some(pending) = tx.write_set.get(&addr) {
                    chunk.copy_from_slice(pending);
                    continue;
                }
            }

            let word = self.word(addr);
            let (pre_locked, pre_version) = word.lock.sample();
            word.load(chunk);
            let (post_locked, post_version) = word.lock.sample();

            if pre_locked || post_locked || pre_version != post_version || post_version > tx.rv {
                return Err(StmError::ReadConflict);
            }

            if !tx.ro {
                tx.read_set.insert(addr);
            }
        }

        Ok(())
    }

    /// Buffer `src` for writing at logical address `dst`. The length must
    /// be a positive multiple of the alignment; the transaction must not
    /// be read-only. Last writer wins per address. Never aborts.
    pub fn write(&self, tx: &mut Transaction, src: &[u8], dst: u64) -> Result<(), StmError> {
        let align = self.align();
        debug_assert!(!tx.ro, "write issued on a read-only transaction");
        debug_assert!(!src.is_empty() && src.len() % align == 0);

        for (i, chunk) in src.chunks_exact(align).enumerate() {
            let addr = dst + (i * align) as u64;
            tx.write_set.insert(addr, Box::from(chunk));
            // A buffered word is validated through its lock at commit, not
            // through the read-set.
            tx.read_set.remove(&addr);
        }

        Ok(())
    }

    /// Commit the transaction.
    ///
    /// Read-only transactions succeed immediately. Otherwise the write-set
    /// is locked in address order (failure: [`StmError::LockConflict`],
    /// clock untouched), a write-version is minted, the read-set is
    /// validated unless no other commit intervened since begin
    /// (`rv + 1 == wv`, the fast path), and the pending writes are
    /// published at the write-version. Either every pending write becomes
    /// visible or none does.
    pub fn commit(&self, mut tx: Transaction) -> Result<(), StmError> {
        if tx.ro {
            return Ok(());
        }

        if !self.lock_write_set(&tx) {
            return Err(StmError::LockConflict);
        }

        tx.wv = self.advance_clock();

        if tx.rv + 1 != tx.wv && !self.validate_read_set(&tx) {
            self.unlock_write_set(&tx);
            return Err(StmError::ValidationConflict);
        }

        self.publish(&tx);
        Ok(())
    }

    /// Run `f` inside a transaction, retrying on conflict until it
    /// commits.
    ///
    /// This is the client-side retry loop packaged: each attempt gets a
    /// fresh transaction, any error from `f` or from commit discards it,
    /// and the loop backs off before trying again. Keep I/O out of `f`; it
    /// may run many times.
    pub fn atomically<T, F>(&self, ro: bool, mut f: F) -> T
    where
        F: FnMut(&Region, &mut Transaction) -> Result<T, StmError>,
    {
        let backoff = Backoff::new();
        loop {
            let mut tx = self.begin(ro);
            if let Ok(value) = f(self, &mut tx) {
                if self.commit(tx).is_ok() {
                    return value;
                }
            }
            backoff.snooze();
        }
    }
}
