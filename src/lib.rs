//! Word-granular software transactional memory.
//!
//! # Architecture
//!
//! A [`Region`] is a table of segments, each an array of `align`-byte
//! words. Threads mutate it through transactions using a TL2-style
//! (Transactional Locking II) protocol driven by a global version clock:
//!
//! - **Reads**: optimistic. No locks are taken; every word copy is
//!   bracketed by two samples of the word's versioned lock, and any
//!   locked, torn, or newer-than-snapshot observation aborts.
//! - **Writes**: buffered in a per-transaction write-set, published only
//!   at commit.
//! - **Commit**: acquires the write-set locks in address order, mints a
//!   write-version from the clock, validates the read-set (skipped when no
//!   other commit intervened), and releases each lock with the new
//!   version. Commits are serialised by the clock; aborted transactions
//!   leave the region untouched.
//!
//! Conflicts surface as [`StmError`] and never retry internally; drive the
//! explicit [`Region::begin`]/[`Region::commit`] cycle yourself or lean on
//! [`Region::atomically`].
//!
//! # Example
//!
//! ```
//! use petek::Region;
//!
//! let region = Region::new(64, 8);
//! let addr = region.start();
//!
//! region.atomically(false, |r, tx| {
//!     let mut word = [0u8; 8];
//!     r.read(tx, addr, &mut word)?;
//!     word[0] += 1;
//!     r.write(tx, &word, addr)
//! });
//! ```
//!
//! The [`abi`] module exposes the same operations over copyable opaque
//! tokens for embedders that cannot hold Rust references across their
//! boundary.

pub mod abi;
mod alloc;
mod errors;
mod region;
mod transaction;
mod vlock;

pub use alloc::MAX_SEGMENTS;
pub use errors::StmError;
pub use region::Region;
pub use transaction::Transaction;
