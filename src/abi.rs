//! Opaque-handle surface.
//!
//! A thin translation layer between copyable integer tokens and the typed
//! API underneath, for embedders that cannot carry Rust lifetimes across
//! their boundary. A region token is minted by [`create`] and freed by
//! [`destroy`]; a transaction token is minted by [`begin`] and freed by
//! [`end`] — or by [`read`] itself when the read aborts, so a token is
//! single-use after any `false` return.
//!
//! Tokens wrap the underlying allocation pointer. Passing a token that was
//! never minted, or reusing one after it was freed, is undefined behaviour
//! exactly as it would be across a C boundary; the sentinels
//! [`INVALID_SHARED`] and [`INVALID_TX`] are the only tokens that are safe
//! to forge.

use crate::errors::StmError;
use crate::region::Region;
use crate::transaction::Transaction;

/// Opaque region token. 0 is [`INVALID_SHARED`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedHandle(usize);

/// Opaque transaction token. 0 is [`INVALID_TX`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxHandle(usize);

/// Sentinel returned when a region cannot be created.
pub const INVALID_SHARED: SharedHandle = SharedHandle(0);

/// Sentinel for an unusable transaction token.
pub const INVALID_TX: TxHandle = TxHandle(0);

/// Outcome of [`alloc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alloc {
    /// A segment was allocated at the carried base logical address.
    Success(u64),
    /// The segment table is exhausted.
    Nomem,
    /// Kept for symmetry with designs whose allocation can abort the
    /// transaction; never produced here.
    Abort,
}

// SAFETY: handle contract — the token was minted by this module and not
// yet freed. Used by every accessor below.
unsafe fn shared<'a>(handle: SharedHandle) -> &'a Region {
    &*(handle.0 as *const Region)
}

unsafe fn tx_mut<'a>(handle: TxHandle) -> &'a mut Transaction {
    &mut *(handle.0 as *mut Transaction)
}

unsafe fn tx_take(handle: TxHandle) -> Box<Transaction> {
    Box::from_raw(handle.0 as *mut Transaction)
}

/// Create a shared memory region with one first non-freeable segment of
/// `size` bytes. `align` must be a power of two and `size` a positive
/// multiple of it; violations, like allocation failure, yield
/// [`INVALID_SHARED`].
pub fn create(size: usize, align: usize) -> SharedHandle {
    if size == 0 || !align.is_power_of_two() || size % align != 0 {
        return INVALID_SHARED;
    }
    let region = Box::new(Region::new(size, align));
    SharedHandle(Box::into_raw(region) as usize)
}

/// Destroy a region. No transaction may be live on it.
pub fn destroy(handle: SharedHandle) {
    // SAFETY: handle contract; create minted this pointer and ownership
    // returns here exactly once.
    unsafe { drop(Box::from_raw(handle.0 as *mut Region)) }
}

/// Base logical address of the first segment. Never 0.
pub fn start(handle: SharedHandle) -> u64 {
    // SAFETY: handle contract.
    unsafe { shared(handle) }.start()
}

/// Byte size of the first segment.
pub fn size(handle: SharedHandle) -> usize {
    // SAFETY: handle contract.
    unsafe { shared(handle) }.size()
}

/// Alignment (in bytes) of all accesses on the region.
pub fn align(handle: SharedHandle) -> usize {
    // SAFETY: handle contract.
    unsafe { shared(handle) }.align()
}

/// Begin a transaction, read-only when `ro`.
pub fn begin(handle: SharedHandle, ro: bool) -> TxHandle {
    // SAFETY: handle contract.
    let tx = Box::new(unsafe { shared(handle) }.begin(ro));
    TxHandle(Box::into_raw(tx) as usize)
}

/// Transactional read of `dst.len()` bytes from logical address `src`.
///
/// Returns false when the read aborted the transaction; the token is freed
/// and must not be used again.
pub fn read(handle: SharedHandle, tx: TxHandle, src: u64, dst: &mut [u8]) -> bool {
    // SAFETY: handle contract for both tokens.
    let region = unsafe { shared(handle) };
    let txn = unsafe { tx_mut(tx) };
    match region.read(txn, src, dst) {
        Ok(()) => true,
        Err(_) => {
            // SAFETY: the aborting read was the token's final use.
            unsafe { drop(tx_take(tx)) }
            false
        }
    }
}

/// Transactional write of `src` to logical address `dst`. Always true.
pub fn write(handle: SharedHandle, tx: TxHandle, src: &[u8], dst: u64) -> bool {
    // SAFETY: handle contract for both tokens.
    let region = unsafe { shared(handle) };
    let txn = unsafe { tx_mut(tx) };
    region.write(txn, src, dst).is_ok()
}

/// Commit the transaction. True when it committed; the token is freed
/// either way.
pub fn end(handle: SharedHandle, tx: TxHandle) -> bool {
    // SAFETY: handle contract; end consumes the token.
    let region = unsafe { shared(handle) };
    let txn = unsafe { tx_take(tx) };
    region.commit(*txn).is_ok()
}

/// Allocate a fresh segment of `size` bytes, visible to all transactions
/// immediately.
pub fn alloc(handle: SharedHandle, _tx: TxHandle, size: usize) -> Alloc {
    // SAFETY: handle contract.
    match unsafe { shared(handle) }.alloc(size) {
        Ok(base) => Alloc::Success(base),
        Err(StmError::SegmentExhausted) => Alloc::Nomem,
        // Region::alloc reports nothing else.
        Err(_) => Alloc::Nomem,
    }
}

/// Free a segment. Always succeeds; the segment persists until the region
/// is destroyed.
pub fn free(handle: SharedHandle, _tx: TxHandle, addr: u64) -> bool {
    // SAFETY: handle contract.
    unsafe { shared(handle) }.free(addr);
    true
}
