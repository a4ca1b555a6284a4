use std::fmt;

/// Typed errors for transactional operations.
///
/// Every variant except [`StmError::SegmentExhausted`] terminates the
/// offending transaction; the caller owns the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StmError {
    /// A read observed a word that was concurrently locked, torn, or
    /// published after the transaction's read-version.
    ReadConflict,
    /// A write-set lock could not be acquired at commit time.
    LockConflict,
    /// A read-set entry was invalidated between begin and commit.
    ValidationConflict,
    /// The segment table is full; no new segment can be allocated.
    SegmentExhausted,
}

impl fmt::Display for StmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StmError::ReadConflict => {
                write!(f, "read observed a locked or newer word")
            }
            StmError::LockConflict => {
                write!(f, "write-set lock acquisition failed at commit")
            }
            StmError::ValidationConflict => {
                write!(f, "read-set validation failed at commit")
            }
            StmError::SegmentExhausted => {
                write!(f, "segment table capacity exhausted")
            }
        }
    }
}

impl std::error::Error for StmError {}
