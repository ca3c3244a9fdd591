use thiserror::Error;

/// Errors the memory layer reports to callers.
///
/// Only these conditions are recoverable here. Everything else -- flavor
/// mismatch, out-of-bounds cell access, tombstone reads, stale ids on the
/// trusted access tier -- is a caller bug, checked with `debug_assert!` and
/// unchecked in release builds.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemError {
    /// `capacity * width` does not fit in the accounting fields.
    #[error("capacity overflow: {units} units of width {wide}")]
    CapacityOverflow { units: usize, wide: usize },
    /// The allocator refused the request.
    #[error("out of memory")]
    OutOfMemory,
    /// Structural mutation attempted while the buffer is enumeration-locked.
    #[error("buffer is locked for enumeration")]
    Held,
    /// The value's backing buffer has been freed (generation mismatch).
    #[error("access to a decayed buffer")]
    Decayed,
}

pub type MemResult<T> = Result<T, MemError>;
