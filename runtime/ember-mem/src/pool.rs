//! Size-classed recycling pool for dynamic flex buffers.
//!
//! Small buffers round up to an 8-byte-step class and get recycled into a
//! per-class bucket on free; outsized requests go straight to the general
//! allocator and are never pooled.

use crate::error::{MemError, MemResult};

pub(crate) const POOL_MAX_BYTES: usize = 1024;
pub(crate) const POOL_BUCKETS: usize = POOL_MAX_BYTES / 8 + 1;
const POOL_BUCKET_LIMIT: usize = 256;

pub(crate) struct Pool {
    buckets: Vec<Vec<Vec<u8>>>,
    bytes_pooled: usize,
}

/// Round a request up to its size class, or `None` when it must bypass the
/// pool.
fn class_bytes(request: usize) -> Option<usize> {
    if request == 0 || request > POOL_MAX_BYTES {
        return None;
    }
    Some((request + 7) & !7)
}

impl Pool {
    pub(crate) fn new() -> Self {
        Self {
            buckets: (0..POOL_BUCKETS).map(|_| Vec::new()).collect(),
            bytes_pooled: 0,
        }
    }

    pub(crate) fn bytes_pooled(&self) -> usize {
        self.bytes_pooled
    }

    /// Hand out a zeroed buffer of at least `request` bytes. The returned
    /// length is the size class, so callers derive total capacity from it.
    pub(crate) fn alloc(&mut self, request: usize) -> MemResult<Vec<u8>> {
        let Some(class) = class_bytes(request) else {
            return fresh(request);
        };
        let bucket = &mut self.buckets[class / 8];
        if let Some(mut data) = bucket.pop() {
            self.bytes_pooled -= data.len();
            data.fill(0);
            return Ok(data);
        }
        fresh(class)
    }

    /// Return a dynamic buffer for reuse. Buckets are bounded; overflow and
    /// outsized buffers drop to the general allocator.
    pub(crate) fn recycle(&mut self, data: Vec<u8>) {
        let len = data.len();
        if class_bytes(len) != Some(len) {
            return;
        }
        let bucket = &mut self.buckets[len / 8];
        if bucket.len() < POOL_BUCKET_LIMIT {
            self.bytes_pooled += len;
            bucket.push(data);
        }
    }
}

fn fresh(bytes: usize) -> MemResult<Vec<u8>> {
    let mut data = Vec::new();
    data.try_reserve_exact(bytes).map_err(|_| MemError::OutOfMemory)?;
    data.resize(bytes, 0);
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_round_up_to_eight() {
        assert_eq!(class_bytes(1), Some(8));
        assert_eq!(class_bytes(8), Some(8));
        assert_eq!(class_bytes(9), Some(16));
        assert_eq!(class_bytes(POOL_MAX_BYTES), Some(POOL_MAX_BYTES));
        assert_eq!(class_bytes(POOL_MAX_BYTES + 1), None);
        assert_eq!(class_bytes(0), None);
    }

    #[test]
    fn recycle_then_alloc_reuses_and_zeroes() {
        let mut pool = Pool::new();
        let mut data = pool.alloc(16).unwrap();
        data.fill(0xAB);
        pool.recycle(data);
        assert_eq!(pool.bytes_pooled(), 16);
        let again = pool.alloc(10).unwrap();
        assert_eq!(again.len(), 16);
        assert!(again.iter().all(|&b| b == 0));
        assert_eq!(pool.bytes_pooled(), 0);
    }

    #[test]
    fn outsized_buffers_bypass_the_pool() {
        let mut pool = Pool::new();
        let data = pool.alloc(POOL_MAX_BYTES * 4).unwrap();
        assert_eq!(data.len(), POOL_MAX_BYTES * 4);
        pool.recycle(data);
        assert_eq!(pool.bytes_pooled(), 0);
    }
}
