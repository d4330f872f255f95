//! Bounded pool of reusable byte buffers, all of one size.

use std::sync::{Arc, Mutex, OnceLock};

/// Shared slot for the pool. The downloader creates the pool once the probe
/// has revealed the segment size; the assembler frees it when emission ends.
pub(crate) type PoolSlot = Arc<OnceLock<Arc<BufferPool>>>;

/// Recycles segment-sized buffers across segment lifetimes. Capacity should
/// equal the worker parallelism: each worker has at most one buffer in
/// flight, so the pool never needs to hold more.
pub(crate) struct BufferPool {
    size: usize,
    cap: usize,
    bufs: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub(crate) fn new(cap: usize, size: usize) -> Self {
        BufferPool {
            size,
            cap,
            bufs: Mutex::new(Vec::with_capacity(cap)),
        }
    }

    /// Return a buffer of exactly length `n`. Pops from the pool when `n`
    /// fits the pooled size, otherwise allocates fresh.
    pub(crate) fn get(&self, n: usize) -> Vec<u8> {
        if n <= self.size {
            let mut bufs = self.bufs.lock().unwrap();
            if let Some(mut buf) = bufs.pop() {
                buf.truncate(n);
                return buf;
            }
        }
        vec![0u8; n]
    }

    /// Offer a buffer back. Off-size buffers and buffers beyond capacity
    /// are discarded.
    pub(crate) fn put(&self, buf: Vec<u8>) {
        let mut bufs = self.bufs.lock().unwrap();
        if buf.len() == self.size && bufs.len() < self.cap {
            bufs.push(buf);
        }
    }

    /// Drop every held buffer. `get` keeps working through allocation.
    pub(crate) fn free(&self) {
        self.bufs.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_returns_pooled_buffer() {
        let pool = BufferPool::new(4, 8);
        let buf = vec![0u8; 8];
        let ptr = buf.as_ptr();
        pool.put(buf);

        let got = pool.get(8);
        assert_eq!(got.len(), 8);
        assert_eq!(got.as_ptr(), ptr, "expected the pooled buffer back");
    }

    #[test]
    fn test_get_smaller_reslices_pooled_buffer() {
        let pool = BufferPool::new(4, 8);
        let buf = vec![0u8; 8];
        let ptr = buf.as_ptr();
        pool.put(buf);

        let got = pool.get(5);
        assert_eq!(got.len(), 5);
        assert_eq!(got.as_ptr(), ptr);
    }

    #[test]
    fn test_get_larger_allocates_fresh() {
        let pool = BufferPool::new(4, 8);
        pool.put(vec![0u8; 8]);

        let got = pool.get(9);
        assert_eq!(got.len(), 9);
        assert_eq!(pool.bufs.lock().unwrap().len(), 1, "pooled buffer untouched");
    }

    #[test]
    fn test_put_discards_wrong_size() {
        let pool = BufferPool::new(4, 8);
        pool.put(vec![0u8; 7]);
        pool.put(vec![0u8; 9]);
        pool.put(vec![0u8; 8]);
        assert_eq!(pool.bufs.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_put_discards_beyond_capacity() {
        let pool = BufferPool::new(2, 8);
        for _ in 0..3 {
            pool.put(vec![0u8; 8]);
        }
        assert_eq!(pool.bufs.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_free_then_get_allocates() {
        let pool = BufferPool::new(2, 8);
        pool.put(vec![0u8; 8]);
        pool.free();
        assert_eq!(pool.bufs.lock().unwrap().len(), 0);

        let got = pool.get(8);
        assert_eq!(got.len(), 8);
    }
}
