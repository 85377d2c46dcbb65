//! Recyclable scratch-buffer pool
//!
//! The codec borrows temporary buffers for header and body assembly instead
//! of allocating per record. A checkout hands back a [`PooledBuf`] guard;
//! dropping the guard returns the buffer to the pool, so every exit path
//! (including error paths) releases what it borrowed.
//!
//! # Example
//!
//! ```rust
//! use fanout_metrics::pool::BufferPool;
//! use bytes::BufMut;
//!
//! let pool = BufferPool::default();
//! {
//!     let mut buf = pool.checkout();
//!     buf.put_u32_le(42);
//!     assert_eq!(buf.len(), 4);
//! } // returned here
//! assert_eq!(pool.pooled(), 1);
//! ```

use bytes::BytesMut;
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Default number of buffers the pool retains
const DEFAULT_MAX_POOLED: usize = 16;

/// Default capacity a fresh buffer starts with
const DEFAULT_BUF_CAPACITY: usize = 4 * 1024;

/// Pool of reusable byte buffers
///
/// Cloning the pool clones a handle to the same shared free list.
#[derive(Debug, Clone)]
pub struct BufferPool {
    free: Arc<Mutex<Vec<BytesMut>>>,
    max_pooled: usize,
    buf_capacity: usize,
}

impl BufferPool {
    /// Create a pool retaining at most `max_pooled` buffers of
    /// `buf_capacity` initial capacity
    pub fn new(max_pooled: usize, buf_capacity: usize) -> Self {
        Self {
            free: Arc::new(Mutex::new(Vec::new())),
            max_pooled,
            buf_capacity,
        }
    }

    /// Borrow a cleared buffer from the pool, allocating if none is free
    pub fn checkout(&self) -> PooledBuf {
        let buf = self
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.buf_capacity));
        PooledBuf {
            buf: Some(buf),
            pool: self.clone(),
        }
    }

    /// Number of buffers currently resting in the pool
    pub fn pooled(&self) -> usize {
        self.free.lock().len()
    }

    fn give_back(&self, mut buf: BytesMut) {
        buf.clear();
        let mut free = self.free.lock();
        if free.len() < self.max_pooled {
            free.push(buf);
        }
        // Over-cap buffers are simply dropped.
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_POOLED, DEFAULT_BUF_CAPACITY)
    }
}

/// Guard over a borrowed buffer; returns it to the pool on drop
#[derive(Debug)]
pub struct PooledBuf {
    buf: Option<BytesMut>,
    pool: BufferPool,
}

impl Deref for PooledBuf {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        self.buf.as_ref().expect("buffer present until drop")
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut BytesMut {
        self.buf.as_mut().expect("buffer present until drop")
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.give_back(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    #[test]
    fn test_checkout_and_return() {
        let pool = BufferPool::default();
        assert_eq!(pool.pooled(), 0);

        let buf = pool.checkout();
        drop(buf);
        assert_eq!(pool.pooled(), 1);
    }

    #[test]
    fn test_returned_buffer_is_cleared() {
        let pool = BufferPool::default();
        {
            let mut buf = pool.checkout();
            buf.put_slice(b"scratch");
        }
        let buf = pool.checkout();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_pool_cap_drops_excess() {
        let pool = BufferPool::new(1, 64);
        let a = pool.checkout();
        let b = pool.checkout();
        drop(a);
        drop(b);
        assert_eq!(pool.pooled(), 1);
    }

    #[test]
    fn test_release_on_error_path() {
        let pool = BufferPool::default();
        let result: Result<(), &str> = (|| {
            let mut buf = pool.checkout();
            buf.put_u32_le(7);
            Err("bail")
        })();
        assert!(result.is_err());
        assert_eq!(pool.pooled(), 1);
    }
}
