//! Shared pool of frame buffers.
//!
//! Every command, response and inbound notification frame lives in a
//! [`PooledBuffer`] taken from a [`BufferPool`]. The pool bounds how many
//! buffers may be outstanding at once and how large a single buffer may be,
//! and recycles released blocks instead of freeing them.
//!
//! # Usage
//!
//! ```
//! use altcom_rpc::buffer::{BufferPool, PoolConfig};
//!
//! let pool = BufferPool::new(&PoolConfig::default());
//! let mut buf = pool.acquire(16).unwrap();
//! buf.bytes_mut().extend_from_slice(b"frame");
//! buf.release();
//! assert_eq!(pool.stats().outstanding, 0);
//! ```

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::AllocationFailure;
use crate::protocol::{DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};

/// Default number of buffers that may be outstanding at once.
pub const DEFAULT_MAX_BUFFERS: usize = 64;

/// Limits for a [`BufferPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum buffers handed out and not yet released.
    pub max_buffers: usize,
    /// Largest single buffer, header included.
    pub max_buffer_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_buffers: DEFAULT_MAX_BUFFERS,
            max_buffer_size: HEADER_SIZE + DEFAULT_MAX_PAYLOAD_SIZE as usize,
        }
    }
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Buffers handed out since creation.
    pub acquired: u64,
    /// Buffers given back since creation.
    pub released: u64,
    /// Buffers currently held by callers.
    pub outstanding: usize,
}

struct PoolInner {
    free: Mutex<Vec<BytesMut>>,
    max_buffers: usize,
    max_buffer_size: usize,
    outstanding: AtomicUsize,
    acquired: AtomicU64,
    released: AtomicU64,
}

impl PoolInner {
    fn give_back(&self, mut block: BytesMut) {
        block.clear();
        {
            let mut free = self.free.lock();
            if free.len() < self.max_buffers {
                free.push(block);
            }
        }
        self.released.fetch_add(1, Ordering::Relaxed);
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Bounded, thread-safe pool of frame buffers.
///
/// Cheap to clone; clones share the same blocks and counters.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Create a pool with the given limits.
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::with_capacity(config.max_buffers)),
                max_buffers: config.max_buffers,
                max_buffer_size: config.max_buffer_size,
                outstanding: AtomicUsize::new(0),
                acquired: AtomicU64::new(0),
                released: AtomicU64::new(0),
            }),
        }
    }

    /// Acquire an empty buffer able to hold `size` bytes.
    ///
    /// Fails when `size` exceeds the per-buffer limit or when all buffers
    /// are already handed out.
    pub fn acquire(&self, size: usize) -> Result<PooledBuffer, AllocationFailure> {
        let inner = &self.inner;
        if size > inner.max_buffer_size {
            return Err(AllocationFailure { requested: size });
        }

        inner
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < inner.max_buffers).then_some(n + 1)
            })
            .map_err(|_| AllocationFailure { requested: size })?;
        inner.acquired.fetch_add(1, Ordering::Relaxed);

        let mut block = inner
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(size));
        block.reserve(size);

        Ok(PooledBuffer {
            block,
            size,
            pool: Some(self.inner.clone()),
        })
    }

    /// Current counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            acquired: self.inner.acquired.load(Ordering::Acquire),
            released: self.inner.released.load(Ordering::Acquire),
            outstanding: self.inner.outstanding.load(Ordering::Acquire),
        }
    }

    /// Largest buffer this pool hands out.
    pub fn max_buffer_size(&self) -> usize {
        self.inner.max_buffer_size
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(&PoolConfig::default())
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("max_buffers", &self.inner.max_buffers)
            .field("max_buffer_size", &self.inner.max_buffer_size)
            .field("stats", &self.stats())
            .finish()
    }
}

/// A buffer on loan from a [`BufferPool`].
///
/// Returned to the pool by [`release`](Self::release) or on drop, whichever
/// comes first. Releasing twice is a no-op.
pub struct PooledBuffer {
    block: BytesMut,
    size: usize,
    pool: Option<Arc<PoolInner>>,
}

impl PooledBuffer {
    /// Give the buffer back to its pool.
    pub fn release(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.give_back(std::mem::take(&mut self.block));
        }
    }

    /// True once the buffer has been given back.
    #[inline]
    pub fn is_released(&self) -> bool {
        self.pool.is_none()
    }

    /// Size requested at acquisition.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Bytes written so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.block.len()
    }

    /// True if nothing has been written.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.block.is_empty()
    }

    /// Contents written so far.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.block
    }

    /// Mutable access for writers.
    #[inline]
    pub fn bytes_mut(&mut self) -> &mut BytesMut {
        &mut self.block
    }

    /// Discard the contents, keeping the allocation.
    #[inline]
    pub fn clear(&mut self) {
        self.block.clear();
    }
}

impl std::ops::Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.block
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("size", &self.size)
            .field("len", &self.block.len())
            .field("released", &self.is_released())
            .finish()
    }
}
