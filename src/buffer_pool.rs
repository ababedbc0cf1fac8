// SPDX-License-Identifier: GPL-3.0-only

//! Pooled byte buffers for frame packing
//!
//! Packing a high-resolution raw frame needs a multi-megabyte destination
//! buffer per frame. Allocating one per capture causes allocation storms
//! under sustained throughput, so released buffers are cached and reused.
//!
//! The pool is an explicit injected component, not process-global state:
//! every producer receives a handle at construction time and tests run
//! against independent pools. Buffers come back automatically when the
//! [`PooledBuffer`] handle is dropped, so a buffer can never be returned
//! twice.

use crate::errors::PackError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

struct BufferPoolInner {
    /// Released buffers available for reuse
    free: Mutex<Vec<Vec<u8>>>,
    /// Maximum buffers retained; releases past this are dropped
    max_retained: usize,
    /// Metrics: total acquires
    total_acquires: AtomicU64,
    /// Metrics: total returns accepted back into the pool
    total_returns: AtomicU64,
    /// Metrics: fresh allocations (pool misses)
    total_allocations: AtomicU64,
}

/// Shared pool of reusable byte buffers.
///
/// Cloning the pool clones a handle to the same shared free list. Each
/// acquire/release takes the lock for the duration of that operation only,
/// never while a buffer is in use.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<BufferPoolInner>,
}

impl BufferPool {
    /// Create a pool retaining at most `max_retained` released buffers
    pub fn new(max_retained: usize) -> Self {
        Self {
            inner: Arc::new(BufferPoolInner {
                free: Mutex::new(Vec::new()),
                max_retained,
                total_acquires: AtomicU64::new(0),
                total_returns: AtomicU64::new(0),
                total_allocations: AtomicU64::new(0),
            }),
        }
    }

    /// Acquire a cleared buffer with capacity of at least `min_capacity`.
    ///
    /// A previously released buffer is reused when one is large enough;
    /// otherwise a fresh buffer is allocated. Allocation failure surfaces
    /// as [`PackError::ResourceExhaustion`] instead of aborting, so the
    /// caller can discard the frame and recover.
    pub fn acquire(&self, min_capacity: usize) -> Result<PooledBuffer, PackError> {
        self.inner.total_acquires.fetch_add(1, Ordering::Relaxed);

        let reused = {
            let mut free = self.inner.free.lock().expect("buffer pool lock poisoned");
            free.iter()
                .position(|buf| buf.capacity() >= min_capacity)
                .map(|idx| free.swap_remove(idx))
        };

        let buf = match reused {
            Some(mut buf) => {
                trace!(capacity = buf.capacity(), min_capacity, "Reusing pooled buffer");
                buf.clear();
                buf
            }
            None => {
                self.inner.total_allocations.fetch_add(1, Ordering::Relaxed);
                let mut buf = Vec::new();
                buf.try_reserve_exact(min_capacity).map_err(|_| {
                    PackError::ResourceExhaustion {
                        requested_bytes: min_capacity,
                    }
                })?;
                debug!(capacity = buf.capacity(), "Allocated fresh pool buffer");
                buf
            }
        };

        Ok(PooledBuffer {
            buf: Some(buf),
            pool: Arc::clone(&self.inner),
        })
    }

    /// Number of released buffers currently available for reuse
    pub fn available(&self) -> usize {
        self.inner.free.lock().expect("buffer pool lock poisoned").len()
    }

    /// Total acquires since creation
    pub fn total_acquires(&self) -> u64 {
        self.inner.total_acquires.load(Ordering::Relaxed)
    }

    /// Total buffers accepted back into the pool since creation
    pub fn total_returns(&self) -> u64 {
        self.inner.total_returns.load(Ordering::Relaxed)
    }

    /// Total fresh allocations (pool misses) since creation
    pub fn total_allocations(&self) -> u64 {
        self.inner.total_allocations.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("available", &self.available())
            .field("max_retained", &self.inner.max_retained)
            .finish()
    }
}

/// A buffer acquired from the pool, returned automatically on drop.
///
/// The handle owns the allocation exclusively; the pool never hands the
/// same buffer to two callers.
pub struct PooledBuffer {
    /// The allocation (Option so Drop can take it)
    buf: Option<Vec<u8>>,
    pool: Arc<BufferPoolInner>,
}

impl PooledBuffer {
    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.buf.as_ref().map_or(0, |b| b.len())
    }

    /// True if nothing has been written
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capacity of the underlying allocation
    pub fn capacity(&self) -> usize {
        self.buf.as_ref().map_or(0, |b| b.capacity())
    }

    /// The written bytes as a slice
    pub fn as_slice(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }

    /// Append bytes. Stays within the reserved capacity in normal use;
    /// growing past it falls back to the allocator.
    pub fn extend_from_slice(&mut self, src: &[u8]) {
        self.buf
            .as_mut()
            .expect("buffer already released")
            .extend_from_slice(src);
    }

    /// Discard written bytes, keeping the allocation
    pub fn clear(&mut self) {
        if let Some(buf) = self.buf.as_mut() {
            buf.clear();
        }
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(mut buf) = self.buf.take() {
            buf.clear();
            let mut free = self.pool.free.lock().expect("buffer pool lock poisoned");
            if free.len() < self.pool.max_retained {
                free.push(buf);
                self.pool.total_returns.fetch_add(1, Ordering::Relaxed);
            }
            // Else the buffer is dropped here and the memory goes back
            // to the allocator.
        }
    }
}

impl AsRef<[u8]> for PooledBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl std::ops::Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PooledBuffer({} bytes)", self.len())
    }
}
