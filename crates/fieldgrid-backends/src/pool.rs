//! Scratch buffer pool
//!
//! Kernels borrow temporary device buffers many times per step. The pool keeps
//! recycled buffers on per-size free lists so a repeated request reuses an
//! existing allocation instead of going back to the device.
//!
//! ```text
//! get(bytes) ──► free list for `bytes` ──► hit: reuse handle
//!                                      └─► miss: backend.allocate_buffer
//! recycle(h) ──► free list for size(h)
//! free_all   ──► free every buffer the pool ever handed out
//! ```
//!
//! A resize invalidates every scratch size at once, so [`BufferPool::free_all`]
//! releases both idle and outstanding buffers.
//!
//! # Usage
//!
//! ```rust
//! use fieldgrid_backends::{BufferPool, CpuBackend};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut backend = CpuBackend::new();
//! let mut pool = BufferPool::new();
//!
//! let a = pool.get(&mut backend, 4096)?;
//! pool.recycle(a)?;
//! let b = pool.get(&mut backend, 4096)?;
//! assert_eq!(a, b);
//!
//! assert_eq!(pool.free_all(&mut backend), 1);
//! assert_eq!(backend.buffer_count(), 0);
//! # Ok(())
//! # }
//! ```

use crate::backend::{Backend, BufferHandle};
use crate::error::{BackendError, Result};
use std::collections::HashMap;

/// Pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Requests served from a free list
    pub hits: u64,

    /// Requests that allocated a new buffer
    pub misses: u64,

    /// Buffers released by `free_all`
    pub freed: u64,
}

/// Size-bucketed pool of scratch device buffers
#[derive(Debug, Default)]
pub struct BufferPool {
    /// Idle buffers by size in bytes
    idle: HashMap<usize, Vec<BufferHandle>>,

    /// Buffers handed out and not yet recycled
    outstanding: HashMap<BufferHandle, usize>,

    stats: PoolStats,
}

impl BufferPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrow a buffer of exactly `bytes` bytes.
    ///
    /// The contents of a reused buffer are whatever its last user left there.
    pub fn get(&mut self, backend: &mut dyn Backend, bytes: usize) -> Result<BufferHandle> {
        let handle = match self.idle.get_mut(&bytes).and_then(Vec::pop) {
            Some(handle) => {
                self.stats.hits += 1;
                handle
            }
            None => {
                self.stats.misses += 1;
                backend.allocate_buffer(bytes)?
            }
        };

        self.outstanding.insert(handle, bytes);
        Ok(handle)
    }

    /// Return a buffer obtained from [`BufferPool::get`].
    pub fn recycle(&mut self, handle: BufferHandle) -> Result<()> {
        let bytes = self
            .outstanding
            .remove(&handle)
            .ok_or(BackendError::InvalidBufferHandle(handle.id()))?;
        self.idle.entry(bytes).or_default().push(handle);
        Ok(())
    }

    /// Free every buffer owned by the pool, idle or outstanding, and return how
    /// many were freed.
    ///
    /// Never fails: a buffer the backend refuses to free is logged and dropped
    /// from the pool.
    pub fn free_all(&mut self, backend: &mut dyn Backend) -> usize {
        let idle = self.idle.drain().flat_map(|(_, handles)| handles);
        let outstanding = self.outstanding.drain().map(|(handle, _)| handle);

        let mut freed = 0;
        for handle in idle.chain(outstanding).collect::<Vec<_>>() {
            match backend.free_buffer(handle) {
                Ok(()) => freed += 1,
                Err(e) => tracing::warn!(buffer = %handle, error = %e, "failed to free pooled buffer"),
            }
        }

        self.stats.freed += freed as u64;
        tracing::debug!(freed = freed, "buffer pool emptied");
        freed
    }

    /// Number of idle buffers
    pub fn idle_count(&self) -> usize {
        self.idle.values().map(Vec::len).sum()
    }

    /// Number of buffers currently handed out
    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }

    /// Whether the pool owns no buffers at all
    pub fn is_empty(&self) -> bool {
        self.idle_count() == 0 && self.outstanding.is_empty()
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::CpuBackend;

    #[test]
    fn test_reuse_by_size() {
        let mut backend = CpuBackend::new();
        let mut pool = BufferPool::new();

        let a = pool.get(&mut backend, 64).unwrap();
        pool.recycle(a).unwrap();

        let b = pool.get(&mut backend, 128).unwrap();
        let c = pool.get(&mut backend, 64).unwrap();

        assert_ne!(a, b);
        assert_eq!(a, c);
        assert_eq!(pool.stats().hits, 1);
        assert_eq!(pool.stats().misses, 2);
        assert_eq!(backend.buffer_count(), 2);
    }

    #[test]
    fn test_recycle_unknown_handle() {
        let mut pool = BufferPool::new();
        let err = pool.recycle(BufferHandle::new(5)).unwrap_err();
        assert!(matches!(err, BackendError::InvalidBufferHandle(5)));
    }

    #[test]
    fn test_double_recycle_fails() {
        let mut backend = CpuBackend::new();
        let mut pool = BufferPool::new();
        let a = pool.get(&mut backend, 16).unwrap();

        pool.recycle(a).unwrap();
        assert!(pool.recycle(a).is_err());
    }

    #[test]
    fn test_free_all_releases_idle_and_outstanding() {
        let mut backend = CpuBackend::new();
        let mut pool = BufferPool::new();

        let a = pool.get(&mut backend, 32).unwrap();
        let _b = pool.get(&mut backend, 32).unwrap();
        let _c = pool.get(&mut backend, 8).unwrap();
        pool.recycle(a).unwrap();

        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.outstanding_count(), 2);

        assert_eq!(pool.free_all(&mut backend), 3);
        assert!(pool.is_empty());
        assert_eq!(backend.buffer_count(), 0);
        assert_eq!(pool.free_all(&mut backend), 0);
    }

    #[test]
    fn test_free_all_tolerates_already_freed_buffer() {
        let mut backend = CpuBackend::new();
        let mut pool = BufferPool::new();

        let a = pool.get(&mut backend, 32).unwrap();
        let _b = pool.get(&mut backend, 32).unwrap();
        backend.free_buffer(a).unwrap();

        assert_eq!(pool.free_all(&mut backend), 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_allocation_failure_propagates() {
        let mut backend = CpuBackend::with_capacity(16);
        let mut pool = BufferPool::new();

        let err = pool.get(&mut backend, 32).unwrap_err();
        assert!(err.is_out_of_memory());
        assert!(pool.is_empty());
    }
}
