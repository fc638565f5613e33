//! CPU backend implementation
//!
//! Reference implementation of the Backend trait in host memory. Copies on a
//! stream complete immediately; the stream only counts them.
//!
//! `CpuBackend` is `Clone` and clones share memory, so a test can keep one
//! copy for inspection while another is boxed into a shared backend slot.
//!
//! # Usage
//!
//! ```rust
//! use fieldgrid_backends::{Backend, CpuBackend};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = CpuBackend::with_capacity(1024);
//! let mut boxed: Box<dyn Backend + Send + Sync> = Box::new(backend.clone());
//!
//! let buffer = boxed.allocate_buffer(512)?;
//! assert_eq!(backend.allocated_bytes(), 512);
//! assert!(boxed.allocate_buffer(1024).is_err());
//!
//! boxed.free_buffer(buffer)?;
//! # Ok(())
//! # }
//! ```

pub(crate) mod memory;

use crate::backend::{Backend, BufferHandle, StreamHandle};
use crate::error::Result;
use crate::launch::PlatformLimits;
pub use memory::{CpuBackendStats, StreamStats};
use memory::MemoryManager;
use parking_lot::RwLock;
use std::sync::Arc;

/// CPU backend over host memory
#[derive(Clone)]
pub struct CpuBackend {
    /// Memory manager (buffers, streams, counters)
    memory: Arc<RwLock<MemoryManager>>,

    limits: PlatformLimits,
}

impl CpuBackend {
    /// Create a new CPU backend without a memory limit
    ///
    /// # Example
    ///
    /// ```rust
    /// use fieldgrid_backends::CpuBackend;
    ///
    /// let backend = CpuBackend::new();
    /// assert_eq!(backend.buffer_count(), 0);
    /// ```
    pub fn new() -> Self {
        Self {
            memory: Arc::new(RwLock::new(MemoryManager::new())),
            limits: PlatformLimits::default(),
        }
    }

    /// Create a CPU backend that fails allocations past `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            memory: Arc::new(RwLock::new(MemoryManager::with_capacity(Some(capacity)))),
            limits: PlatformLimits::default(),
        }
    }

    /// Replace the launch limits reported by [`Backend::limits`]
    pub fn with_limits(mut self, limits: PlatformLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Change the memory limit; `None` removes it. Existing buffers are kept.
    pub fn set_capacity(&self, capacity: Option<usize>) {
        self.memory.write().set_capacity(capacity);
    }

    /// Number of live buffers
    pub fn buffer_count(&self) -> usize {
        self.memory.read().buffer_count()
    }

    /// Bytes currently allocated
    pub fn allocated_bytes(&self) -> usize {
        self.memory.read().allocated_bytes()
    }

    /// Whether `handle` names a live buffer
    pub fn contains(&self, handle: BufferHandle) -> bool {
        self.memory.read().contains(handle)
    }

    /// Number of live streams
    pub fn stream_count(&self) -> usize {
        self.memory.read().stream_count()
    }

    /// Counters of a live stream
    pub fn stream_stats(&self, stream: StreamHandle) -> Option<StreamStats> {
        self.memory.read().stream_stats(stream)
    }

    /// Backend-wide counters
    pub fn stats(&self) -> CpuBackendStats {
        self.memory.read().stats()
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for CpuBackend {
    fn allocate_buffer(&mut self, size: usize) -> Result<BufferHandle> {
        self.memory.write().allocate_buffer(size)
    }

    fn free_buffer(&mut self, handle: BufferHandle) -> Result<()> {
        self.memory.write().free_buffer(handle)
    }

    fn buffer_size(&self, handle: BufferHandle) -> Result<usize> {
        self.memory.read().buffer_size(handle)
    }

    fn copy_to_buffer(&mut self, handle: BufferHandle, data: &[u8]) -> Result<()> {
        self.memory.write().copy_to_buffer(handle, 0, data)
    }

    fn copy_from_buffer(&mut self, handle: BufferHandle, data: &mut [u8]) -> Result<()> {
        self.memory.read().copy_from_buffer(handle, 0, data)
    }

    fn allocated_bytes(&self) -> usize {
        self.memory.read().allocated_bytes()
    }

    fn create_stream(&mut self) -> Result<StreamHandle> {
        Ok(self.memory.write().create_stream())
    }

    fn destroy_stream(&mut self, stream: StreamHandle) -> Result<()> {
        self.memory.write().destroy_stream(stream)
    }

    fn copy_to_buffer_async(
        &mut self,
        handle: BufferHandle,
        byte_offset: usize,
        data: &[u8],
        stream: StreamHandle,
    ) -> Result<()> {
        let mut memory = self.memory.write();
        memory.check_stream(stream)?;
        memory.copy_to_buffer(handle, byte_offset, data)?;
        memory.enqueue(stream)
    }

    fn copy_from_buffer_async(
        &mut self,
        handle: BufferHandle,
        byte_offset: usize,
        data: &mut [u8],
        stream: StreamHandle,
    ) -> Result<()> {
        let mut memory = self.memory.write();
        memory.check_stream(stream)?;
        memory.copy_from_buffer(handle, byte_offset, data)?;
        memory.enqueue(stream)
    }

    fn synchronize_stream(&mut self, stream: StreamHandle) -> Result<()> {
        self.memory.write().synchronize(stream)
    }

    fn bind_context(&self) -> Result<()> {
        self.memory.write().record_context_binding();
        Ok(())
    }

    fn limits(&self) -> PlatformLimits {
        self.limits
    }

    fn name(&self) -> &'static str {
        "cpu"
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;

    #[test]
    fn test_cpu_backend_creation() {
        let backend = CpuBackend::new();
        assert_eq!(backend.buffer_count(), 0);
        assert_eq!(backend.limits(), PlatformLimits::default());
        assert_eq!(backend.name(), "cpu");
    }

    #[test]
    fn test_clones_share_memory() {
        let observer = CpuBackend::new();
        let mut backend = observer.clone();

        let buffer = backend.allocate_buffer(64).unwrap();
        assert!(observer.contains(buffer));
        assert_eq!(observer.allocated_bytes(), 64);

        backend.free_buffer(buffer).unwrap();
        assert!(!observer.contains(buffer));
    }

    #[test]
    fn test_copy_roundtrip() {
        let mut backend = CpuBackend::new();
        let buffer = backend.allocate_buffer(16).unwrap();

        let data = [1.5f32, -2.0, 3.25, 0.0];
        backend.copy_to_buffer(buffer, bytemuck::cast_slice(&data)).unwrap();

        let mut out = [0.0f32; 4];
        backend
            .copy_from_buffer(buffer, bytemuck::cast_slice_mut(&mut out))
            .unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_async_copies_are_counted_per_stream() {
        let mut backend = CpuBackend::new();
        let buffer = backend.allocate_buffer(32).unwrap();
        let stream = backend.create_stream().unwrap();

        let chunk = [7u8; 8];
        backend.copy_to_buffer_async(buffer, 8, &chunk, stream).unwrap();
        backend.copy_to_buffer_async(buffer, 16, &chunk, stream).unwrap();
        backend.synchronize_stream(stream).unwrap();

        let stats = backend.stream_stats(stream).unwrap();
        assert_eq!(stats.enqueued, 2);
        assert_eq!(stats.synchronizations, 1);

        let mut out = [0u8; 8];
        backend.copy_from_buffer_async(buffer, 16, &mut out, stream).unwrap();
        backend.synchronize_stream(stream).unwrap();
        assert_eq!(out, chunk);

        backend.destroy_stream(stream).unwrap();
        assert_eq!(backend.stats().synchronizations, 2);
        assert_eq!(backend.stream_count(), 0);
    }

    #[test]
    fn test_async_copy_on_unknown_stream_fails() {
        let mut backend = CpuBackend::new();
        let buffer = backend.allocate_buffer(8).unwrap();

        let err = backend
            .copy_to_buffer_async(buffer, 0, &[1, 2], StreamHandle::new(99))
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidStreamHandle(99)));
    }

    #[test]
    fn test_capacity_can_change() {
        let backend = CpuBackend::with_capacity(16);
        let mut boxed: Box<dyn Backend + Send + Sync> = Box::new(backend.clone());

        assert!(boxed.allocate_buffer(32).unwrap_err().is_out_of_memory());
        backend.set_capacity(None);
        assert!(boxed.allocate_buffer(32).is_ok());
    }

    #[test]
    fn test_bind_context_is_counted() {
        let backend = CpuBackend::new();
        backend.bind_context().unwrap();
        backend.bind_context().unwrap();
        assert_eq!(backend.stats().context_bindings, 2);
    }

    #[test]
    fn test_downcast() {
        let boxed: Box<dyn Backend + Send + Sync> = Box::new(CpuBackend::new());
        assert!(boxed.as_any().downcast_ref::<CpuBackend>().is_some());
    }
}
