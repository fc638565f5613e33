//! CUDA backend implementation for NVIDIA GPUs
//!
//! Device buffers and forked streams through cudarc. Only compiled with the
//! `cuda` feature; without it [`CudaBackend::new`] reports the backend as
//! unsupported.
//!
//! # Architecture
//!
//! ```text
//! CudaBackend
//! ├── Device          - CUDA device 0
//! └── MemoryManager   - buffers + forked streams
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use fieldgrid_backends::{Backend, CudaBackend};
//!
//! let mut backend = CudaBackend::new()?;
//! let buffer = backend.allocate_buffer(1024)?;
//! backend.free_buffer(buffer)?;
//! ```

mod memory;

use crate::error::{BackendError, Result};

#[cfg(feature = "cuda")]
use crate::backend::{Backend, BufferHandle, StreamHandle};
#[cfg(feature = "cuda")]
use crate::launch::PlatformLimits;
#[cfg(feature = "cuda")]
use parking_lot::RwLock;
#[cfg(feature = "cuda")]
use std::sync::Arc;

#[cfg(feature = "cuda")]
use cudarc::driver::CudaDevice;

#[cfg(feature = "cuda")]
use memory::CudaMemoryManager;

/// CUDA backend
#[cfg(feature = "cuda")]
pub struct CudaBackend {
    /// CUDA device (GPU)
    device: Arc<CudaDevice>,

    /// Memory manager (buffers and streams)
    memory: Arc<RwLock<CudaMemoryManager>>,

    limits: PlatformLimits,
}

#[cfg(feature = "cuda")]
impl CudaBackend {
    /// Create a new CUDA backend on device 0
    ///
    /// # Errors
    ///
    /// Returns an error if no CUDA device is available or initialization fails.
    pub fn new() -> Result<Self> {
        // In cudarc 0.12, CudaDevice::new returns Arc<CudaDevice>
        let device = CudaDevice::new(0)
            .map_err(|e| BackendError::Other(format!("CUDA device not found or initialization failed: {}", e)))?;

        let memory = Arc::new(RwLock::new(CudaMemoryManager::new(Arc::clone(&device))));

        Ok(Self {
            device,
            memory,
            limits: PlatformLimits::default(),
        })
    }

    /// Check if CUDA is available on this system
    pub fn is_available() -> bool {
        CudaDevice::new(0).is_ok()
    }
}

#[cfg(feature = "cuda")]
impl Backend for CudaBackend {
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
        self.memory.write().copy_to_buffer(handle, data)
    }

    fn copy_from_buffer(&mut self, handle: BufferHandle, data: &mut [u8]) -> Result<()> {
        self.memory.read().copy_from_buffer(handle, data)
    }

    fn allocated_bytes(&self) -> usize {
        self.memory.read().allocated_bytes()
    }

    fn create_stream(&mut self) -> Result<StreamHandle> {
        self.memory.write().create_stream()
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
        self.memory
            .write()
            .copy_to_buffer_async(handle, byte_offset, data, stream)
    }

    fn copy_from_buffer_async(
        &mut self,
        handle: BufferHandle,
        byte_offset: usize,
        data: &mut [u8],
        stream: StreamHandle,
    ) -> Result<()> {
        self.memory
            .write()
            .copy_from_buffer_async(handle, byte_offset, data, stream)
    }

    fn synchronize_stream(&mut self, stream: StreamHandle) -> Result<()> {
        self.memory.read().synchronize_stream(stream)
    }

    fn bind_context(&self) -> Result<()> {
        self.device
            .bind_to_thread()
            .map_err(|e| BackendError::Other(format!("failed to bind CUDA context: {}", e)))
    }

    fn limits(&self) -> PlatformLimits {
        self.limits
    }

    fn name(&self) -> &'static str {
        "cuda"
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

// Stub implementation when CUDA feature is not enabled
#[cfg(not(feature = "cuda"))]
pub struct CudaBackend;

#[cfg(not(feature = "cuda"))]
impl CudaBackend {
    pub fn new() -> Result<Self> {
        Err(BackendError::UnsupportedOperation(
            "CUDA backend requires 'cuda' feature to be enabled".into(),
        ))
    }

    pub fn is_available() -> bool {
        false
    }
}


#[cfg(test)]
#[cfg(feature = "cuda")]
mod tests {
    use super::*;

    #[test]
    fn test_cuda_availability() {
        // May or may not be available depending on hardware
        let _ = CudaBackend::is_available();
    }

    #[test]
    fn test_cuda_backend_streams() {
        if !CudaBackend::is_available() {
            return;
        }
        let mut backend = CudaBackend::new().unwrap();
        backend.bind_context().unwrap();

        let buffer = backend.allocate_buffer(64).unwrap();
        let stream = backend.create_stream().unwrap();
        let data = [3u8; 32];
        backend.copy_to_buffer_async(buffer, 32, &data, stream).unwrap();
        backend.synchronize_stream(stream).unwrap();

        let mut out = [0u8; 32];
        backend.copy_from_buffer_async(buffer, 32, &mut out, stream).unwrap();
        backend.synchronize_stream(stream).unwrap();
        assert_eq!(out, data);

        backend.destroy_stream(stream).unwrap();
        backend.free_buffer(buffer).unwrap();
        assert_eq!(backend.allocated_bytes(), 0);
    }
}
