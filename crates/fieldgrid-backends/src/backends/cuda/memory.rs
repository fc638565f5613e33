//! CUDA memory management for device buffers and streams

#[cfg(feature = "cuda")]
use crate::backend::{check_bounds, BufferHandle, StreamHandle};
#[cfg(feature = "cuda")]
use crate::error::{BackendError, Result};

#[cfg(feature = "cuda")]
use cudarc::driver::{result, CudaDevice, CudaSlice, CudaStream, DevicePtr, DriverError};

#[cfg(feature = "cuda")]
use std::collections::HashMap;

#[cfg(feature = "cuda")]
use std::sync::Arc;

#[cfg(feature = "cuda")]
fn driver_error(context: &str, e: DriverError) -> BackendError {
    BackendError::Other(format!("{context}: {e}"))
}

/// Memory manager for CUDA buffers and streams
#[cfg(feature = "cuda")]
pub struct CudaMemoryManager {
    /// CUDA device
    device: Arc<CudaDevice>,

    /// Allocated buffers (handle -> device slice + size)
    buffers: HashMap<u64, (CudaSlice<u8>, usize)>,

    /// Forked streams (handle -> stream)
    streams: HashMap<u64, CudaStream>,

    /// Bytes currently allocated
    allocated: usize,

    /// Next buffer handle
    next_buffer_handle: u64,

    /// Next stream handle
    next_stream_handle: u64,
}

#[cfg(feature = "cuda")]
impl CudaMemoryManager {
    /// Create a new CUDA memory manager
    pub fn new(device: Arc<CudaDevice>) -> Self {
        Self {
            device,
            buffers: HashMap::new(),
            streams: HashMap::new(),
            allocated: 0,
            next_buffer_handle: 1,
            next_stream_handle: 1,
        }
    }

    // ============================================================================================
    // Buffer Management
    // ============================================================================================

    /// Allocate a zeroed device buffer
    pub fn allocate_buffer(&mut self, size: usize) -> Result<BufferHandle> {
        let device_slice = self
            .device
            .alloc_zeros::<u8>(size)
            .map_err(|e| BackendError::out_of_memory(size, e.to_string()))?;

        let handle = BufferHandle::new(self.next_buffer_handle);
        self.next_buffer_handle += 1;

        self.buffers.insert(handle.id(), (device_slice, size));
        self.allocated += size;

        Ok(handle)
    }

    /// Free a device buffer
    pub fn free_buffer(&mut self, handle: BufferHandle) -> Result<()> {
        let (_slice, size) = self
            .buffers
            .remove(&handle.id())
            .ok_or(BackendError::InvalidBufferHandle(handle.id()))?;
        // Device memory is released when the slice drops
        self.allocated -= size;
        Ok(())
    }

    pub fn copy_to_buffer(&mut self, handle: BufferHandle, data: &[u8]) -> Result<()> {
        let (device_slice, size) = self
            .buffers
            .get_mut(&handle.id())
            .ok_or(BackendError::InvalidBufferHandle(handle.id()))?;
        check_bounds(0, data.len(), *size)?;

        let mut view = device_slice.slice_mut(0..data.len());
        self.device
            .htod_sync_copy_into(data, &mut view)
            .map_err(|e| driver_error("CUDA host-to-device copy failed", e))
    }

    pub fn copy_from_buffer(&self, handle: BufferHandle, data: &mut [u8]) -> Result<()> {
        let (device_slice, size) = self
            .buffers
            .get(&handle.id())
            .ok_or(BackendError::InvalidBufferHandle(handle.id()))?;
        check_bounds(0, data.len(), *size)?;

        let view = device_slice.slice(0..data.len());
        self.device
            .dtoh_sync_copy_into(&view, data)
            .map_err(|e| driver_error("CUDA device-to-host copy failed", e))
    }

    pub fn buffer_size(&self, handle: BufferHandle) -> Result<usize> {
        let (_slice, size) = self
            .buffers
            .get(&handle.id())
            .ok_or(BackendError::InvalidBufferHandle(handle.id()))?;
        Ok(*size)
    }

    pub fn allocated_bytes(&self) -> usize {
        self.allocated
    }

    /// Raw device address of `byte_offset` within a buffer, after bounds checking
    /// `len` bytes from there.
    fn device_address(&self, handle: BufferHandle, byte_offset: usize, len: usize) -> Result<u64> {
        let (device_slice, size) = self
            .buffers
            .get(&handle.id())
            .ok_or(BackendError::InvalidBufferHandle(handle.id()))?;
        check_bounds(byte_offset, len, *size)?;
        Ok(*device_slice.device_ptr() + byte_offset as u64)
    }

    // ============================================================================================
    // Streams
    // ============================================================================================

    pub fn create_stream(&mut self) -> Result<StreamHandle> {
        let stream = self
            .device
            .fork_default_stream()
            .map_err(|e| driver_error("CUDA stream creation failed", e))?;

        let handle = StreamHandle::new(self.next_stream_handle);
        self.next_stream_handle += 1;
        self.streams.insert(handle.id(), stream);
        Ok(handle)
    }

    pub fn destroy_stream(&mut self, handle: StreamHandle) -> Result<()> {
        let stream = self
            .streams
            .remove(&handle.id())
            .ok_or(BackendError::InvalidStreamHandle(handle.id()))?;
        // SAFETY: the stream handle is owned by `stream`, which is still alive.
        unsafe { result::stream::synchronize(stream.stream) }
            .map_err(|e| driver_error("CUDA stream synchronization failed", e))?;
        // Dropping the forked stream joins it back into the default stream
        drop(stream);
        Ok(())
    }

    fn stream(&self, handle: StreamHandle) -> Result<&CudaStream> {
        self.streams
            .get(&handle.id())
            .ok_or(BackendError::InvalidStreamHandle(handle.id()))
    }

    pub fn copy_to_buffer_async(
        &mut self,
        handle: BufferHandle,
        byte_offset: usize,
        data: &[u8],
        stream: StreamHandle,
    ) -> Result<()> {
        let dst = self.device_address(handle, byte_offset, data.len())?;
        let stream = self.stream(stream)?;
        // SAFETY: `dst..dst + data.len()` was bounds checked against a live
        // allocation; the caller keeps `data` alive until the stream is
        // synchronized.
        unsafe { result::memcpy_htod_async(dst, data, stream.stream) }
            .map_err(|e| driver_error("CUDA async host-to-device copy failed", e))
    }

    pub fn copy_from_buffer_async(
        &mut self,
        handle: BufferHandle,
        byte_offset: usize,
        data: &mut [u8],
        stream: StreamHandle,
    ) -> Result<()> {
        let src = self.device_address(handle, byte_offset, data.len())?;
        let stream = self.stream(stream)?;
        // SAFETY: as above, for the opposite direction.
        unsafe { result::memcpy_dtoh_async(data, src, stream.stream) }
            .map_err(|e| driver_error("CUDA async device-to-host copy failed", e))
    }

    pub fn synchronize_stream(&self, handle: StreamHandle) -> Result<()> {
        let stream = self.stream(handle)?;
        // SAFETY: the stream is owned by this manager and still alive.
        unsafe { result::stream::synchronize(stream.stream) }
            .map_err(|e| driver_error("CUDA stream synchronization failed", e))
    }
}

#[cfg(test)]
#[cfg(feature = "cuda")]
mod tests {
    use super::*;

    fn device() -> Option<Arc<CudaDevice>> {
        CudaDevice::new(0).ok()
    }

    #[test]
    fn test_buffer_lifecycle() {
        let Some(device) = device() else {
            return;
        };
        let mut memory = CudaMemoryManager::new(device);
        let handle = memory.allocate_buffer(256).unwrap();
        assert_eq!(memory.buffer_size(handle).unwrap(), 256);
        assert_eq!(memory.allocated_bytes(), 256);

        memory.free_buffer(handle).unwrap();
        assert_eq!(memory.allocated_bytes(), 0);
        assert!(memory.free_buffer(handle).is_err());
    }

    #[test]
    fn test_async_offset_copy() {
        let Some(device) = device() else {
            return;
        };
        let mut memory = CudaMemoryManager::new(device);
        let handle = memory.allocate_buffer(16).unwrap();
        let stream = memory.create_stream().unwrap();

        memory.copy_to_buffer_async(handle, 8, &[9u8; 8], stream).unwrap();
        memory.synchronize_stream(stream).unwrap();

        let mut out = [0u8; 16];
        memory.copy_from_buffer(handle, &mut out).unwrap();
        assert_eq!(&out[..8], &[0u8; 8]);
        assert_eq!(&out[8..], &[9u8; 8]);

        memory.destroy_stream(stream).unwrap();
    }
}
