//! Backend trait for device memory and streams
//!
//! This trait defines the interface that all backends must implement: linear
//! buffers, synchronous and stream-ordered copies, and the platform limits the
//! launch configurer works within.

use super::types::{BufferHandle, StreamHandle};
use crate::error::Result;
use crate::launch::PlatformLimits;

/// Backend trait for device memory management
///
/// # Memory Model
///
/// Buffers are untyped linear byte ranges owned by the backend and named by
/// a [`BufferHandle`]. Handles are never reused, so a stale handle fails with
/// `InvalidBufferHandle` instead of aliasing a newer allocation.
///
/// # Streams
///
/// A stream is an ordered queue of asynchronous copies. Operations enqueued on
/// one stream complete in order; [`Backend::synchronize_stream`] blocks until
/// all of them have finished. The host slice passed to an async copy must stay
/// alive and unmodified until the stream is synchronized.
///
/// # Usage
///
/// ```rust
/// use fieldgrid_backends::{Backend, CpuBackend};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut backend = CpuBackend::new();
/// let buffer = backend.allocate_buffer(16)?;
/// let stream = backend.create_stream()?;
///
/// let data = [1.0f32, 2.0, 3.0, 4.0];
/// backend.copy_to_buffer_async(buffer, 0, bytemuck::cast_slice(&data), stream)?;
/// backend.synchronize_stream(stream)?;
///
/// let mut out = [0.0f32; 4];
/// backend.copy_from_buffer(buffer, bytemuck::cast_slice_mut(&mut out))?;
/// assert_eq!(out, data);
///
/// backend.destroy_stream(stream)?;
/// backend.free_buffer(buffer)?;
/// # Ok(())
/// # }
/// ```
pub trait Backend {
    // ============================================================================================
    // Buffer Management
    // ============================================================================================

    /// Allocate a zeroed buffer of `size` bytes.
    ///
    /// # Errors
    ///
    /// `OutOfDeviceMemory` when the device cannot satisfy the request.
    fn allocate_buffer(&mut self, size: usize) -> Result<BufferHandle>;

    /// Free a buffer.
    fn free_buffer(&mut self, handle: BufferHandle) -> Result<()>;

    /// Get buffer size in bytes
    fn buffer_size(&self, handle: BufferHandle) -> Result<usize>;

    /// Copy host bytes into the start of a buffer, blocking until done.
    fn copy_to_buffer(&mut self, handle: BufferHandle, data: &[u8]) -> Result<()>;

    /// Copy the start of a buffer into host bytes, blocking until done.
    fn copy_from_buffer(&mut self, handle: BufferHandle, data: &mut [u8]) -> Result<()>;

    /// Total bytes currently allocated through this backend.
    fn allocated_bytes(&self) -> usize;

    // ============================================================================================
    // Streams
    // ============================================================================================

    /// Create a new stream.
    fn create_stream(&mut self) -> Result<StreamHandle>;

    /// Destroy a stream. Pending operations are waited for first.
    fn destroy_stream(&mut self, stream: StreamHandle) -> Result<()>;

    /// Enqueue a host-to-device copy at `byte_offset` within `handle`.
    fn copy_to_buffer_async(
        &mut self,
        handle: BufferHandle,
        byte_offset: usize,
        data: &[u8],
        stream: StreamHandle,
    ) -> Result<()>;

    /// Enqueue a device-to-host copy from `byte_offset` within `handle`.
    fn copy_from_buffer_async(
        &mut self,
        handle: BufferHandle,
        byte_offset: usize,
        data: &mut [u8],
        stream: StreamHandle,
    ) -> Result<()>;

    /// Block until every operation enqueued on `stream` has completed.
    fn synchronize_stream(&mut self, stream: StreamHandle) -> Result<()>;

    // ============================================================================================
    // Device Context
    // ============================================================================================

    /// Make this backend's device context current on the calling thread.
    ///
    /// Long-running workers call this once before their first device call.
    fn bind_context(&self) -> Result<()>;

    /// Limits used to shape kernel launches on this device.
    fn limits(&self) -> PlatformLimits;

    /// Short backend name for logs (e.g. `"cpu"`).
    fn name(&self) -> &'static str;

    /// Downcast support
    fn as_any(&self) -> &dyn std::any::Any;

    /// Mutable downcast support
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

/// Check that `[offset, offset + len)` lies within a buffer of `buffer_size`
/// bytes.
pub(crate) fn check_bounds(offset: usize, len: usize, buffer_size: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= buffer_size => Ok(()),
        _ => Err(crate::error::BackendError::BufferOutOfBounds {
            offset,
            size: len,
            buffer_size,
        }),
    }
}
