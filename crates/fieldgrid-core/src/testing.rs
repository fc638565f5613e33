//! Backend doubles for unit tests

use fieldgrid_backends::{Backend, BackendError, BufferHandle, CpuBackend, PlatformLimits, Result, StreamHandle};

/// A [`CpuBackend`] whose synchronous copies can be made to fail
#[derive(Default)]
pub(crate) struct FlakyBackend {
    pub inner: CpuBackend,
    pub fail_uploads: bool,
    pub fail_downloads: bool,
}

impl FlakyBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn refused(what: &str) -> BackendError {
    BackendError::Other(format!("{what} refused"))
}

impl Backend for FlakyBackend {
    fn allocate_buffer(&mut self, size: usize) -> Result<BufferHandle> {
        self.inner.allocate_buffer(size)
    }

    fn free_buffer(&mut self, handle: BufferHandle) -> Result<()> {
        self.inner.free_buffer(handle)
    }

    fn buffer_size(&self, handle: BufferHandle) -> Result<usize> {
        self.inner.buffer_size(handle)
    }

    fn copy_to_buffer(&mut self, handle: BufferHandle, data: &[u8]) -> Result<()> {
        if self.fail_uploads {
            return Err(refused("upload"));
        }
        self.inner.copy_to_buffer(handle, data)
    }

    fn copy_from_buffer(&mut self, handle: BufferHandle, data: &mut [u8]) -> Result<()> {
        if self.fail_downloads {
            return Err(refused("download"));
        }
        self.inner.copy_from_buffer(handle, data)
    }

    fn allocated_bytes(&self) -> usize {
        Backend::allocated_bytes(&self.inner)
    }

    fn create_stream(&mut self) -> Result<StreamHandle> {
        self.inner.create_stream()
    }

    fn destroy_stream(&mut self, stream: StreamHandle) -> Result<()> {
        self.inner.destroy_stream(stream)
    }

    fn copy_to_buffer_async(
        &mut self,
        handle: BufferHandle,
        byte_offset: usize,
        data: &[u8],
        stream: StreamHandle,
    ) -> Result<()> {
        self.inner.copy_to_buffer_async(handle, byte_offset, data, stream)
    }

    fn copy_from_buffer_async(
        &mut self,
        handle: BufferHandle,
        byte_offset: usize,
        data: &mut [u8],
        stream: StreamHandle,
    ) -> Result<()> {
        self.inner.copy_from_buffer_async(handle, byte_offset, data, stream)
    }

    fn synchronize_stream(&mut self, stream: StreamHandle) -> Result<()> {
        self.inner.synchronize_stream(stream)
    }

    fn bind_context(&self) -> Result<()> {
        self.inner.bind_context()
    }

    fn limits(&self) -> PlatformLimits {
        self.inner.limits()
    }

    fn name(&self) -> &'static str {
        "flaky-cpu"
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
