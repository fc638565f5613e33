//! Memory manager for CPU backend
//!
//! Buffers live in host memory keyed by handle ID. Streams execute copies
//! eagerly; they only track how many operations were enqueued and how often
//! the stream was synchronized, so tests can observe stream discipline.

use crate::backend::{check_bounds, BufferHandle, StreamHandle};
use crate::error::{BackendError, Result};
use std::collections::HashMap;

/// Per-stream counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Copies enqueued since creation
    pub enqueued: u64,

    /// Copies enqueued since the last synchronization
    pub pending: u64,

    /// Completed synchronizations
    pub synchronizations: u64,
}

/// Counters for the whole backend, surviving stream destruction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuBackendStats {
    pub allocations: u64,
    pub frees: u64,
    pub failed_allocations: u64,
    pub async_copies: u64,
    pub synchronizations: u64,
    pub streams_created: u64,
    pub streams_destroyed: u64,
    pub context_bindings: u64,
}

/// Memory manager for CPU backend
pub struct MemoryManager {
    /// Buffers storage
    buffers: HashMap<u64, Vec<u8>>,

    /// Live streams
    streams: HashMap<u64, StreamStats>,

    /// Optional cap on total allocated bytes
    capacity: Option<usize>,

    /// Bytes currently allocated
    allocated: usize,

    /// Next buffer handle ID
    next_buffer_id: u64,

    /// Next stream handle ID
    next_stream_id: u64,

    stats: CpuBackendStats,
}

impl MemoryManager {
    /// Create an unbounded memory manager
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    /// Create a memory manager that refuses allocations past `capacity` bytes
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            buffers: HashMap::new(),
            streams: HashMap::new(),
            capacity,
            allocated: 0,
            next_buffer_id: 1,
            next_stream_id: 1,
            stats: CpuBackendStats::default(),
        }
    }

    // ============================================================================================
    // Buffer Management
    // ============================================================================================

    pub fn allocate_buffer(&mut self, size: usize) -> Result<BufferHandle> {
        if let Some(capacity) = self.capacity {
            let available = capacity.saturating_sub(self.allocated);
            if size > available {
                self.stats.failed_allocations += 1;
                return Err(BackendError::out_of_memory(
                    size,
                    format!("{available} of {capacity} bytes available"),
                ));
            }
        }

        // Host allocation failure must surface as an error, not abort the process
        let mut bytes = Vec::new();
        if let Err(e) = bytes.try_reserve_exact(size) {
            self.stats.failed_allocations += 1;
            return Err(BackendError::out_of_memory(size, e.to_string()));
        }
        bytes.resize(size, 0u8);

        let handle = BufferHandle::new(self.next_buffer_id);
        self.next_buffer_id += 1;

        self.buffers.insert(handle.id(), bytes);
        self.allocated += size;
        self.stats.allocations += 1;

        Ok(handle)
    }

    pub fn free_buffer(&mut self, handle: BufferHandle) -> Result<()> {
        let buffer = self
            .buffers
            .remove(&handle.id())
            .ok_or(BackendError::InvalidBufferHandle(handle.id()))?;
        self.allocated -= buffer.len();
        self.stats.frees += 1;
        Ok(())
    }

    pub fn buffer_size(&self, handle: BufferHandle) -> Result<usize> {
        self.buffer(handle).map(Vec::len)
    }

    pub fn copy_to_buffer(&mut self, handle: BufferHandle, offset: usize, data: &[u8]) -> Result<()> {
        let buffer = self
            .buffers
            .get_mut(&handle.id())
            .ok_or(BackendError::InvalidBufferHandle(handle.id()))?;
        check_bounds(offset, data.len(), buffer.len())?;
        buffer[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn copy_from_buffer(&self, handle: BufferHandle, offset: usize, data: &mut [u8]) -> Result<()> {
        let buffer = self.buffer(handle)?;
        check_bounds(offset, data.len(), buffer.len())?;
        data.copy_from_slice(&buffer[offset..offset + data.len()]);
        Ok(())
    }

    fn buffer(&self, handle: BufferHandle) -> Result<&Vec<u8>> {
        self.buffers
            .get(&handle.id())
            .ok_or(BackendError::InvalidBufferHandle(handle.id()))
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn allocated_bytes(&self) -> usize {
        self.allocated
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn set_capacity(&mut self, capacity: Option<usize>) {
        self.capacity = capacity;
    }

    pub fn contains(&self, handle: BufferHandle) -> bool {
        self.buffers.contains_key(&handle.id())
    }

    // ============================================================================================
    // Streams
    // ============================================================================================

    pub fn create_stream(&mut self) -> StreamHandle {
        let stream = StreamHandle::new(self.next_stream_id);
        self.next_stream_id += 1;
        self.streams.insert(stream.id(), StreamStats::default());
        self.stats.streams_created += 1;
        stream
    }

    pub fn destroy_stream(&mut self, stream: StreamHandle) -> Result<()> {
        self.streams
            .remove(&stream.id())
            .ok_or(BackendError::InvalidStreamHandle(stream.id()))?;
        self.stats.streams_destroyed += 1;
        Ok(())
    }

    /// Record an operation enqueued on `stream`.
    pub fn enqueue(&mut self, stream: StreamHandle) -> Result<()> {
        let stats = self
            .streams
            .get_mut(&stream.id())
            .ok_or(BackendError::InvalidStreamHandle(stream.id()))?;
        stats.enqueued += 1;
        stats.pending += 1;
        self.stats.async_copies += 1;
        Ok(())
    }

    pub fn check_stream(&self, stream: StreamHandle) -> Result<()> {
        if self.streams.contains_key(&stream.id()) {
            Ok(())
        } else {
            Err(BackendError::InvalidStreamHandle(stream.id()))
        }
    }

    pub fn synchronize(&mut self, stream: StreamHandle) -> Result<()> {
        let stats = self
            .streams
            .get_mut(&stream.id())
            .ok_or(BackendError::InvalidStreamHandle(stream.id()))?;
        stats.pending = 0;
        stats.synchronizations += 1;
        self.stats.synchronizations += 1;
        Ok(())
    }

    pub fn stream_stats(&self, stream: StreamHandle) -> Option<StreamStats> {
        self.streams.get(&stream.id()).copied()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    // ============================================================================================
    // Statistics
    // ============================================================================================

    pub fn record_context_binding(&mut self) {
        self.stats.context_bindings += 1;
    }

    pub fn stats(&self) -> CpuBackendStats {
        self.stats
    }
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new()
    }
}
