use super::{ChunkCursor, DeviceChannel, Direction, HostChannel, StopSignal, TransferStats};
use crate::error::{Error, Result};
use crate::SharedBackend;
use fieldgrid_backends::StreamHandle;
use fieldgrid_tracing::performance::record_transfer;
use fieldgrid_tracing::timed_block;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Moves one field between a host ring and a device ring, one fenced chunk at
/// a time
///
/// Uploads read from the host ring and write the device ring; downloads do
/// the reverse. Both rings must describe the same field with the same chunk
/// length.
pub struct TransferPipeline {
    name: String,
    direction: Direction,
    backend: SharedBackend,
    host: Arc<HostChannel>,
    device: Arc<DeviceChannel>,
}

impl std::fmt::Debug for TransferPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferPipeline")
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("elements", &self.host.len())
            .field("chunk_len", &self.host.chunk_len())
            .finish_non_exhaustive()
    }
}

impl TransferPipeline {
    /// Host → device pipeline
    pub fn uploader(
        name: impl Into<String>,
        backend: SharedBackend,
        host: Arc<HostChannel>,
        device: Arc<DeviceChannel>,
    ) -> Result<Self> {
        Self::new(name.into(), Direction::Upload, backend, host, device)
    }

    /// Device → host pipeline
    pub fn downloader(
        name: impl Into<String>,
        backend: SharedBackend,
        host: Arc<HostChannel>,
        device: Arc<DeviceChannel>,
    ) -> Result<Self> {
        Self::new(name.into(), Direction::Download, backend, host, device)
    }

    fn new(
        name: String,
        direction: Direction,
        backend: SharedBackend,
        host: Arc<HostChannel>,
        device: Arc<DeviceChannel>,
    ) -> Result<Self> {
        if host.len() != device.len() {
            return Err(Error::BufferSizeMismatch {
                expected: device.len(),
                actual: host.len(),
            });
        }
        if host.chunk_len() != device.chunk_len() {
            return Err(Error::Transfer(format!(
                "{name}: host chunks of {} elements cannot pair with device chunks of {}",
                host.chunk_len(),
                device.chunk_len()
            )));
        }
        Ok(Self {
            name,
            direction,
            backend,
            host,
            device,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    fn cursors(&self) -> (&ChunkCursor, &ChunkCursor) {
        match self.direction {
            Direction::Upload => (self.host.cursor(), self.device.cursor()),
            Direction::Download => (self.device.cursor(), self.host.cursor()),
        }
    }

    /// Run on the calling thread until `stop` is raised or a chunk fails.
    #[tracing::instrument(skip_all, fields(pipeline = %self.name, direction = %self.direction))]
    pub fn run(&self, stop: &StopSignal) -> Result<TransferStats> {
        self.backend.read().bind_context()?;
        let stream = self.backend.write().create_stream()?;
        tracing::debug!(stream = %stream, chunk_len = self.host.chunk_len(), "transfer_pipeline_started");

        let result = self.pump(stream, stop);

        if let Err(e) = self.backend.write().destroy_stream(stream) {
            tracing::warn!(stream = %stream, error = %e, "failed to destroy transfer stream");
        }
        match &result {
            Ok(stats) => tracing::info!(
                chunks = stats.chunks,
                elements = stats.elements,
                "transfer pipeline stopped"
            ),
            Err(e) => tracing::error!(error = %e, "transfer pipeline failed"),
        }
        result
    }

    fn pump(&self, stream: StreamHandle, stop: &StopSignal) -> Result<TransferStats> {
        let (source, dest) = self.cursors();
        let mut stats = TransferStats::default();

        loop {
            let Some(read) = source.acquire_read(stop) else {
                break;
            };
            let Some(write) = dest.acquire_write(stop) else {
                source.abandon_read(read);
                break;
            };

            let (host_slot, device_slot) = match self.direction {
                Direction::Upload => (read.slot, write.slot),
                Direction::Download => (write.slot, read.slot),
            };
            let elements = match self.copy_chunk(stream, host_slot, device_slot) {
                Ok(elements) => elements,
                Err(e) => {
                    dest.abandon_write(write);
                    source.abandon_read(read);
                    return Err(e);
                }
            };
            stats.synchronizations += 1;

            dest.release_write(write)?;
            source.release_read(read)?;
            stats.chunks += 1;
            stats.elements += elements as u64;

            tracing::debug!(seq = read.seq, slot = read.slot, elements = elements, "chunk_transferred");
        }

        Ok(stats)
    }

    /// Copy one chunk on `stream` and fence it; returns the element count.
    fn copy_chunk(&self, stream: StreamHandle, host_slot: usize, device_slot: usize) -> Result<usize> {
        let elements = self.host.slot_len(host_slot);
        let device_elements = self.device.slot_len(device_slot);
        if elements != device_elements {
            return Err(Error::BufferSizeMismatch {
                expected: device_elements,
                actual: elements,
            });
        }

        let handle = self.device.buffer().handle();
        let offset = self.device.byte_offset(device_slot);

        let (fenced, duration_us) = timed_block!("chunk_copy", {
            // The host slot stays locked until the fence so the copy never sees it change.
            let mut host = self.host.slot(host_slot).lock();
            let enqueued = {
                let mut backend = self.backend.write();
                match self.direction {
                    Direction::Upload => {
                        backend.copy_to_buffer_async(handle, offset, bytemuck::cast_slice(host.as_slice()), stream)
                    }
                    Direction::Download => backend.copy_from_buffer_async(
                        handle,
                        offset,
                        bytemuck::cast_slice_mut(host.as_mut_slice()),
                        stream,
                    ),
                }
            };
            enqueued.and_then(|()| self.backend.write().synchronize_stream(stream))
        });
        fenced?;

        record_transfer(elements * std::mem::size_of::<f32>(), self.direction.label(), duration_us);
        Ok(elements)
    }

    /// Run on a dedicated thread named `{direction}-{name}`.
    pub fn spawn(self) -> Result<TransferWorker> {
        let stop = StopSignal::new();
        let name = self.name.clone();
        let direction = self.direction;

        let worker_stop = stop.clone();
        let handle = thread::Builder::new()
            .name(format!("{direction}-{name}"))
            .spawn(move || self.run(&worker_stop))
            .map_err(|e| Error::Transfer(format!("failed to spawn {name} worker: {e}")))?;

        Ok(TransferWorker {
            name,
            direction,
            stop,
            handle: Some(handle),
        })
    }
}

/// Handle to a running pipeline thread
///
/// Dropping the handle stops the worker and waits for it.
#[derive(Debug)]
pub struct TransferWorker {
    name: String,
    direction: Direction,
    stop: StopSignal,
    handle: Option<JoinHandle<Result<TransferStats>>>,
}

impl TransferWorker {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Ask the worker to exit at its next chunk boundary.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the worker to exit on its own (after [`Self::stop`] or a failure).
    pub fn join(mut self) -> Result<TransferStats> {
        self.wait()
    }

    /// Stop the worker and wait for it.
    pub fn shutdown(self) -> Result<TransferStats> {
        self.stop();
        self.join()
    }

    fn wait(&mut self) -> Result<TransferStats> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| Error::Transfer(format!("{} worker panicked", self.name)))?,
            None => Ok(TransferStats::default()),
        }
    }
}

impl Drop for TransferWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
            if let Err(e) = self.wait() {
                tracing::warn!(pipeline = %self.name, error = %e, "transfer worker ended with an error");
            }
        }
    }
}
