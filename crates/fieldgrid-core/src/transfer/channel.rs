use super::{ChunkCursor, StopSignal};
use crate::buffer::FieldBuffer;
use crate::error::{Error, Result};
use crate::SharedBackend;
use fieldgrid_backends::{Backend, StreamHandle};
use parking_lot::Mutex;

const ELEMENT_BYTES: usize = std::mem::size_of::<f32>();

fn slot_count(len: usize, chunk_len: usize) -> Result<usize> {
    if chunk_len == 0 {
        return Err(Error::Transfer("chunk length must be positive".into()));
    }
    if len == 0 {
        return Err(Error::Transfer("cannot stream an empty field".into()));
    }
    Ok(len.div_ceil(chunk_len))
}

/// Elements in `slot` of a field of `len` elements split into `chunk_len` chunks
fn slot_len(len: usize, chunk_len: usize, slot: usize) -> usize {
    let start = slot * chunk_len;
    chunk_len.min(len.saturating_sub(start))
}

// ================================================================================================
// Host side
// ================================================================================================

/// Host-side ring: one slot per chunk of the field, the last one possibly short
#[derive(Debug)]
pub struct HostChannel {
    len: usize,
    chunk_len: usize,
    slots: Vec<Mutex<Vec<f32>>>,
    cursor: ChunkCursor,
}

impl HostChannel {
    pub fn new(len: usize, chunk_len: usize) -> Result<Self> {
        let count = slot_count(len, chunk_len)?;
        let slots = (0..count)
            .map(|slot| Mutex::new(vec![0.0; slot_len(len, chunk_len, slot)]))
            .collect();
        Ok(Self {
            len,
            chunk_len,
            slots,
            cursor: ChunkCursor::new(count)?,
        })
    }

    /// Field length in elements
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn chunk_len(&self) -> usize {
        self.chunk_len
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_len(&self, slot: usize) -> usize {
        slot_len(self.len, self.chunk_len, slot)
    }

    pub fn cursor(&self) -> &ChunkCursor {
        &self.cursor
    }

    pub(crate) fn slot(&self, slot: usize) -> &Mutex<Vec<f32>> {
        &self.slots[slot]
    }

    /// Write the next chunk; `Ok(false)` if stopped before a slot freed up.
    pub fn write_chunk(&self, stop: &StopSignal, data: &[f32]) -> Result<bool> {
        let Some(ticket) = self.cursor.acquire_write(stop) else {
            return Ok(false);
        };
        let mut slot = self.slots[ticket.slot].lock();
        if slot.len() != data.len() {
            drop(slot);
            self.cursor.abandon_write(ticket);
            return Err(Error::BufferSizeMismatch {
                expected: self.slot_len(ticket.slot),
                actual: data.len(),
            });
        }
        slot.copy_from_slice(data);
        drop(slot);
        self.cursor.release_write(ticket)?;
        Ok(true)
    }

    /// Read the next chunk; `Ok(None)` if stopped before one arrived.
    pub fn read_chunk(&self, stop: &StopSignal) -> Result<Option<Vec<f32>>> {
        let Some(ticket) = self.cursor.acquire_read(stop) else {
            return Ok(None);
        };
        let data = self.slots[ticket.slot].lock().clone();
        self.cursor.release_read(ticket)?;
        Ok(Some(data))
    }

    /// Write a whole field, chunk by chunk.
    pub fn write_all(&self, stop: &StopSignal, data: &[f32]) -> Result<bool> {
        if data.len() != self.len {
            return Err(Error::BufferSizeMismatch {
                expected: self.len,
                actual: data.len(),
            });
        }
        for chunk in data.chunks(self.chunk_len) {
            if !self.write_chunk(stop, chunk)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Read a whole field, chunk by chunk.
    pub fn read_all(&self, stop: &StopSignal) -> Result<Option<Vec<f32>>> {
        let mut out = Vec::with_capacity(self.len);
        for _ in 0..self.slots.len() {
            match self.read_chunk(stop)? {
                Some(chunk) => out.extend_from_slice(&chunk),
                None => return Ok(None),
            }
        }
        Ok(Some(out))
    }
}

// ================================================================================================
// Device side
// ================================================================================================

/// Device-side ring laid over an `f32` field buffer
///
/// Slot `i` is the byte range of chunk `i` within the buffer. The buffer is
/// borrowed: whoever owns it must stop every pipeline using this channel
/// before freeing it.
#[derive(Debug)]
pub struct DeviceChannel {
    buffer: FieldBuffer,
    chunk_len: usize,
    cursor: ChunkCursor,
}

impl DeviceChannel {
    pub fn new(buffer: FieldBuffer, chunk_len: usize) -> Result<Self> {
        if buffer.element_bytes() != ELEMENT_BYTES {
            return Err(Error::BufferSizeMismatch {
                expected: ELEMENT_BYTES,
                actual: buffer.element_bytes(),
            });
        }
        let count = slot_count(buffer.len(), chunk_len)?;
        Ok(Self {
            buffer,
            chunk_len,
            cursor: ChunkCursor::new(count)?,
        })
    }

    pub fn buffer(&self) -> &FieldBuffer {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn chunk_len(&self) -> usize {
        self.chunk_len
    }

    pub fn slot_count(&self) -> usize {
        self.cursor.slots()
    }

    pub fn slot_len(&self, slot: usize) -> usize {
        slot_len(self.buffer.len(), self.chunk_len, slot)
    }

    pub fn byte_offset(&self, slot: usize) -> usize {
        slot * self.chunk_len * ELEMENT_BYTES
    }

    pub fn cursor(&self) -> &ChunkCursor {
        &self.cursor
    }

    /// Produce the next device chunk from host data (e.g. a kernel's output).
    pub fn write_chunk(&self, backend: &SharedBackend, stop: &StopSignal, data: &[f32]) -> Result<bool> {
        let Some(ticket) = self.cursor.acquire_write(stop) else {
            return Ok(false);
        };
        if data.len() != self.slot_len(ticket.slot) {
            self.cursor.abandon_write(ticket);
            return Err(Error::BufferSizeMismatch {
                expected: self.slot_len(ticket.slot),
                actual: data.len(),
            });
        }

        let offset = self.byte_offset(ticket.slot);
        let handle = self.buffer.handle();
        let copied = fenced(backend, |device, stream| {
            device.copy_to_buffer_async(handle, offset, bytemuck::cast_slice(data), stream)
        });
        if let Err(e) = copied {
            self.cursor.abandon_write(ticket);
            return Err(e);
        }
        self.cursor.release_write(ticket)?;
        Ok(true)
    }

    /// Consume the next device chunk into host memory.
    pub fn read_chunk(&self, backend: &SharedBackend, stop: &StopSignal) -> Result<Option<Vec<f32>>> {
        let Some(ticket) = self.cursor.acquire_read(stop) else {
            return Ok(None);
        };

        let mut data = vec![0.0f32; self.slot_len(ticket.slot)];
        let offset = self.byte_offset(ticket.slot);
        let handle = self.buffer.handle();
        let copied = fenced(backend, |device, stream| {
            device.copy_from_buffer_async(handle, offset, bytemuck::cast_slice_mut(data.as_mut_slice()), stream)
        });
        if let Err(e) = copied {
            self.cursor.abandon_read(ticket);
            return Err(e);
        }
        self.cursor.release_read(ticket)?;
        Ok(Some(data))
    }
}

/// Run `op` on a short-lived stream and fence it before returning.
fn fenced<R>(
    backend: &SharedBackend,
    op: impl FnOnce(&mut dyn Backend, StreamHandle) -> fieldgrid_backends::Result<R>,
) -> Result<R> {
    let mut guard = backend.write();
    let device: &mut dyn Backend = &mut **guard;
    let stream = device.create_stream()?;

    let result = op(&mut *device, stream).and_then(|value| {
        device.synchronize_stream(stream)?;
        Ok(value)
    });
    if let Err(e) = device.destroy_stream(stream) {
        tracing::warn!(stream = %stream, error = %e, "failed to destroy stream");
    }
    Ok(result?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldgrid_backends::CpuBackend;

    #[test]
    fn slots_cover_field_with_short_tail() {
        let channel = HostChannel::new(40, 16).unwrap();
        assert_eq!(channel.slot_count(), 3);
        assert_eq!(
            (0..3).map(|s| channel.slot_len(s)).collect::<Vec<_>>(),
            vec![16, 16, 8]
        );
    }

    #[test]
    fn zero_sizes_are_rejected() {
        assert!(matches!(HostChannel::new(0, 16), Err(Error::Transfer(_))));
        assert!(matches!(HostChannel::new(16, 0), Err(Error::Transfer(_))));
    }

    #[test]
    fn host_write_then_read_whole_field() {
        let channel = HostChannel::new(10, 4).unwrap();
        let stop = StopSignal::new();
        let data: Vec<f32> = (0..10).map(|i| i as f32).collect();

        assert!(channel.write_all(&stop, &data).unwrap());
        assert_eq!(channel.read_all(&stop).unwrap(), Some(data));
        assert_eq!(channel.cursor().consumed(), 3);
    }

    #[test]
    fn host_chunk_of_wrong_length_is_not_produced() {
        let channel = HostChannel::new(8, 4).unwrap();
        let stop = StopSignal::new();
        assert!(channel.write_chunk(&stop, &[1.0; 3]).is_err());
        assert_eq!(channel.cursor().produced(), 0);
        assert!(channel.write_chunk(&stop, &[1.0; 4]).unwrap());
    }

    #[test]
    fn stopped_host_read_returns_none() {
        let channel = HostChannel::new(4, 4).unwrap();
        let stop = StopSignal::new();
        stop.stop();
        assert_eq!(channel.read_chunk(&stop).unwrap(), None);
        assert!(!channel.write_chunk(&stop, &[0.0; 4]).unwrap());
    }

    #[test]
    fn device_chunks_land_at_their_offsets() {
        let cpu = CpuBackend::new();
        let backend = crate::shared(cpu.clone());
        let buffer = {
            let mut device = backend.write();
            FieldBuffer::allocate(&mut **device, "m", 1, [6, 1, 1], 4).unwrap()
        };
        let channel = DeviceChannel::new(buffer.clone(), 4).unwrap();
        let stop = StopSignal::new();

        assert_eq!(channel.byte_offset(1), 16);
        assert!(channel.write_chunk(&backend, &stop, &[1.0, 2.0, 3.0, 4.0]).unwrap());
        assert!(channel.write_chunk(&backend, &stop, &[5.0, 6.0]).unwrap());

        let contents: Vec<f32> = buffer.to_vec(&mut **backend.write()).unwrap();
        assert_eq!(contents, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        assert_eq!(channel.read_chunk(&backend, &stop).unwrap(), Some(vec![1.0, 2.0, 3.0, 4.0]));
        assert_eq!(channel.read_chunk(&backend, &stop).unwrap(), Some(vec![5.0, 6.0]));
        assert_eq!(cpu.stats().synchronizations, 4);
        assert_eq!(cpu.stream_count(), 0);
    }

    #[test]
    fn device_channel_requires_f32_buffer() {
        let mut cpu = CpuBackend::new();
        let regions = FieldBuffer::allocate(&mut cpu, "regions", 1, [4, 1, 1], 1).unwrap();
        assert!(matches!(
            DeviceChannel::new(regions, 2),
            Err(Error::BufferSizeMismatch { expected: 4, actual: 1 })
        ));
    }
}
