use crate::buffer::{resample, FieldBuffer};
use crate::error::Result;
use crate::mesh::Mesh;
use fieldgrid_backends::Backend;

/// A per-cell device field that follows the mesh shape
///
/// `T` is the element type (`f32` for magnetization, `u8` for region
/// indices). On resize the contents are carried over by nearest-neighbour
/// resampling.
#[derive(Debug)]
pub struct MeshField<T> {
    name: &'static str,
    components: usize,
    buffer: Option<FieldBuffer>,
    _element: std::marker::PhantomData<T>,
}

impl<T: bytemuck::Pod + Send + Sync> MeshField<T> {
    pub fn new(name: &'static str, components: usize) -> Self {
        Self {
            name,
            components,
            buffer: None,
            _element: std::marker::PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn components(&self) -> usize {
        self.components
    }

    pub fn buffer(&self) -> Option<&FieldBuffer> {
        self.buffer.as_ref()
    }

    pub fn is_allocated(&self) -> bool {
        self.buffer.is_some()
    }

    /// Allocate a zeroed buffer for `mesh`, replacing any previous one.
    pub fn alloc(&mut self, backend: &mut dyn Backend, mesh: &Mesh) -> Result<()> {
        self.release(backend);
        let buffer = FieldBuffer::for_mesh(backend, self.name, mesh, self.components, std::mem::size_of::<T>())?;
        self.buffer = Some(buffer);
        Ok(())
    }

    /// Move the field onto `mesh`, resampling its contents.
    ///
    /// The old buffer is freed before the new one is allocated so peak device
    /// usage stays at one copy; if any step fails the field is left
    /// unallocated and nothing stays on the device.
    pub fn resize(&mut self, backend: &mut dyn Backend, mesh: &Mesh) -> Result<()> {
        let Some(old) = self.buffer.take() else {
            return self.alloc(backend, mesh);
        };

        let backup: Vec<T> = match old.to_vec(backend) {
            Ok(backup) => backup,
            Err(e) => {
                old.free(backend);
                return Err(e);
            }
        };
        let from = old.size();
        old.free(backend);

        let buffer = FieldBuffer::for_mesh(backend, self.name, mesh, self.components, std::mem::size_of::<T>())?;
        let data = resample(&backup, self.components, from, mesh.size());
        if let Err(e) = buffer.upload(backend, &data) {
            buffer.free(backend);
            return Err(e);
        }
        self.buffer = Some(buffer);

        tracing::debug!(field = self.name, from = ?from, to = ?mesh.size(), "field_resampled");
        Ok(())
    }

    /// Free the buffer if there is one; returns whether anything was freed.
    pub fn release(&mut self, backend: &mut dyn Backend) -> bool {
        match self.buffer.take() {
            Some(buffer) => {
                buffer.free(backend);
                true
            }
            None => false,
        }
    }

    /// Overwrite the whole field
    pub fn write(&self, backend: &mut dyn Backend, data: &[T]) -> Result<()> {
        self.allocated()?.upload(backend, data)
    }

    /// Read the whole field
    pub fn read(&self, backend: &mut dyn Backend) -> Result<Vec<T>> {
        self.allocated()?.to_vec(backend)
    }

    fn allocated(&self) -> Result<&FieldBuffer> {
        self.buffer
            .as_ref()
            .ok_or_else(|| crate::error::Error::Precondition(format!("{} is not allocated", self.name)))
    }
}
