use crate::buffer::FieldBuffer;
use crate::error::{Error, Result};
use crate::mesh::Mesh;
use fieldgrid_backends::{Backend, BufferHandle};
use std::fmt;

/// Mesh-dependent convolution kernels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelKind {
    /// Demagnetizing-field kernel
    Demag,
    /// Magnetic-force-microscopy kernel
    Mfm,
}

impl fmt::Display for KernelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Demag => f.write_str("demag_kernel"),
            Self::Mfm => f.write_str("mfm_kernel"),
        }
    }
}

/// Host-side kernel contents produced by a kernel builder
#[derive(Debug, Clone, PartialEq)]
pub struct KernelData {
    pub size: [usize; 3],
    pub components: usize,
    pub data: Vec<f32>,
}

/// Lazily built kernels, valid for exactly one mesh
///
/// Any mesh change (including PBC) invalidates both kernels; they are rebuilt
/// on the next [`KernelCache::get_or_build`].
#[derive(Debug, Default)]
pub struct KernelCache {
    demag: Option<FieldBuffer>,
    mfm: Option<FieldBuffer>,
}

impl KernelCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, kind: KernelKind) -> &mut Option<FieldBuffer> {
        match kind {
            KernelKind::Demag => &mut self.demag,
            KernelKind::Mfm => &mut self.mfm,
        }
    }

    pub fn is_built(&self, kind: KernelKind) -> bool {
        match kind {
            KernelKind::Demag => self.demag.is_some(),
            KernelKind::Mfm => self.mfm.is_some(),
        }
    }

    /// Return the kernel buffer for `kind`, running `build` and uploading its
    /// output the first time.
    pub fn get_or_build<F>(
        &mut self,
        kind: KernelKind,
        backend: &mut dyn Backend,
        mesh: &Mesh,
        build: F,
    ) -> Result<BufferHandle>
    where
        F: FnOnce(&Mesh) -> KernelData,
    {
        if let Some(kernel) = self.slot(kind) {
            return Ok(kernel.handle());
        }

        let kernel = build(mesh);
        let expected = kernel.components * kernel.size.iter().product::<usize>();
        if kernel.data.len() != expected {
            return Err(Error::BufferSizeMismatch {
                expected,
                actual: kernel.data.len(),
            });
        }

        let name = kind.to_string();
        let buffer = FieldBuffer::allocate(backend, &name, kernel.components, kernel.size, 4)?;
        if let Err(e) = buffer.upload(backend, &kernel.data) {
            buffer.free(backend);
            return Err(e);
        }
        tracing::debug!(kernel = %kind, size = ?kernel.size, "kernel_built");

        let handle = buffer.handle();
        *self.slot(kind) = Some(buffer);
        Ok(handle)
    }

    /// Free every built kernel; returns how many were freed.
    pub fn free(&mut self, backend: &mut dyn Backend) -> usize {
        [self.demag.take(), self.mfm.take()]
            .into_iter()
            .flatten()
            .map(|kernel| kernel.free(backend))
            .count()
    }
}
