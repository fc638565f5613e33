//! Mesh-shaped device buffers
//!
//! A [`FieldBuffer`] is a device allocation laid out as `components` planes of
//! `nx·ny·nz` elements each, x fastest. It is a descriptor: the handle it holds
//! is owned by whichever collaborator allocated it, and only that owner frees
//! it.

use crate::error::{Error, Result};
use crate::mesh::Mesh;
use fieldgrid_backends::{Backend, BackendError, BufferHandle};
use fieldgrid_tracing::performance::{record_allocation, record_transfer};
use fieldgrid_tracing::{perf_span, timed_block};
use rayon::prelude::*;

/// Device buffer tied to a grid shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldBuffer {
    name: String,
    components: usize,
    size: [usize; 3],
    element_bytes: usize,
    handle: BufferHandle,
}

impl FieldBuffer {
    /// Allocate a zeroed buffer for `components × size` elements of
    /// `element_bytes` each.
    ///
    /// # Errors
    ///
    /// `ResourceExhaustion` naming `name` when the device is out of memory
    /// or the byte count does not fit a `usize`.
    #[tracing::instrument(skip(backend))]
    pub fn allocate(
        backend: &mut dyn Backend,
        name: &str,
        components: usize,
        size: [usize; 3],
        element_bytes: usize,
    ) -> Result<Self> {
        let name = name.to_string();
        let bytes = byte_count(components, size, element_bytes).ok_or_else(|| {
            let reason = format!("{components} x {size:?} x {element_bytes} bytes overflows");
            Error::allocation(name.clone(), BackendError::out_of_memory(usize::MAX, reason))
        })?;

        let span = perf_span!("buffer_allocate", bytes = bytes);
        let handle = backend
            .allocate_buffer(bytes)
            .map_err(|e| Error::allocation(name.clone(), e))?;

        record_allocation(bytes, &name, span.elapsed_us());

        Ok(Self {
            name,
            components,
            size,
            element_bytes,
            handle,
        })
    }

    /// Allocate a buffer shaped like `mesh`
    pub fn for_mesh(
        backend: &mut dyn Backend,
        name: &str,
        mesh: &Mesh,
        components: usize,
        element_bytes: usize,
    ) -> Result<Self> {
        Self::allocate(backend, name, components, mesh.size(), element_bytes)
    }

    /// Release the allocation. Never fails; a refused free is logged.
    pub fn free(self, backend: &mut dyn Backend) {
        match backend.free_buffer(self.handle) {
            Ok(()) => tracing::debug!(name = %self.name, buffer = %self.handle, "buffer_freed"),
            Err(e) => tracing::warn!(name = %self.name, buffer = %self.handle, error = %e, "failed to free buffer"),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn components(&self) -> usize {
        self.components
    }

    pub fn size(&self) -> [usize; 3] {
        self.size
    }

    pub fn element_bytes(&self) -> usize {
        self.element_bytes
    }

    /// Cells per component plane
    pub fn n_cells(&self) -> usize {
        self.size.iter().product()
    }

    /// Total element count
    pub fn len(&self) -> usize {
        self.components * self.n_cells()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn size_bytes(&self) -> usize {
        self.len() * self.element_bytes
    }

    /// Whether this buffer matches `mesh`'s cell counts
    pub fn fits(&self, mesh: &Mesh) -> bool {
        self.size == mesh.size()
    }

    fn check_element<T>(&self) -> Result<()> {
        if std::mem::size_of::<T>() != self.element_bytes {
            return Err(Error::BufferSizeMismatch {
                expected: self.element_bytes,
                actual: std::mem::size_of::<T>(),
            });
        }
        Ok(())
    }

    /// Copy the whole buffer from host memory (H2D)
    #[tracing::instrument(skip(self, backend, src), fields(
        name = %self.name,
        buffer = %self.handle,
        elements = src.len(),
        bytes = std::mem::size_of_val(src),
    ))]
    pub fn upload<T: bytemuck::Pod>(&self, backend: &mut dyn Backend, src: &[T]) -> Result<()> {
        self.check_element::<T>()?;
        if src.len() != self.len() {
            return Err(Error::BufferSizeMismatch {
                expected: self.len(),
                actual: src.len(),
            });
        }

        let (copied, duration_us) = timed_block!("buffer_upload", {
            backend.copy_to_buffer(self.handle, bytemuck::cast_slice(src))
        });
        copied?;
        record_transfer(std::mem::size_of_val(src), "H2D", duration_us);
        Ok(())
    }

    /// Copy the whole buffer into host memory (D2H)
    #[tracing::instrument(skip(self, backend, dst), fields(
        name = %self.name,
        buffer = %self.handle,
        elements = self.len(),
        bytes = self.size_bytes(),
    ))]
    pub fn download<T: bytemuck::Pod>(&self, backend: &mut dyn Backend, dst: &mut [T]) -> Result<()> {
        self.check_element::<T>()?;
        if dst.len() != self.len() {
            return Err(Error::BufferSizeMismatch {
                expected: self.len(),
                actual: dst.len(),
            });
        }

        let bytes = std::mem::size_of_val(dst);
        let (copied, duration_us) = timed_block!("buffer_download", {
            backend.copy_from_buffer(self.handle, bytemuck::cast_slice_mut(dst))
        });
        copied?;
        record_transfer(bytes, "D2H", duration_us);
        Ok(())
    }

    /// Download into a fresh vector
    pub fn to_vec<T: bytemuck::Pod>(&self, backend: &mut dyn Backend) -> Result<Vec<T>> {
        let mut out = vec![T::zeroed(); self.len()];
        self.download(backend, &mut out)?;
        Ok(out)
    }
}

/// `components · nx·ny·nz · element_bytes`, or `None` on overflow
fn byte_count(components: usize, size: [usize; 3], element_bytes: usize) -> Option<usize> {
    size.iter()
        .try_fold(components, |acc, &n| acc.checked_mul(n))?
        .checked_mul(element_bytes)
}

/// Nearest-neighbour resampling of `components` planes from grid `from` onto
/// grid `to`.
///
/// Destination cell `i` along an axis takes source cell
/// `floor((i + 0.5) · n_from / n_to)`.
pub fn resample<T: Copy + Send + Sync>(src: &[T], components: usize, from: [usize; 3], to: [usize; 3]) -> Vec<T> {
    let from_cells: usize = from.iter().product();
    let to_cells: usize = to.iter().product();
    debug_assert_eq!(src.len(), components * from_cells);

    let map_axis = |axis: usize| -> Vec<usize> {
        (0..to[axis])
            .map(|i| {
                let j = ((i as f64 + 0.5) * from[axis] as f64 / to[axis] as f64) as usize;
                j.min(from[axis] - 1)
            })
            .collect()
    };
    let (mx, my, mz) = (map_axis(0), map_axis(1), map_axis(2));

    (0..components * to_cells)
        .into_par_iter()
        .map(|index| {
            let c = index / to_cells;
            let cell = index % to_cells;
            let ix = cell % to[0];
            let iy = (cell / to[0]) % to[1];
            let iz = cell / (to[0] * to[1]);
            let source = (mz[iz] * from[1] + my[iy]) * from[0] + mx[ix];
            src[c * from_cells + source]
        })
        .collect()
}
