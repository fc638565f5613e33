//! Mesh-shaped device resources and the resize transaction
//!
//! [`BufferLifecycleManager`] owns every device buffer whose size follows the
//! mesh: magnetization, region indices, the geometry mask, extra-term masks
//! of the excitations, thermal noise, convolution kernels and the scratch
//! pool. The registry drives it; nothing here decides *whether* to resize.

use crate::collaborators::{DroppedTerm, Excitation, Geometry, KernelCache, MeshField, ThermalNoise};
use crate::error::Result;
use crate::mesh::Mesh;
use fieldgrid_backends::{Backend, BufferPool};
use fieldgrid_tracing::perf_span;
use fieldgrid_tracing::performance::record_resize;
use serde::Serialize;

/// What a resize transaction did
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResizeReport {
    pub old: Mesh,
    pub new: Mesh,
    pub size_changed: bool,
    pub cell_size_changed: bool,
    /// Convolution kernels released
    pub freed_kernels: usize,
    /// Scratch pool buffers released
    pub freed_pool_buffers: usize,
    /// Buffers allocated again at the new shape
    pub reallocated: usize,
    pub dropped_terms: Vec<DroppedTerm>,
    pub noise_released: bool,
    /// Transfer pipelines stopped before the transaction (filled by the registry)
    pub stopped_pipelines: Vec<String>,
    pub duration_us: u64,
}

impl ResizeReport {
    fn new(old: Mesh, new: Mesh, size_changed: bool, cell_size_changed: bool) -> Self {
        Self {
            old,
            new,
            size_changed,
            cell_size_changed,
            freed_kernels: 0,
            freed_pool_buffers: 0,
            reallocated: 0,
            dropped_terms: Vec::new(),
            noise_released: false,
            stopped_pipelines: Vec::new(),
            duration_us: 0,
        }
    }

    /// Whether shape-dependent buffers were touched
    pub fn shape_changed(&self) -> bool {
        self.size_changed || self.cell_size_changed
    }

    fn freed(&self) -> usize {
        let shape = if self.shape_changed() { 2 } else { 0 };
        self.freed_kernels
            + self.freed_pool_buffers
            + shape
            + self.dropped_terms.len()
            + usize::from(self.noise_released)
    }
}

/// Owner of all mesh-shaped device resources
#[derive(Debug)]
pub struct BufferLifecycleManager {
    magnetization: MeshField<f32>,
    regions: MeshField<u8>,
    geometry: Geometry,
    b_ext: Excitation,
    j: Excitation,
    thermal: ThermalNoise,
    kernels: KernelCache,
    pool: BufferPool,
}

impl Default for BufferLifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferLifecycleManager {
    pub fn new() -> Self {
        Self {
            magnetization: MeshField::new("magnetization", 3),
            regions: MeshField::new("regions", 1),
            geometry: Geometry::new(),
            b_ext: Excitation::new("B_ext"),
            j: Excitation::new("J"),
            thermal: ThermalNoise::new(),
            kernels: KernelCache::new(),
            pool: BufferPool::new(),
        }
    }

    // ============================================================================================
    // Transitions
    // ============================================================================================

    /// Allocate magnetization and region buffers for the first mesh.
    #[tracing::instrument(skip_all, fields(mesh = %mesh))]
    pub fn allocate_for_new_mesh(&mut self, backend: &mut dyn Backend, mesh: &Mesh) -> Result<()> {
        let span = perf_span!("allocate_for_new_mesh", cells = mesh.n_cells());
        self.magnetization.alloc(backend, mesh)?;
        self.regions.alloc(backend, mesh)?;
        record_resize(0, 2, span.elapsed_us());
        Ok(())
    }

    /// Bring every resource in line with `new`.
    ///
    /// Kernels and the scratch pool are always released. Shape-dependent
    /// buffers are rebuilt only when `size_changed || cell_size_changed`;
    /// in that case every extra term is dropped and reported.
    #[tracing::instrument(skip_all, fields(
        old = %old,
        new = %new,
        size_changed = size_changed,
        cell_size_changed = cell_size_changed,
    ))]
    pub fn resize_transaction(
        &mut self,
        backend: &mut dyn Backend,
        old: &Mesh,
        new: &Mesh,
        size_changed: bool,
        cell_size_changed: bool,
    ) -> Result<ResizeReport> {
        let span = perf_span!("resize_transaction");
        let mut report = ResizeReport::new(*old, *new, size_changed, cell_size_changed);
        tracing::info!(from = %old, to = %new, "resizing");

        report.freed_kernels = self.kernels.free(backend);
        report.freed_pool_buffers = self.pool.free_all(backend);

        if report.shape_changed() {
            self.magnetization.resize(backend, new)?;
            self.regions.resize(backend, new)?;
            report.reallocated = 2;

            self.geometry.rebuild(backend, new)?;
            if !self.geometry.is_nil() {
                report.reallocated += 1;
            }

            report.dropped_terms = self.b_ext.remove_extra_terms(backend);
            report.dropped_terms.extend(self.j.remove_extra_terms(backend));
            for dropped in &report.dropped_terms {
                tracing::warn!(
                    quantity = %dropped.quantity,
                    term = %dropped.term,
                    size = ?dropped.size,
                    "extra term removed by resize; re-add it for the new mesh"
                );
            }

            report.noise_released = self.thermal.release(backend);
        }

        report.duration_us = span.elapsed_us();
        record_resize(report.freed(), report.reallocated, report.duration_us);
        Ok(report)
    }

    /// Free everything; returns the number of buffers released.
    pub fn release_all(&mut self, backend: &mut dyn Backend) -> usize {
        let mut freed = self.kernels.free(backend) + self.pool.free_all(backend);
        freed += usize::from(self.magnetization.release(backend));
        freed += usize::from(self.regions.release(backend));
        freed += usize::from(self.geometry.release_mask(backend));
        freed += self.b_ext.remove_extra_terms(backend).len();
        freed += self.j.remove_extra_terms(backend).len();
        freed += usize::from(self.thermal.release(backend));
        tracing::debug!(freed = freed, "mesh_resources_released");
        freed
    }

    // ============================================================================================
    // Accessors
    // ============================================================================================

    pub fn magnetization(&self) -> &MeshField<f32> {
        &self.magnetization
    }

    pub fn regions(&self) -> &MeshField<u8> {
        &self.regions
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn geometry_mut(&mut self) -> &mut Geometry {
        &mut self.geometry
    }

    /// External field
    pub fn b_ext(&self) -> &Excitation {
        &self.b_ext
    }

    pub fn b_ext_mut(&mut self) -> &mut Excitation {
        &mut self.b_ext
    }

    /// Current density
    pub fn j(&self) -> &Excitation {
        &self.j
    }

    pub fn j_mut(&mut self) -> &mut Excitation {
        &mut self.j
    }

    pub fn thermal(&self) -> &ThermalNoise {
        &self.thermal
    }

    pub fn thermal_mut(&mut self) -> &mut ThermalNoise {
        &mut self.thermal
    }

    pub fn kernels(&self) -> &KernelCache {
        &self.kernels
    }

    pub fn kernels_mut(&mut self) -> &mut KernelCache {
        &mut self.kernels
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut BufferPool {
        &mut self.pool
    }
}
