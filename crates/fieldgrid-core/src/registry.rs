//! The mesh registry: single owner of the current mesh and everything shaped
//! by it
//!
//! All reconfiguration goes through [`MeshRegistry`]. A request is validated
//! before anything is touched, then applied under the registry lock with the
//! busy flag raised:
//!
//! - unset → set: allocate magnetization and regions
//! - same size, cell size and PBC: nothing happens
//! - PBC only: release kernels and the scratch pool
//! - size or cell size: stop attached transfer pipelines, then run the full
//!   resize transaction
//!
//! The new mesh is stored only after the transaction succeeds. A failed
//! transaction poisons the registry.

use crate::advisory::{check_smoothness, SmoothnessAdvisory};
use crate::config::{EngineConfig, LengthUnit, PendingConfig};
use crate::error::{Error, Result};
use crate::lifecycle::{BufferLifecycleManager, ResizeReport};
use crate::mesh::{Mesh, MeshParams};
use crate::transfer::{DeviceChannel, HostChannel, TransferStats, TransferWorker};
use crate::SharedBackend;
use fieldgrid_backends::{configure_1d, configure_3d, Backend, LaunchConfig};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const POISONED: &str = "mesh registry poisoned by a failed resize";

/// How a configuration request was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ApplyKind {
    /// First mesh; buffers allocated
    Initialized,
    /// Size or cell size changed; resize transaction ran
    Resized,
    /// Only repetition counts changed
    PbcUpdated,
    /// Identical to the current mesh
    Unchanged,
}

/// Result of a successful configuration request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplyOutcome {
    pub kind: ApplyKind,
    pub mesh: Mesh,
    pub advisories: Vec<SmoothnessAdvisory>,
    /// Present for `Resized` and `PbcUpdated`
    pub report: Option<ResizeReport>,
}

#[derive(Debug)]
struct RegistryState {
    mesh: Mesh,
    pending: PendingConfig,
    resources: BufferLifecycleManager,
    pipelines: Vec<TransferWorker>,
    poisoned: bool,
}

/// Raises the busy flag for the lifetime of the guard.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owner of the current mesh, pending configuration, mesh-shaped resources
/// and attached transfer pipelines
pub struct MeshRegistry {
    backend: SharedBackend,
    config: EngineConfig,
    state: Mutex<RegistryState>,
    busy: AtomicBool,
}

impl std::fmt::Debug for MeshRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshRegistry")
            .field("backend", &self.backend.read().name())
            .field("config", &self.config)
            .field("busy", &self.is_busy())
            .finish_non_exhaustive()
    }
}

impl MeshRegistry {
    /// Registry on the backend selected by `config`.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let backend = config.create_backend()?;
        Ok(Self::with_backend(backend, config))
    }

    /// Registry on an existing backend.
    pub fn with_backend(backend: SharedBackend, config: EngineConfig) -> Self {
        Self {
            backend,
            config,
            state: Mutex::new(RegistryState {
                mesh: Mesh::unset(),
                pending: PendingConfig::new(),
                resources: BufferLifecycleManager::new(),
                pipelines: Vec::new(),
                poisoned: false,
            }),
            busy: AtomicBool::new(false),
        }
    }

    pub fn backend(&self) -> SharedBackend {
        Arc::clone(&self.backend)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Whether a reconfiguration is in progress
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn is_poisoned(&self) -> bool {
        self.state.lock().poisoned
    }

    // ============================================================================================
    // Full configuration
    // ============================================================================================

    /// Set grid size, cell size (meters) and repetition counts in one call.
    pub fn set_mesh(&self, grid_size: [i64; 3], cell_size: [f64; 3], pbc: [i64; 3]) -> Result<ApplyOutcome> {
        self.apply_full(MeshParams::new(grid_size, cell_size, pbc))
    }

    /// Validate and apply a complete request.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if any value is out of range; nothing changes.
    /// - `Precondition` if an earlier transaction failed.
    /// - `ResourceExhaustion` if the device runs out of memory; the registry
    ///   is poisoned afterwards.
    #[tracing::instrument(skip_all, fields(
        grid_size = ?params.grid_size,
        cell_size = ?params.cell_size,
        pbc = ?params.pbc,
    ))]
    pub fn apply_full(&self, params: MeshParams) -> Result<ApplyOutcome> {
        let mesh = params.validate()?;
        let advisories = check_smoothness(mesh.size());

        let mut state = self.state.lock();
        if state.poisoned {
            return Err(Error::Precondition(POISONED.into()));
        }
        let _busy = BusyGuard::enter(&self.busy);
        let old = state.mesh;

        let (kind, report) = if old.is_unset() {
            self.initialize(&mut state, &mesh)?;
            (ApplyKind::Initialized, None)
        } else if old == mesh {
            tracing::debug!(mesh = %mesh, "mesh unchanged");
            (ApplyKind::Unchanged, None)
        } else {
            let size_changed = !old.same_size(&mesh);
            let cell_size_changed = !old.same_cell_size(&mesh);
            let report = self.resize(&mut state, &old, &mesh, size_changed, cell_size_changed)?;
            let kind = if report.shape_changed() {
                ApplyKind::Resized
            } else {
                ApplyKind::PbcUpdated
            };
            (kind, Some(report))
        };

        state.mesh = mesh;
        state.pending.record_applied(&params);

        Ok(ApplyOutcome {
            kind,
            mesh,
            advisories,
            report,
        })
    }

    fn initialize(&self, state: &mut RegistryState, mesh: &Mesh) -> Result<()> {
        let result = {
            let mut backend = self.backend.write();
            state.resources.allocate_for_new_mesh(&mut **backend, mesh)
        };
        if let Err(e) = result {
            state.poisoned = true;
            tracing::error!(error = %e, "initial mesh allocation failed");
            return Err(e);
        }
        tracing::info!(mesh = %mesh, "mesh initialized");
        Ok(())
    }

    fn resize(
        &self,
        state: &mut RegistryState,
        old: &Mesh,
        new: &Mesh,
        size_changed: bool,
        cell_size_changed: bool,
    ) -> Result<ResizeReport> {
        // Workers need the backend lock to finish their chunk; stop them first.
        let stopped = if size_changed || cell_size_changed {
            stop_pipelines(&mut state.pipelines)
        } else {
            Vec::new()
        };

        let result = {
            let mut backend = self.backend.write();
            state
                .resources
                .resize_transaction(&mut **backend, old, new, size_changed, cell_size_changed)
        };

        match result {
            Ok(mut report) => {
                report.stopped_pipelines = stopped;
                Ok(report)
            }
            Err(e) => {
                state.poisoned = true;
                tracing::error!(error = %e, from = %old, to = %new, "resize transaction failed");
                Err(e)
            }
        }
    }

    // ============================================================================================
    // Partial configuration
    // ============================================================================================

    /// Record the grid size; applies once the cell size is known too.
    pub fn set_grid_size(&self, grid_size: [i64; 3]) -> Result<Option<ApplyOutcome>> {
        let ready = {
            let mut state = self.state.lock();
            state.pending.set_grid_size(grid_size)?;
            state.pending.ready()
        };
        ready.map(|params| self.apply_full(params)).transpose()
    }

    /// Record the cell size in meters; applies once the grid size is known too.
    pub fn set_cell_size(&self, cell_size: [f64; 3]) -> Result<Option<ApplyOutcome>> {
        self.set_cell_size_in(cell_size, LengthUnit::Meters)
    }

    /// [`Self::set_cell_size`] with the values given in `unit`.
    pub fn set_cell_size_in(&self, cell_size: [f64; 3], unit: LengthUnit) -> Result<Option<ApplyOutcome>> {
        let ready = {
            let mut state = self.state.lock();
            state.pending.set_cell_size(unit.to_meters(cell_size))?;
            state.pending.ready()
        };
        ready.map(|params| self.apply_full(params)).transpose()
    }

    /// Record repetition counts; applies if grid and cell size are known.
    pub fn set_pbc(&self, pbc: [i64; 3]) -> Result<Option<ApplyOutcome>> {
        let ready = {
            let mut state = self.state.lock();
            state.pending.set_pbc(pbc)?;
            state.pending.ready()
        };
        ready.map(|params| self.apply_full(params)).transpose()
    }

    /// Snapshot of the pending pieces
    pub fn pending(&self) -> PendingConfig {
        self.state.lock().pending.clone()
    }

    // ============================================================================================
    // Access
    // ============================================================================================

    /// The current mesh.
    ///
    /// # Errors
    ///
    /// `Precondition` before the first successful configuration.
    pub fn current_mesh(&self) -> Result<Mesh> {
        let mesh = self.state.lock().mesh;
        if mesh.is_unset() {
            return Err(Error::Precondition("mesh not yet configured".into()));
        }
        Ok(mesh)
    }

    /// Run `f` with the mesh resources, the device and the current mesh, all
    /// locked for the duration.
    pub fn with_resources<R>(
        &self,
        f: impl FnOnce(&mut BufferLifecycleManager, &mut dyn Backend, &Mesh) -> Result<R>,
    ) -> Result<R> {
        let mut state = self.state.lock();
        if state.poisoned {
            return Err(Error::Precondition(POISONED.into()));
        }
        if state.mesh.is_unset() {
            return Err(Error::Precondition("mesh not yet configured".into()));
        }
        let mesh = state.mesh;
        let mut backend = self.backend.write();
        f(&mut state.resources, &mut **backend, &mesh)
    }

    /// 1D launch geometry covering every cell
    pub fn launch_config_1d(&self) -> Result<LaunchConfig> {
        let mesh = self.current_mesh()?;
        Ok(configure_1d(mesh.n_cells(), &self.backend.read().limits()))
    }

    /// 3D launch geometry for the grid
    pub fn launch_config_3d(&self) -> Result<LaunchConfig> {
        let mesh = self.current_mesh()?;
        Ok(configure_3d(mesh.size(), &self.backend.read().limits()))
    }

    // ============================================================================================
    // Transfer pipelines
    // ============================================================================================

    /// Host and device rings over the magnetization buffer, chunked by the
    /// configured transfer chunk.
    pub fn magnetization_channels(&self) -> Result<(Arc<HostChannel>, Arc<DeviceChannel>)> {
        let buffer = self.with_resources(|resources, _, _| {
            resources
                .magnetization()
                .buffer()
                .cloned()
                .ok_or_else(|| Error::Precondition("magnetization is not allocated".into()))
        })?;
        let host = HostChannel::new(buffer.len(), self.config.transfer_chunk)?;
        let device = DeviceChannel::new(buffer, self.config.transfer_chunk)?;
        Ok((Arc::new(host), Arc::new(device)))
    }

    /// Hand a running worker to the registry, which stops it before any
    /// resize that would free its buffers.
    pub fn attach_pipeline(&self, worker: TransferWorker) -> Result<()> {
        let mut state = self.state.lock();
        if state.pipelines.iter().any(|p| p.name() == worker.name()) {
            return Err(Error::Transfer(format!("pipeline {} is already attached", worker.name())));
        }
        tracing::debug!(pipeline = worker.name(), direction = %worker.direction(), "pipeline_attached");
        state.pipelines.push(worker);
        Ok(())
    }

    /// Stop and remove the named pipeline.
    pub fn detach_pipeline(&self, name: &str) -> Result<TransferStats> {
        let worker = {
            let mut state = self.state.lock();
            let index = state
                .pipelines
                .iter()
                .position(|p| p.name() == name)
                .ok_or_else(|| Error::Transfer(format!("no pipeline named {name}")))?;
            state.pipelines.remove(index)
        };
        worker.shutdown()
    }

    pub fn pipeline_names(&self) -> Vec<String> {
        self.state.lock().pipelines.iter().map(|p| p.name().to_string()).collect()
    }

    // ============================================================================================
    // Teardown
    // ============================================================================================

    /// Stop every pipeline and free every mesh-shaped buffer. The mesh
    /// returns to unset; the pending pieces are kept.
    pub fn shutdown(&self) -> usize {
        let mut state = self.state.lock();
        stop_pipelines(&mut state.pipelines);
        let freed = state.resources.release_all(&mut **self.backend.write());
        state.mesh = Mesh::unset();
        tracing::info!(freed = freed, "mesh registry shut down");
        freed
    }
}

impl Drop for MeshRegistry {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        stop_pipelines(&mut state.pipelines);
        state.resources.release_all(&mut **self.backend.write());
    }
}

/// Stop and join every worker, logging how each ended; returns their names.
fn stop_pipelines(pipelines: &mut Vec<TransferWorker>) -> Vec<String> {
    for worker in pipelines.iter() {
        worker.stop();
    }
    pipelines
        .drain(..)
        .map(|worker| {
            let name = worker.name().to_string();
            match worker.join() {
                Ok(stats) => tracing::info!(pipeline = %name, chunks = stats.chunks, "pipeline stopped for resize"),
                Err(e) => tracing::warn!(pipeline = %name, error = %e, "pipeline ended with an error"),
            }
            name
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParamGroup;
    use fieldgrid_backends::CpuBackend;

    fn registry() -> (MeshRegistry, CpuBackend) {
        let cpu = CpuBackend::new();
        let registry = MeshRegistry::with_backend(crate::shared(cpu.clone()), EngineConfig::default());
        (registry, cpu)
    }

    #[test]
    fn first_apply_initializes() {
        let (registry, cpu) = registry();
        let outcome = registry.set_mesh([4, 4, 4], [1e-9; 3], [0; 3]).unwrap();

        assert_eq!(outcome.kind, ApplyKind::Initialized);
        assert!(outcome.report.is_none());
        assert!(outcome.advisories.is_empty());
        assert_eq!(registry.current_mesh().unwrap().size(), [4, 4, 4]);
        assert_eq!(cpu.buffer_count(), 2);
        assert!(!registry.is_busy());
    }

    #[test]
    fn invalid_request_changes_nothing() {
        let (registry, cpu) = registry();
        registry.set_mesh([4, 4, 4], [1e-9; 3], [0; 3]).unwrap();

        let err = registry.set_mesh([4, 4, 4], [1e-9; 3], [0, 0, -2]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { group: ParamGroup::Pbc, .. }));
        assert_eq!(registry.current_mesh().unwrap().pbc(), [0, 0, 0]);
        assert_eq!(cpu.stats().frees, 0);
    }

    #[test]
    fn rough_axis_is_advised_but_applied() {
        let (registry, _cpu) = registry();
        let outcome = registry.set_mesh([13, 4, 1], [1e-9; 3], [0; 3]).unwrap();
        assert_eq!(outcome.advisories.len(), 1);
        assert_eq!(outcome.kind, ApplyKind::Initialized);
    }

    #[test]
    fn unset_mesh_is_a_precondition_failure() {
        let (registry, _cpu) = registry();
        assert!(matches!(registry.current_mesh(), Err(Error::Precondition(_))));
        assert!(matches!(registry.launch_config_1d(), Err(Error::Precondition(_))));
        assert!(matches!(
            registry.with_resources(|_, _, _| Ok(())),
            Err(Error::Precondition(_))
        ));
    }

    #[test]
    fn launch_configs_follow_mesh() {
        let (registry, _cpu) = registry();
        registry.set_mesh([64, 40, 3], [1e-9; 3], [0; 3]).unwrap();

        let flat = registry.launch_config_1d().unwrap();
        assert!(flat.covers(64 * 40 * 3));
        let tiled = registry.launch_config_3d().unwrap();
        assert_eq!(tiled.grid.x, 2);
        assert_eq!(tiled.grid.y, 2);
        assert_eq!(tiled.grid.z, 3);
    }

    #[test]
    fn set_cell_size_in_nanometers() {
        let (registry, _cpu) = registry();
        registry.set_grid_size([8, 8, 1]).unwrap();
        let outcome = registry
            .set_cell_size_in([5.0, 5.0, 2.0], LengthUnit::Nanometers)
            .unwrap()
            .unwrap();
        let cell = outcome.mesh.cell_size();
        assert!((cell[0] - 5e-9).abs() < 1e-21);
        assert!((cell[2] - 2e-9).abs() < 1e-21);
    }

    #[test]
    fn duplicate_pipeline_names_are_rejected() {
        let (registry, _cpu) = registry();
        registry.set_mesh([4, 4, 1], [1e-9; 3], [0; 3]).unwrap();

        let spawn = || {
            let (host, device) = registry.magnetization_channels().unwrap();
            crate::transfer::TransferPipeline::uploader("m", registry.backend(), host, device)
                .unwrap()
                .spawn()
                .unwrap()
        };
        registry.attach_pipeline(spawn()).unwrap();
        assert!(matches!(registry.attach_pipeline(spawn()), Err(Error::Transfer(_))));
        assert_eq!(registry.pipeline_names(), vec!["m".to_string()]);

        assert_eq!(registry.detach_pipeline("m").unwrap(), TransferStats::default());
        assert!(registry.detach_pipeline("m").is_err());
    }

    #[test]
    fn shutdown_frees_everything() {
        let (registry, cpu) = registry();
        registry.set_mesh([4, 4, 1], [1e-9; 3], [0; 3]).unwrap();
        assert_eq!(registry.shutdown(), 2);
        assert_eq!(cpu.buffer_count(), 0);
        assert!(registry.current_mesh().is_err());
    }

    #[test]
    fn drop_releases_device_memory() {
        let cpu = CpuBackend::new();
        {
            let registry = MeshRegistry::with_backend(crate::shared(cpu.clone()), EngineConfig::default());
            registry.set_mesh([8, 8, 1], [1e-9; 3], [0; 3]).unwrap();
            assert_eq!(cpu.buffer_count(), 2);
        }
        assert_eq!(cpu.buffer_count(), 0);
    }
}
