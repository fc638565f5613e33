//! Integration tests for mesh configuration and buffer lifecycle
//!
//! Every test drives a `MeshRegistry` over a `CpuBackend` and keeps a clone of
//! the backend to observe allocations and frees.

use fieldgrid_backends::{BufferHandle, CpuBackend};
use fieldgrid_tracing::{build_subscriber, TracingConfig};
use fieldgrid_core::{
    shared, ApplyKind, Axis, EngineConfig, Error, KernelData, KernelKind, MeshRegistry, ParamGroup, Result, Shape,
    TransferPipeline,
};

fn setup() -> (MeshRegistry, CpuBackend) {
    let cpu = CpuBackend::new();
    let registry = MeshRegistry::with_backend(shared(cpu.clone()), EngineConfig::default());
    (registry, cpu)
}

/// Handles of the magnetization and region buffers
fn field_handles(registry: &MeshRegistry) -> Result<(BufferHandle, BufferHandle)> {
    registry.with_resources(|resources, _, _| {
        let m = resources.magnetization().buffer().map(|b| b.handle());
        let r = resources.regions().buffer().map(|b| b.handle());
        Ok((m.unwrap(), r.unwrap()))
    })
}

fn build_demag(registry: &MeshRegistry) -> Result<()> {
    registry.with_resources(|resources, backend, mesh| {
        resources.kernels_mut().get_or_build(KernelKind::Demag, backend, mesh, |m| KernelData {
            size: m.size(),
            components: 6,
            data: vec![0.0; 6 * m.n_cells()],
        })?;
        Ok(())
    })
}

// ============================================================================
// Reconfiguration paths
// ============================================================================

#[test]
fn test_identical_set_mesh_keeps_buffers() -> Result<()> {
    let (registry, cpu) = setup();
    registry.set_mesh([4, 4, 4], [1e-9; 3], [0; 3])?;
    let handles = field_handles(&registry)?;
    let allocations = cpu.stats().allocations;

    let outcome = registry.set_mesh([4, 4, 4], [1e-9; 3], [0; 3])?;

    assert_eq!(outcome.kind, ApplyKind::Unchanged);
    assert!(outcome.report.is_none());
    assert_eq!(field_handles(&registry)?, handles);
    assert_eq!(cpu.stats().allocations, allocations);
    assert_eq!(cpu.stats().frees, 0);
    Ok(())
}

#[test]
fn test_grid_size_change_reallocates_and_invalidates_kernels() -> Result<()> {
    let (registry, cpu) = setup();
    registry.set_mesh([4, 4, 4], [1e-9; 3], [0; 3])?;
    build_demag(&registry)?;
    let (m_before, r_before) = field_handles(&registry)?;

    let outcome = registry.set_mesh([8, 4, 4], [1e-9; 3], [0; 3])?;

    assert_eq!(outcome.kind, ApplyKind::Resized);
    let report = outcome.report.unwrap();
    assert!(report.size_changed);
    assert!(!report.cell_size_changed);
    assert_eq!(report.freed_kernels, 1);

    let (m_after, r_after) = field_handles(&registry)?;
    assert_ne!(m_after, m_before);
    assert_ne!(r_after, r_before);
    assert!(!cpu.contains(m_before));
    assert!(!cpu.contains(r_before));

    registry.with_resources(|resources, _, mesh| {
        assert!(!resources.kernels().is_built(KernelKind::Demag));
        assert!(resources.magnetization().buffer().unwrap().fits(mesh));
        Ok(())
    })?;
    assert_eq!(registry.current_mesh()?.size(), [8, 4, 4]);
    Ok(())
}

#[test]
fn test_pbc_only_change_keeps_shaped_buffers() -> Result<()> {
    let (registry, _cpu) = setup();
    registry.set_mesh([4, 4, 4], [1e-9; 3], [0; 3])?;
    build_demag(&registry)?;
    let handles = field_handles(&registry)?;

    let outcome = registry.set_mesh([4, 4, 4], [1e-9; 3], [1, 0, 0])?;

    assert_eq!(outcome.kind, ApplyKind::PbcUpdated);
    let report = outcome.report.unwrap();
    assert_eq!(report.reallocated, 0);
    assert_eq!(report.freed_kernels, 1);
    assert_eq!(field_handles(&registry)?, handles);
    assert_eq!(registry.current_mesh()?.pbc(), [1, 0, 0]);
    Ok(())
}

#[test]
fn test_cell_size_change_is_a_resize() -> Result<()> {
    let (registry, _cpu) = setup();
    registry.set_mesh([4, 4, 1], [1e-9; 3], [0; 3])?;
    let (m_before, _) = field_handles(&registry)?;

    let outcome = registry.set_mesh([4, 4, 1], [2e-9, 1e-9, 1e-9], [0; 3])?;

    assert_eq!(outcome.kind, ApplyKind::Resized);
    assert!(outcome.report.unwrap().cell_size_changed);
    assert_ne!(field_handles(&registry)?.0, m_before);
    Ok(())
}

#[test]
fn test_resize_preserves_magnetization_by_resampling() -> Result<()> {
    let (registry, _cpu) = setup();
    registry.set_mesh([2, 1, 1], [1e-9; 3], [0; 3])?;
    registry.with_resources(|resources, backend, _| {
        // mx, my, mz planes
        resources.magnetization().write(backend, &[1.0, -1.0, 0.0, 0.0, 0.0, 0.0])
    })?;

    registry.set_mesh([4, 1, 1], [1e-9; 3], [0; 3])?;

    let m = registry.with_resources(|resources, backend, _| resources.magnetization().read(backend))?;
    assert_eq!(m, vec![1.0, 1.0, -1.0, -1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    Ok(())
}

#[test]
fn test_resize_rebuilds_geometry_and_drops_extra_terms() -> Result<()> {
    let (registry, _cpu) = setup();
    registry.set_mesh([4, 1, 1], [1.0; 3], [0; 3])?;
    registry.with_resources(|resources, backend, mesh| {
        resources
            .geometry_mut()
            .set_geom(backend, mesh, Some(Shape::cuboid([2.0, 1.0, 1.0])))?;
        resources
            .b_ext_mut()
            .add_extra_term(backend, mesh, "antenna", &[1.0; 4], [0.0, 0.0, 0.1])?;
        resources
            .j_mut()
            .add_extra_term(backend, mesh, "contact", &[1.0; 4], [1e10, 0.0, 0.0])?;
        resources.thermal_mut().noise_buffer(backend, mesh)?;
        Ok(())
    })?;

    let report = registry.set_mesh([8, 1, 1], [1.0; 3], [0; 3])?.report.unwrap();

    let dropped: Vec<(String, String)> = report
        .dropped_terms
        .iter()
        .map(|d| (d.quantity.clone(), d.term.clone()))
        .collect();
    assert_eq!(
        dropped,
        vec![
            ("B_ext".to_string(), "antenna".to_string()),
            ("J".to_string(), "contact".to_string()),
        ]
    );
    assert!(report.noise_released);

    registry.with_resources(|resources, backend, _| {
        assert!(resources.b_ext().extra_terms().is_empty());
        assert!(resources.j().extra_terms().is_empty());
        assert!(!resources.thermal().is_allocated());
        // Cell centers along x: -3.5 .. 3.5, box half-width 1
        let mask = resources.geometry().mask_values(backend)?.unwrap();
        assert_eq!(mask, vec![0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0]);
        Ok(())
    })
}

// ============================================================================
// Partial configuration
// ============================================================================

#[test]
fn test_partial_setters_in_any_order_match_set_mesh() -> Result<()> {
    let grid = [8, 4, 2];
    let cell = [2e-9, 3e-9, 4e-9];
    let pbc = [0, 2, 0];

    let (reference, _cpu) = setup();
    let expected = reference.set_mesh(grid, cell, pbc)?.mesh;

    #[derive(Clone, Copy)]
    enum Piece {
        Grid,
        Cell,
        Pbc,
    }
    use Piece::*;
    let orders = [
        [Grid, Cell, Pbc],
        [Grid, Pbc, Cell],
        [Cell, Grid, Pbc],
        [Cell, Pbc, Grid],
        [Pbc, Grid, Cell],
        [Pbc, Cell, Grid],
    ];

    for order in orders {
        let (registry, _cpu) = setup();
        for piece in order {
            match piece {
                Grid => registry.set_grid_size(grid)?,
                Cell => registry.set_cell_size(cell)?,
                Pbc => registry.set_pbc(pbc)?,
            };
        }
        assert_eq!(registry.current_mesh()?, expected);
    }
    Ok(())
}

#[test]
fn test_grid_size_alone_does_not_configure() -> Result<()> {
    let (registry, cpu) = setup();

    assert!(registry.set_grid_size([4, 4, 4])?.is_none());
    assert!(registry.set_grid_size([8, 8, 8])?.is_none());
    assert!(registry.set_pbc([1, 1, 0])?.is_none());

    assert!(matches!(registry.current_mesh(), Err(Error::Precondition(_))));
    assert_eq!(cpu.buffer_count(), 0);
    assert_eq!(registry.pending().grid_size(), Some([8, 8, 8]));
    Ok(())
}

#[test]
fn test_partial_values_are_validated_when_given() {
    let (registry, _cpu) = setup();

    let err = registry.set_pbc([0, -1, 0]).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { group: ParamGroup::Pbc, .. }));
    let err = registry.set_grid_size([4, 0, 4]).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { group: ParamGroup::GridSize, .. }));
    let err = registry.set_cell_size([1e-9, 1e-9, 0.0]).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { group: ParamGroup::CellSize, .. }));

    assert_eq!(registry.pending().pbc(), [0, 0, 0]);
}

#[test]
fn test_later_partial_call_reuses_applied_values() -> Result<()> {
    let (registry, _cpu) = setup();
    registry.set_mesh([16, 16, 1], [5e-9, 5e-9, 3e-9], [0; 3])?;

    let outcome = registry.set_pbc([0, 0, 4])?.unwrap();
    assert_eq!(outcome.kind, ApplyKind::PbcUpdated);
    assert_eq!(outcome.mesh.size(), [16, 16, 1]);
    assert_eq!(outcome.mesh.pbc(), [0, 0, 4]);

    let outcome = registry.set_grid_size([32, 16, 1])?.unwrap();
    assert_eq!(outcome.kind, ApplyKind::Resized);
    assert_eq!(outcome.mesh.pbc(), [0, 0, 4]);
    Ok(())
}

// ============================================================================
// Advisories and preconditions
// ============================================================================

#[test]
fn test_smooth_grid_has_no_advisory() -> Result<()> {
    let (registry, _cpu) = setup();
    let outcome = registry.set_mesh([4, 4, 4], [1e-9; 3], [0; 3])?;
    assert!(outcome.advisories.is_empty());
    Ok(())
}

#[test]
fn test_prime_axis_has_one_advisory() -> Result<()> {
    let (registry, _cpu) = setup();
    let outcome = registry.set_mesh([4, 13, 4], [1e-9; 3], [0; 3])?;
    assert_eq!(outcome.advisories.len(), 1);
    assert_eq!(outcome.advisories[0].axis, Axis::Y);
    assert_eq!(outcome.kind, ApplyKind::Initialized);
    Ok(())
}

#[test]
fn test_current_mesh_before_configuration_fails() {
    let (registry, _cpu) = setup();
    match registry.current_mesh() {
        Err(Error::Precondition(msg)) => assert_eq!(msg, "mesh not yet configured"),
        other => panic!("expected precondition failure, got {other:?}"),
    }
}

// ============================================================================
// Failure and pipelines
// ============================================================================

#[test]
fn test_out_of_memory_poisons_registry() -> Result<()> {
    let (registry, cpu) = setup();
    registry.set_mesh([4, 4, 1], [1e-9; 3], [0; 3])?;
    cpu.set_capacity(Some(cpu.allocated_bytes()));

    let err = registry.set_mesh([256, 256, 1], [1e-9; 3], [0; 3]).unwrap_err();
    assert!(matches!(err, Error::ResourceExhaustion { .. }));
    assert!(registry.is_poisoned());
    assert!(!registry.is_busy());
    // The old mesh is still reported; the resources are not usable
    assert_eq!(registry.current_mesh()?.size(), [4, 4, 1]);

    cpu.set_capacity(None);
    let err = registry.set_mesh([8, 8, 1], [1e-9; 3], [0; 3]).unwrap_err();
    assert!(matches!(err, Error::Precondition(_)));
    Ok(())
}

#[test]
fn test_overflowing_cell_count_is_rejected_before_any_allocation() -> Result<()> {
    let (registry, cpu) = setup();

    // Each axis is positive, but nx*ny*nz exceeds the address space
    let err = registry.set_mesh([1 << 22, 1 << 21, 1 << 21], [1e-9; 3], [0; 3]).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { group: ParamGroup::GridSize, .. }));
    let err = registry.set_grid_size([1 << 22, 1 << 21, 1 << 21]).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { group: ParamGroup::GridSize, .. }));

    assert_eq!(cpu.stats().allocations, 0);
    assert!(!registry.is_poisoned());
    assert!(matches!(registry.current_mesh(), Err(Error::Precondition(_))));

    // Still usable afterwards
    registry.set_mesh([4, 4, 4], [1e-9; 3], [0; 3])?;
    assert_eq!(cpu.allocated_bytes(), 64 * 3 * 4 + 64);
    Ok(())
}

#[cfg(target_pointer_width = "64")]
#[test]
fn test_overflowing_buffer_bytes_is_resource_exhaustion() {
    let (registry, cpu) = setup();

    // 2^62 cells fit a usize; 3 components of 4 bytes each do not
    let err = registry.set_mesh([1 << 21, 1 << 21, 1 << 20], [1e-9; 3], [0; 3]).unwrap_err();
    match err {
        Error::ResourceExhaustion { resource, .. } => assert_eq!(resource, "magnetization"),
        other => panic!("expected resource exhaustion, got {other:?}"),
    }
    assert!(registry.is_poisoned());
    assert_eq!(cpu.buffer_count(), 0);
    assert_eq!(cpu.allocated_bytes(), 0);
}

#[test]
fn test_resize_stops_attached_pipelines() -> Result<()> {
    let (registry, _cpu) = setup();
    registry.set_mesh([4, 4, 1], [1e-9; 3], [0; 3])?;

    let (host, device) = registry.magnetization_channels()?;
    let worker = TransferPipeline::uploader("magnetization", registry.backend(), host, device)?.spawn()?;
    registry.attach_pipeline(worker)?;

    // PBC-only changes free no shaped buffers, so pipelines keep running
    let outcome = registry.set_pbc([1, 0, 0])?.unwrap();
    assert!(outcome.report.unwrap().stopped_pipelines.is_empty());
    assert_eq!(registry.pipeline_names(), vec!["magnetization".to_string()]);

    let outcome = registry.set_mesh([8, 4, 1], [1e-9; 3], [1, 0, 0])?;
    assert_eq!(outcome.report.unwrap().stopped_pipelines, vec!["magnetization".to_string()]);
    assert!(registry.pipeline_names().is_empty());
    Ok(())
}

#[test]
fn test_reconfiguration_under_redacting_json_subscriber() -> Result<()> {
    let mut config = TracingConfig::for_ci();
    config.directives = Some("fieldgrid_core=debug,fieldgrid_backends=debug".to_string());
    config.redacted_fields = vec!["mesh".to_string(), "from".to_string()];
    let subscriber = build_subscriber(&config).expect("valid tracing config");

    tracing::subscriber::with_default(subscriber, || {
        let (registry, _cpu) = setup();
        registry.set_mesh([4, 4, 1], [1e-9; 3], [0; 3])?;
        let outcome = registry.set_mesh([8, 4, 1], [1e-9; 3], [0; 3])?;
        assert_eq!(outcome.kind, ApplyKind::Resized);
        Ok(())
    })
}

#[test]
fn test_engine_config_builds_cpu_registry() -> Result<()> {
    let registry = MeshRegistry::new(EngineConfig::default())?;
    registry.set_mesh([2, 2, 2], [1e-9; 3], [0; 3])?;
    assert_eq!(registry.backend().read().name(), "cpu");
    assert_eq!(registry.config().transfer_chunk, 16);
    Ok(())
}
