//! Configuration: the partial mesh builder and engine settings
//!
//! Mesh parameters may arrive piecewise (`set_grid_size`, `set_cell_size`,
//! `set_pbc` in any order). [`PendingConfig`] accumulates them and yields a
//! complete [`MeshParams`] only once both grid size and cell size are known.
//!
//! [`EngineConfig`] selects the device backend, launch limits and transfer
//! chunk size, with `FIELDGRID_*` environment overrides.

use crate::error::{Error, Result};
use crate::mesh::{validate_cell_size, validate_grid_size, validate_pbc, MeshParams};
use crate::SharedBackend;
use fieldgrid_backends::{Backend, CpuBackend, PlatformLimits};
use fieldgrid_tracing::perf_span;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Arc;

#[cfg(feature = "cuda")]
use fieldgrid_backends::CudaBackend;
#[cfg(not(feature = "cuda"))]
use fieldgrid_backends::BackendError;

const ENV_PREFIX: &str = "FIELDGRID_";

/// Elements per transfer chunk unless configured otherwise.
pub const DEFAULT_TRANSFER_CHUNK: usize = 16;

// ================================================================================================
// Pending mesh configuration
// ================================================================================================

/// Accumulator for piecewise mesh configuration
///
/// Each piece is validated when recorded, so an invalid value is rejected at
/// the call that supplied it. Repetition counts default to zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingConfig {
    grid_size: Option<[i64; 3]>,
    cell_size: Option<[f64; 3]>,
    pbc: [i64; 3],
}

impl PendingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_grid_size(&mut self, grid_size: [i64; 3]) -> Result<()> {
        validate_grid_size(grid_size)?;
        self.grid_size = Some(grid_size);
        Ok(())
    }

    pub fn set_cell_size(&mut self, cell_size: [f64; 3]) -> Result<()> {
        validate_cell_size(cell_size)?;
        self.cell_size = Some(cell_size);
        Ok(())
    }

    pub fn set_pbc(&mut self, pbc: [i64; 3]) -> Result<()> {
        validate_pbc(pbc)?;
        self.pbc = pbc;
        Ok(())
    }

    pub fn grid_size(&self) -> Option<[i64; 3]> {
        self.grid_size
    }

    pub fn cell_size(&self) -> Option<[f64; 3]> {
        self.cell_size
    }

    pub fn pbc(&self) -> [i64; 3] {
        self.pbc
    }

    /// The full request, once grid size and cell size are both known
    pub fn ready(&self) -> Option<MeshParams> {
        Some(MeshParams::new(self.grid_size?, self.cell_size?, self.pbc))
    }

    /// Remember every piece of a successfully applied request.
    pub fn record_applied(&mut self, params: &MeshParams) {
        self.grid_size = Some(params.grid_size);
        self.cell_size = Some(params.cell_size);
        self.pbc = params.pbc;
    }
}

// ================================================================================================
// Units
// ================================================================================================

/// Length unit accepted by `set_cell_size_in`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LengthUnit {
    #[default]
    Meters,
    Micrometers,
    Nanometers,
}

impl LengthUnit {
    /// Meters per unit
    pub const fn factor(self) -> f64 {
        match self {
            Self::Meters => 1.0,
            Self::Micrometers => 1e-6,
            Self::Nanometers => 1e-9,
        }
    }

    pub fn to_meters(self, value: [f64; 3]) -> [f64; 3] {
        value.map(|v| v * self.factor())
    }
}

// ================================================================================================
// Engine configuration
// ================================================================================================

/// Backend type for engine initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackendType {
    /// CPU backend (always available)
    #[default]
    Cpu,
    /// CUDA backend (NVIDIA GPUs, `cuda` feature)
    Cuda,
    /// CUDA if available, otherwise CPU
    Auto,
}

impl BackendType {
    fn from_env_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cpu" => Some(Self::Cpu),
            "cuda" => Some(Self::Cuda),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }
}

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub backend: BackendType,
    pub limits: PlatformLimits,
    /// Elements per transfer chunk
    pub transfer_chunk: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::Cpu,
            limits: PlatformLimits::default(),
            transfer_chunk: DEFAULT_TRANSFER_CHUNK,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `FIELDGRID_BACKEND`, `FIELDGRID_BLOCK_SIZE`,
    /// `FIELDGRID_TILE_X`, `FIELDGRID_TILE_Y`, `FIELDGRID_MAX_GRID_SIZE` and
    /// `FIELDGRID_TRANSFER_CHUNK`. Unparseable or zero values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(backend) = env_var("BACKEND").and_then(|value| BackendType::from_env_value(&value)) {
            config.backend = backend;
        }
        if let Some(block_size) = positive_env::<u32>("BLOCK_SIZE") {
            config.limits.block_size = block_size;
        }
        if let Some(tile_x) = positive_env::<u32>("TILE_X") {
            config.limits.tile_x = tile_x;
        }
        if let Some(tile_y) = positive_env::<u32>("TILE_Y") {
            config.limits.tile_y = tile_y;
        }
        if let Some(max_grid_size) = positive_env::<u32>("MAX_GRID_SIZE") {
            config.limits.max_grid_size = max_grid_size;
        }
        if let Some(chunk) = positive_env::<usize>("TRANSFER_CHUNK") {
            config.transfer_chunk = chunk;
        }

        config
    }

    /// Reject settings that cannot work.
    pub fn validate(&self) -> Result<()> {
        self.limits.validate()?;
        if self.transfer_chunk == 0 {
            return Err(Error::Transfer("transfer chunk must hold at least one element".into()));
        }
        Ok(())
    }

    /// Create the configured backend behind a shared lock.
    #[tracing::instrument(skip(self), fields(backend = ?self.backend))]
    pub fn create_backend(&self) -> Result<SharedBackend> {
        let span = perf_span!("create_backend");

        let backend: Box<dyn Backend + Send + Sync> = match self.backend {
            BackendType::Cpu => Box::new(CpuBackend::new().with_limits(self.limits)),
            BackendType::Cuda => create_cuda()?,
            BackendType::Auto => match create_cuda() {
                Ok(backend) => {
                    tracing::info!("Auto-selected CUDA backend (NVIDIA GPU detected)");
                    backend
                }
                Err(e) => {
                    tracing::info!(reason = %e, "Auto-selected CPU backend (fallback)");
                    Box::new(CpuBackend::new().with_limits(self.limits))
                }
            },
        };

        let duration_us = span.elapsed_us();
        tracing::debug!(
            duration_us = duration_us,
            backend = backend.name(),
            "backend_created"
        );

        Ok(Arc::new(RwLock::new(backend)))
    }
}

fn create_cuda() -> Result<Box<dyn Backend + Send + Sync>> {
    #[cfg(feature = "cuda")]
    {
        Ok(Box::new(CudaBackend::new()?))
    }
    #[cfg(not(feature = "cuda"))]
    {
        Err(Error::Backend(BackendError::unsupported(
            "CUDA backend requires 'cuda' feature to be enabled",
        )))
    }
}

/// Read `FIELDGRID_<suffix>`, treating blank values as unset.
fn env_var(suffix: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{suffix}"))
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn positive_env<T>(suffix: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    env_var(suffix)
        .and_then(|value| value.trim().parse::<T>().ok())
        .filter(|value| *value > T::default())
}
