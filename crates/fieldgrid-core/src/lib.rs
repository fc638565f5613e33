//! # fieldgrid-core - Mesh State and Device Buffer Lifecycle
//!
//! Owns the simulation grid and every device buffer whose shape follows it,
//! and streams field data between host and device.
//!
//! ## Architecture
//!
//! ```text
//! set_grid_size / set_cell_size / set_pbc / set_mesh
//!            │
//!            ▼
//!     ┌──────────────┐  validate   ┌─────────────┐
//!     │ MeshRegistry │ ──────────▶ │ MeshParams  │──▶ advisories (warn)
//!     └──────┬───────┘             └─────────────┘
//!            │ busy section
//!            ▼
//!  ┌────────────────────────┐       ┌──────────────────────────┐
//!  │ BufferLifecycleManager │ ────▶ │ Backend (CPU / CUDA)     │
//!  │  magnetization, regions│       │  buffers, streams        │
//!  │  geometry, excitations │       └──────────────────────────┘
//!  │  noise, kernels, pool  │                  ▲
//!  └────────────────────────┘                  │ async copy + fence
//!                                     ┌────────┴─────────┐
//!                                     │ TransferPipeline │ (worker thread)
//!                                     └──────────────────┘
//! ```
//!
//! - **Validation first**: a request is checked in full before anything is
//!   freed; an invalid value leaves the mesh and all buffers untouched.
//! - **Minimal invalidation**: identical requests do nothing, PBC-only
//!   changes release only kernels and scratch buffers, and only size or cell
//!   size changes rebuild shaped buffers.
//! - **Quiesced transfers**: attached pipelines are stopped before a resize
//!   frees the buffers they stream.
//!
//! ## Example
//!
//! ```rust
//! use fieldgrid_core::{shared, ApplyKind, EngineConfig, MeshRegistry};
//! use fieldgrid_backends::CpuBackend;
//!
//! # fn main() -> fieldgrid_core::Result<()> {
//! let registry = MeshRegistry::with_backend(shared(CpuBackend::new()), EngineConfig::default());
//!
//! // Pieces may arrive in any order; the mesh is applied once both sizes are known
//! assert!(registry.set_pbc([0, 0, 1])?.is_none());
//! assert!(registry.set_grid_size([64, 64, 8])?.is_none());
//! let outcome = registry.set_cell_size([4e-9, 4e-9, 2e-9])?.unwrap();
//! assert_eq!(outcome.kind, ApplyKind::Initialized);
//!
//! let mesh = registry.current_mesh()?;
//! assert_eq!(mesh.n_cells(), 64 * 64 * 8);
//! assert!(registry.launch_config_3d()?.covers_3d(mesh.size()));
//! # Ok(())
//! # }
//! ```

pub mod advisory;
pub mod buffer;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod mesh;
pub mod registry;
pub mod transfer;

#[cfg(test)]
mod testing;

use fieldgrid_backends::Backend;
use parking_lot::RwLock;
use std::sync::Arc;

// Re-export primary types
pub use advisory::{check_smoothness, prime_factors, SmoothnessAdvisory};
pub use buffer::FieldBuffer;
pub use collaborators::{
    DroppedTerm, Excitation, ExtraTerm, Geometry, KernelCache, KernelData, KernelKind, MeshField, Shape, ThermalNoise,
};
pub use config::{BackendType, EngineConfig, LengthUnit, PendingConfig, DEFAULT_TRANSFER_CHUNK};
pub use error::{Error, ParamGroup, Result};
pub use lifecycle::{BufferLifecycleManager, ResizeReport};
pub use mesh::{Axis, Mesh, MeshParams};
pub use registry::{ApplyKind, ApplyOutcome, MeshRegistry};
pub use transfer::{
    ChunkCursor, ChunkTicket, DeviceChannel, Direction, HostChannel, StopSignal, TransferPipeline, TransferStats,
    TransferWorker,
};

/// A backend shared between the registry and transfer workers
pub type SharedBackend = Arc<RwLock<Box<dyn Backend + Send + Sync>>>;

/// Put `backend` behind a [`SharedBackend`].
pub fn shared(backend: impl Backend + Send + Sync + 'static) -> SharedBackend {
    Arc::new(RwLock::new(Box::new(backend)))
}
