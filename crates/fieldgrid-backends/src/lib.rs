//! Device backends for fieldgrid
//!
//! This crate provides:
//! - **Backend Trait**: buffers, streams and context binding behind one interface
//! - **CPU Backend**: host-memory reference implementation with optional capacity limit
//! - **CUDA Backend**: NVIDIA devices through cudarc (`cuda` feature)
//! - **Launch Configurer**: 1D and 3D grid/block shapes within platform limits
//! - **Buffer Pool**: size-bucketed scratch buffers with bulk release
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │          fieldgrid-core (mesh registry, pipelines)       │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │ Arc<RwLock<Box<dyn Backend>>>
//!                       ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                     Backend Trait                        │
//! │   buffers · async copies on streams · bind_context       │
//! └─────────────────────┬───────────────────────────────────┘
//!              ┌────────┴────────┐
//!              ▼                 ▼
//!        ┌─────────┐       ┌─────────┐
//!        │   CPU   │       │  CUDA   │
//!        └─────────┘       └─────────┘
//! ```
//!
//! # Usage
//!
//! ```rust
//! use fieldgrid_backends::{configure_3d, Backend, CpuBackend};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut backend = CpuBackend::new();
//!
//! // One f32 per cell of a 64×64×4 grid
//! let buffer = backend.allocate_buffer(64 * 64 * 4 * 4)?;
//! let config = configure_3d([64, 64, 4], &backend.limits());
//! assert_eq!((config.grid.x, config.grid.y, config.grid.z), (2, 2, 4));
//!
//! backend.free_buffer(buffer)?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod backends;
pub mod error;
pub mod launch;
pub mod pool;

// Re-export public API
pub use backend::{Backend, BlockDim, BufferHandle, ExecutionContext, GridDim, LaunchConfig, StreamHandle};
pub use backends::{CpuBackend, CpuBackendStats, CudaBackend, StreamStats};
pub use error::{BackendError, Result};
pub use launch::{configure_1d, configure_3d, div_up, PlatformLimits};
pub use pool::{BufferPool, PoolStats};
