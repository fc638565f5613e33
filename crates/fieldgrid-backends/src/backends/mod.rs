//! Backend implementations for different execution targets
//!
//! - `cpu` - host-memory backend (reference implementation, used by tests)
//! - `cuda` - CUDA GPU backend (NVIDIA GPUs, `cuda` feature)

pub mod cpu;
pub mod cuda;

// Re-export backends
pub use cpu::{CpuBackend, CpuBackendStats, StreamStats};
pub use cuda::CudaBackend;
